//! Manifest documents and media types

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::digest::Digest;

/// OCI image manifest.
pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
/// Docker image manifest, schema 2.
pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
/// OCI image index.
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
/// Docker manifest list.
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";

/// The only schema version accepted.
pub const SCHEMA_VERSION: u64 = 2;

/// Which shape of document a media type declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    /// A single image: a config blob and layer blobs.
    Image,
    /// A list of manifests, usually one per platform.
    Index,
}

impl ManifestKind {
    /// The kind of document a supported media type declares, `None` for anything else.
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        match media_type {
            OCI_MANIFEST | DOCKER_MANIFEST => Some(ManifestKind::Image),
            OCI_INDEX | DOCKER_MANIFEST_LIST => Some(ManifestKind::Index),
            _ => None,
        }
    }
}

/// A reference to content by digest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced content.
    pub media_type: String,
    /// Digest of the referenced content.
    pub digest: Digest,
    /// Size of the referenced content in bytes.
    pub size: u64,
    /// Arbitrary metadata.
    #[serde(default)]
    pub annotations: Option<BTreeMap<String, String>>,
}

/// The fields shared by every manifest document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Header {
    pub(crate) schema_version: u64,
    #[serde(default)]
    pub(crate) media_type: Option<String>,
}

/// An image manifest.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    /// Always [`SCHEMA_VERSION`] once validated.
    pub schema_version: u64,
    /// [`OCI_MANIFEST`] or [`DOCKER_MANIFEST`].
    pub media_type: String,
    /// The image configuration blob.
    pub config: Descriptor,
    /// Layer blobs, base layer first.
    pub layers: Vec<Descriptor>,
    /// Arbitrary metadata.
    #[serde(default)]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl ImageManifest {
    /// Every blob the manifest references: config first, then layers in order.
    pub fn references(&self) -> impl Iterator<Item = &Descriptor> {
        std::iter::once(&self.config).chain(self.layers.iter())
    }
}

/// An image index or manifest list.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexManifest {
    /// Always [`SCHEMA_VERSION`] once validated.
    pub schema_version: u64,
    /// [`OCI_INDEX`] or [`DOCKER_MANIFEST_LIST`].
    pub media_type: String,
    /// The manifests in the index.
    pub manifests: Vec<Descriptor>,
    /// Arbitrary metadata.
    #[serde(default)]
    pub annotations: Option<BTreeMap<String, String>>,
}

/// A validated manifest.
#[derive(Debug, Clone)]
pub enum Manifest {
    /// See [`ImageManifest`].
    Image(ImageManifest),
    /// See [`IndexManifest`].
    Index(IndexManifest),
}

impl Manifest {
    /// The document's own `mediaType`.
    pub fn media_type(&self) -> &str {
        match self {
            Manifest::Image(manifest) => &manifest.media_type,
            Manifest::Index(manifest) => &manifest.media_type,
        }
    }
}

/// The `mediaType` a stored manifest declares about itself.
///
/// Stored manifests passed validation, so this only falls back to
/// [`OCI_MANIFEST`] for documents written by some other means.
pub fn media_type_of(body: &[u8]) -> String {
    serde_json::from_slice::<Header>(body)
        .ok()
        .and_then(|header| header.media_type)
        .unwrap_or_else(|| OCI_MANIFEST.to_owned())
}
