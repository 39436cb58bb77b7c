//! Manifest validation
//!
//! Validation runs in a fixed order and stops at the first failure:
//!
//! 1. the declared media type must be one we serve,
//! 2. the body must be JSON,
//! 3. `schemaVersion` must be 2,
//! 4. the document's `mediaType` must equal the declared one,
//! 5. an image manifest's config and layers must already be in the
//!    repository's blob store, checked in document order.
//!
//! Index manifests skip step 5: the manifests they list are commonly pushed
//! after the index itself.

use serde::Deserialize;
use serde_json::Value;
use storage::StorageError;

use crate::cas::BlobStore;
use crate::digest::Digest;
use crate::error::RegistryError;
use crate::name::Repository;
use crate::schema::{Header, ImageManifest, IndexManifest, Manifest, ManifestKind, SCHEMA_VERSION};

/// Why a manifest was rejected.
///
/// Everything but [`ValidationError::Storage`] is a property of the document
/// and the repository's contents, not a fault.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// The declared media type is not a supported manifest type.
    #[error("unsupported manifest media type: {0:?}")]
    UnsupportedMediaType(String),

    /// The body is not a well-formed manifest document.
    #[error("malformed manifest: {0}")]
    Malformed(#[source] serde_json::Error),

    /// `schemaVersion` is not 2.
    #[error("unsupported schema version {0}")]
    SchemaVersion(u64),

    /// The document's `mediaType` differs from the declared one.
    #[error("manifest media type {document:?} does not match declared {declared:?}")]
    MediaTypeMismatch {
        /// The `Content-Type` the manifest was pushed with.
        declared: String,
        /// The document's own `mediaType`, if it has one.
        document: Option<String>,
    },

    /// An image manifest references a blob the repository does not have.
    #[error("referenced blob {0} is unknown")]
    BlobUnknown(Digest),

    /// The blob store could not answer.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<ValidationError> for RegistryError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::BlobUnknown(digest) => RegistryError::ManifestBlobUnknown(digest),
            ValidationError::Storage(err) => RegistryError::Storage(err),
            other => RegistryError::ManifestInvalid(other.to_string()),
        }
    }
}

/// Checks manifest documents against their declared type and the blob store.
#[derive(Debug, Clone)]
pub struct ManifestValidator {
    blobs: BlobStore,
}

impl ManifestValidator {
    /// Referential checks look up blobs in `blobs`.
    pub fn new(blobs: BlobStore) -> Self {
        Self { blobs }
    }

    /// Validate `body`, pushed to `repository` as `declared`.
    #[tracing::instrument(skip_all, fields(%repository, declared = %declared, size = body.len()))]
    pub async fn validate(
        &self,
        repository: &Repository,
        declared: &str,
        body: &[u8],
    ) -> Result<Manifest, ValidationError> {
        let kind = ManifestKind::from_media_type(declared)
            .ok_or_else(|| ValidationError::UnsupportedMediaType(declared.to_owned()))?;

        let document: Value = serde_json::from_slice(body).map_err(ValidationError::Malformed)?;

        let header = Header::deserialize(&document).map_err(ValidationError::Malformed)?;
        if header.schema_version != SCHEMA_VERSION {
            return Err(ValidationError::SchemaVersion(header.schema_version));
        }
        if header.media_type.as_deref() != Some(declared) {
            return Err(ValidationError::MediaTypeMismatch {
                declared: declared.to_owned(),
                document: header.media_type,
            });
        }

        match kind {
            ManifestKind::Image => {
                let manifest =
                    ImageManifest::deserialize(document).map_err(ValidationError::Malformed)?;
                self.check_references(repository, &manifest).await?;
                Ok(Manifest::Image(manifest))
            }
            ManifestKind::Index => {
                let manifest =
                    IndexManifest::deserialize(document).map_err(ValidationError::Malformed)?;
                Ok(Manifest::Index(manifest))
            }
        }
    }

    async fn check_references(
        &self,
        repository: &Repository,
        manifest: &ImageManifest,
    ) -> Result<(), ValidationError> {
        for descriptor in manifest.references() {
            if !self.blobs.exists(repository, &descriptor.digest).await? {
                tracing::debug!(digest = %descriptor.digest, "manifest references unknown blob");
                return Err(ValidationError::BlobUnknown(descriptor.digest.clone()));
            }
        }
        Ok(())
    }
}
