//! Storage layer for the registry

use storage::Storage;

use crate::cas::BlobStore;
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::manifests::ManifestStore;
use crate::name::{Reference, Repository};
use crate::tags::{TagPage, TagRegistry};
use crate::upload::UploadSessions;
use crate::validate::ManifestValidator;

/// Default ceiling for manifest bodies, 10 MiB.
pub const DEFAULT_MAX_MANIFEST_SIZE: usize = 10 * 1024 * 1024;

/// Default number of tags per page when the client does not ask for one.
pub const DEFAULT_TAG_PAGE_SIZE: usize = 100;

/// Limits applied at the protocol boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Largest manifest body accepted, in bytes.
    pub max_manifest_size: usize,
    /// Tag page size when the client does not give `n`.
    pub tag_page_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_manifest_size: DEFAULT_MAX_MANIFEST_SIZE,
            tag_page_size: DEFAULT_TAG_PAGE_SIZE,
        }
    }
}

/// Registry storage backend
///
/// Wires the registry components to two buckets: blob bytes and upload
/// scratch data in one, manifests and tags in the other.
#[derive(Clone, Debug)]
pub struct RegistryStorage {
    blobs: BlobStore,
    uploads: UploadSessions,
    validator: ManifestValidator,
    manifests: ManifestStore,
    tags: TagRegistry,
    limits: Limits,
}

impl RegistryStorage {
    /// Create a new registry storage
    pub fn new(storage: &Storage, metadata_bucket: &str, blob_bucket: &str) -> Self {
        let metadata = storage.bucket(metadata_bucket);
        let blob_bucket = storage.bucket(blob_bucket);
        let blobs = BlobStore::new(blob_bucket.clone());

        Self {
            uploads: UploadSessions::new(blob_bucket, blobs.clone()),
            validator: ManifestValidator::new(blobs.clone()),
            manifests: ManifestStore::new(metadata.clone()),
            tags: TagRegistry::new(metadata),
            blobs,
            limits: Limits::default(),
        }
    }

    /// Replace the protocol limits.
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// The protocol limits.
    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// The upload session manager.
    pub fn uploads(&self) -> &UploadSessions {
        &self.uploads
    }

    /// Store a blob after checking it hashes to `digest`.
    #[tracing::instrument(skip_all, fields(%repository, %digest))]
    pub async fn put_blob(
        &self,
        repository: &Repository,
        digest: &Digest,
        data: &[u8],
    ) -> RegistryResult<()> {
        digest.verify(data)?;
        self.blobs.put(repository, digest, data).await?;
        Ok(())
    }

    /// Fetch a blob, re-checking its digest.
    pub async fn get_blob(&self, repository: &Repository, digest: &Digest) -> RegistryResult<Vec<u8>> {
        let data = self
            .blobs
            .get(repository, digest)
            .await?
            .ok_or_else(|| RegistryError::BlobUnknown(digest.clone()))?;

        if let Err(mismatch) = digest.verify(&data) {
            tracing::warn!(%repository, %digest, actual = %mismatch.actual, "stored blob does not match its digest");
            return Err(mismatch.into());
        }
        Ok(data)
    }

    /// Delete a blob the repository has.
    pub async fn delete_blob(&self, repository: &Repository, digest: &Digest) -> RegistryResult<()> {
        if !self.blobs.exists(repository, digest).await? {
            return Err(RegistryError::BlobUnknown(digest.clone()));
        }
        self.blobs.delete(repository, digest).await?;
        Ok(())
    }

    /// The manifest digest a reference names.
    pub async fn resolve(&self, repository: &Repository, reference: &Reference) -> RegistryResult<Digest> {
        match reference {
            Reference::Digest(digest) => Ok(digest.clone()),
            Reference::Tag(tag) => self.tags.resolve(repository, tag).await,
        }
    }

    /// Fetch a manifest by digest or tag, with its verified digest.
    #[tracing::instrument(skip_all, fields(%repository, %reference))]
    pub async fn get_manifest(
        &self,
        repository: &Repository,
        reference: &Reference,
    ) -> RegistryResult<(Digest, Vec<u8>)> {
        let digest = self.resolve(repository, reference).await?;
        let body = self.manifests.get_and_verify(repository, &digest).await?;
        Ok((digest, body))
    }

    /// Validate and store a manifest, pointing the tag at it when `reference` is one.
    ///
    /// Pushing by digest requires the body to hash to that digest before any
    /// validation happens.
    #[tracing::instrument(skip_all, fields(%repository, %reference, media_type = %media_type))]
    pub async fn put_manifest(
        &self,
        repository: &Repository,
        reference: &Reference,
        media_type: &str,
        body: &[u8],
    ) -> RegistryResult<Digest> {
        let digest = match reference {
            Reference::Digest(expected) => {
                expected.verify(body)?;
                expected.clone()
            }
            Reference::Tag(_) => Digest::compute(body),
        };

        let manifest = self.validator.validate(repository, media_type, body).await?;
        self.manifests.put(repository, &digest, body).await?;

        if let Reference::Tag(tag) = reference {
            self.tags.set(repository, tag, &digest).await?;
        }

        tracing::debug!(%digest, media_type = manifest.media_type(), "stored manifest");
        Ok(digest)
    }

    /// Delete a manifest by digest, or just the tag when `reference` is one.
    #[tracing::instrument(skip_all, fields(%repository, %reference))]
    pub async fn delete_manifest(&self, repository: &Repository, reference: &Reference) -> RegistryResult<()> {
        match reference {
            Reference::Digest(digest) => self.manifests.delete(repository, digest).await,
            Reference::Tag(tag) => self.tags.delete(repository, tag).await,
        }
    }

    /// A page of the repository's tags.
    pub async fn list_tags(
        &self,
        repository: &Repository,
        limit: usize,
        after: Option<&str>,
    ) -> RegistryResult<TagPage> {
        Ok(self.tags.list(repository, limit, after).await?)
    }
}
