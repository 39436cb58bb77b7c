//! Manifest storage

use camino::Utf8PathBuf;
use storage::{StorageBucket, StorageError};

use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::name::Repository;

/// Manifest bodies keyed by `(repository, digest)`.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    bucket: StorageBucket,
}

impl ManifestStore {
    /// Manifests are kept in `bucket` under `<repository>/_manifests/sha256/<hex>`.
    pub fn new(bucket: StorageBucket) -> Self {
        Self { bucket }
    }

    fn path(repository: &Repository, digest: &Digest) -> Utf8PathBuf {
        repository.key("_manifests").join(digest.path())
    }

    /// Store a manifest body. The digest is content-derived, so rewriting an
    /// existing manifest writes identical bytes.
    #[tracing::instrument(skip_all, fields(%repository, %digest, size = body.len()))]
    pub async fn put(
        &self,
        repository: &Repository,
        digest: &Digest,
        body: &[u8],
    ) -> Result<(), StorageError> {
        self.bucket.put(&Self::path(repository, digest), body).await
    }

    /// Fetch a manifest body and check it still hashes to `digest`.
    #[tracing::instrument(skip_all, fields(%repository, %digest))]
    pub async fn get_and_verify(
        &self,
        repository: &Repository,
        digest: &Digest,
    ) -> RegistryResult<Vec<u8>> {
        let body = self
            .bucket
            .get(&Self::path(repository, digest))
            .await?
            .ok_or_else(|| RegistryError::ManifestUnknown(digest.to_string()))?;

        if let Err(mismatch) = digest.verify(&body) {
            tracing::warn!(actual = %mismatch.actual, "stored manifest does not match its digest");
            return Err(mismatch.into());
        }
        Ok(body)
    }

    /// Remove a manifest. Tags pointing at it are left dangling.
    #[tracing::instrument(skip_all, fields(%repository, %digest))]
    pub async fn delete(&self, repository: &Repository, digest: &Digest) -> RegistryResult<()> {
        if self.bucket.remove(&Self::path(repository, digest)).await? {
            Ok(())
        } else {
            Err(RegistryError::ManifestUnknown(digest.to_string()))
        }
    }
}
