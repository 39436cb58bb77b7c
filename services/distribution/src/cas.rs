//! Content-addressable blob store

use camino::Utf8PathBuf;
use storage::{StorageBucket, StorageError};

use crate::digest::Digest;
use crate::name::Repository;

/// Immutable blobs keyed by `(repository, digest)`.
///
/// This is a pure byte store: it never hashes. Callers verify content against
/// the digest on the way in and again on the way out.
#[derive(Debug, Clone)]
pub struct BlobStore {
    bucket: StorageBucket,
}

impl BlobStore {
    /// Blobs are kept in `bucket` under `<repository>/_blobs/sha256/<hex>`.
    pub fn new(bucket: StorageBucket) -> Self {
        Self { bucket }
    }

    fn path(repository: &Repository, digest: &Digest) -> Utf8PathBuf {
        repository.key("_blobs").join(digest.path())
    }

    /// Store `bytes`, replacing any existing (necessarily identical) blob.
    #[tracing::instrument(skip_all, fields(%repository, %digest, size = bytes.len()))]
    pub async fn put(
        &self,
        repository: &Repository,
        digest: &Digest,
        bytes: &[u8],
    ) -> Result<(), StorageError> {
        self.bucket.put(&Self::path(repository, digest), bytes).await
    }

    /// Fetch a blob, `None` if the repository does not have it.
    #[tracing::instrument(skip_all, fields(%repository, %digest))]
    pub async fn get(
        &self,
        repository: &Repository,
        digest: &Digest,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        self.bucket.get(&Self::path(repository, digest)).await
    }

    /// Remove a blob. Removing an absent blob succeeds.
    #[tracing::instrument(skip_all, fields(%repository, %digest))]
    pub async fn delete(&self, repository: &Repository, digest: &Digest) -> Result<(), StorageError> {
        self.bucket.delete(&Self::path(repository, digest)).await
    }

    /// Whether the repository has the blob.
    pub async fn exists(&self, repository: &Repository, digest: &Digest) -> Result<bool, StorageError> {
        self.bucket.exists(&Self::path(repository, digest)).await
    }
}
