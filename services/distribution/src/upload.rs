//! Resumable chunked blob uploads
//!
//! A session starts with [`UploadSessions::create`], accumulates bytes through
//! [`UploadSessions::append`] and ends with [`UploadSessions::finalize`], which
//! checks the digest of everything received and promotes it into the
//! [`BlobStore`]. Accumulated bytes live in the blob bucket under
//! `<repository>/_uploads/<session>` until then.
//!
//! Appending is a read-modify-write of that scratch object, so every operation
//! that touches it holds a per-session lock for its whole duration. Two
//! concurrent appends to one session are applied one after the other; appends
//! to different sessions do not contend.
//!
//! Sessions do not expire. A session that is never finalized keeps its scratch
//! object until the client aborts it.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Weak};

use camino::Utf8PathBuf;
use storage::StorageBucket;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::cas::BlobStore;
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::name::Repository;

/// Opaque upload session identifier, a random UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

impl FromStr for SessionId {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::try_parse(s)
            .map(Self)
            .map_err(|_| RegistryError::UploadUnknown(s.to_owned()))
    }
}

type SessionKey = (Repository, SessionId);

/// One async mutex per live session.
///
/// The map only holds weak references: a session's mutex exists while some
/// task holds or waits on it, and the entry is pruned afterwards.
#[derive(Debug, Default)]
struct SessionLocks {
    sessions: parking_lot::Mutex<HashMap<SessionKey, Weak<Mutex<()>>>>,
}

impl SessionLocks {
    async fn lock(&self, repository: &Repository, id: SessionId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut sessions = self.sessions.lock();
            sessions.retain(|_, lock| lock.strong_count() > 0);

            let key = (repository.clone(), id);
            match sessions.get(&key).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(Mutex::new(()));
                    sessions.insert(key, Arc::downgrade(&lock));
                    lock
                }
            }
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn live(&self) -> usize {
        let sessions = self.sessions.lock();
        sessions.values().filter(|lock| lock.strong_count() > 0).count()
    }
}

/// A blob promoted out of an upload session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedBlob {
    /// The verified digest the blob is stored under.
    pub digest: Digest,
    /// Total size in bytes.
    pub size: u64,
}

/// The upload session manager.
#[derive(Debug, Clone)]
pub struct UploadSessions {
    scratch: StorageBucket,
    blobs: BlobStore,
    locks: Arc<SessionLocks>,
}

impl UploadSessions {
    /// Sessions accumulate in `scratch` and finalize into `blobs`.
    pub fn new(scratch: StorageBucket, blobs: BlobStore) -> Self {
        Self {
            scratch,
            blobs,
            locks: Default::default(),
        }
    }

    fn path(repository: &Repository, id: SessionId) -> Utf8PathBuf {
        repository.key("_uploads").join(id.to_string())
    }

    /// Allocate a new session. Nothing is stored until the first chunk arrives.
    pub fn create(&self, repository: &Repository) -> SessionId {
        let id = SessionId::new();
        tracing::debug!(%repository, session = %id, "created upload session");
        id
    }

    /// Number of bytes received so far; zero for a session with no data.
    #[tracing::instrument(skip_all, fields(%repository, session = %id))]
    pub async fn status(&self, repository: &Repository, id: SessionId) -> RegistryResult<u64> {
        let metadata = self.scratch.metadata(&Self::path(repository, id)).await?;
        Ok(metadata.map(|m| m.size).unwrap_or(0))
    }

    /// Append `chunk` and return the new total length.
    pub async fn append(
        &self,
        repository: &Repository,
        id: SessionId,
        chunk: &[u8],
    ) -> RegistryResult<u64> {
        self.append_checked(repository, id, chunk, None).await
    }

    /// Append `chunk`, which the client says starts at `offset`.
    ///
    /// Fails with [`RegistryError::RangeNotSatisfiable`] without modifying the
    /// session when `offset` is not the current length.
    pub async fn append_at(
        &self,
        repository: &Repository,
        id: SessionId,
        chunk: &[u8],
        offset: u64,
    ) -> RegistryResult<u64> {
        self.append_checked(repository, id, chunk, Some(offset))
            .await
    }

    #[tracing::instrument(skip_all, fields(%repository, session = %id, chunk = chunk.len(), ?offset))]
    async fn append_checked(
        &self,
        repository: &Repository,
        id: SessionId,
        chunk: &[u8],
        offset: Option<u64>,
    ) -> RegistryResult<u64> {
        let _guard = self.locks.lock(repository, id).await;
        let path = Self::path(repository, id);

        let mut data = self.scratch.get(&path).await?.unwrap_or_default();
        if let Some(offset) = offset {
            let expected = data.len() as u64;
            if offset != expected {
                return Err(RegistryError::RangeNotSatisfiable { expected, offset });
            }
        }

        data.extend_from_slice(chunk);
        self.scratch.put(&path, &data).await?;

        tracing::debug!(total = data.len(), "appended chunk");
        Ok(data.len() as u64)
    }

    /// Append an optional last chunk, verify the whole upload against
    /// `expected`, and move it into the blob store.
    ///
    /// On a digest mismatch the session is left exactly as it was before this
    /// call, so the client may retry.
    #[tracing::instrument(skip_all, fields(%repository, session = %id, %expected))]
    pub async fn finalize(
        &self,
        repository: &Repository,
        id: SessionId,
        last_chunk: &[u8],
        expected: &Digest,
    ) -> RegistryResult<FinalizedBlob> {
        let _guard = self.locks.lock(repository, id).await;
        let path = Self::path(repository, id);

        let mut data = self.scratch.get(&path).await?.unwrap_or_default();
        data.extend_from_slice(last_chunk);

        if let Err(mismatch) = expected.verify(&data) {
            tracing::warn!(actual = %mismatch.actual, "upload digest mismatch");
            return Err(mismatch.into());
        }

        self.blobs.put(repository, expected, &data).await?;
        self.scratch.delete(&path).await?;

        tracing::debug!(size = data.len(), "finalized upload");
        Ok(FinalizedBlob {
            digest: expected.clone(),
            size: data.len() as u64,
        })
    }

    /// Discard a session's data. Returns whether there was any.
    #[tracing::instrument(skip_all, fields(%repository, session = %id))]
    pub async fn abort(&self, repository: &Repository, id: SessionId) -> RegistryResult<bool> {
        let _guard = self.locks.lock(repository, id).await;
        let removed = self.scratch.remove(&Self::path(repository, id)).await?;
        tracing::debug!(removed, "aborted upload session");
        Ok(removed)
    }
}
