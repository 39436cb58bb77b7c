//! # Storage backends
//!
//! Configuration and unification for the storage backends, plus the
//! byte-oriented [`StorageBucket`] handle used by the registry.

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use tokio::io;

pub(crate) mod local;
pub(crate) mod memory;

#[doc(inline)]
pub use local::LocalDriver;

#[doc(inline)]
pub use memory::MemoryStorage;

#[doc(inline)]
pub use storage_driver::{Driver, Metadata, StorageError, StorageErrorKind};

/// Which backend to build, as read from configuration.
///
/// ```toml
/// [storage.local]
/// path = "/var/lib/distribution"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageConfig {
    /// Volatile in-process storage.
    Memory {
        /// Buckets to create up front. Buckets are also created on first write.
        #[serde(default)]
        buckets: Vec<String>,
    },

    /// Files on the local filesystem.
    Local {
        /// Root directory; each bucket is a subdirectory.
        path: Utf8PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory {
            buckets: Vec::new(),
        }
    }
}

impl StorageConfig {
    /// Construct the configured backend.
    #[tracing::instrument]
    pub async fn build(self) -> Result<Storage, StorageError> {
        let client: Storage = match self {
            StorageConfig::Memory { buckets } => {
                let names: Vec<&str> = buckets.iter().map(String::as_str).collect();
                MemoryStorage::with_buckets(&names).into()
            }
            StorageConfig::Local { path } => {
                tokio::fs::create_dir_all(&path)
                    .await
                    .map_err(|err| StorageError::io("local", err))?;
                LocalDriver::new(path).into()
            }
        };
        Ok(client)
    }
}

pub(crate) type ArcDriver = Arc<dyn Driver + Send + Sync>;

/// A cloneable handle to a storage driver.
#[derive(Debug, Clone)]
pub struct Storage {
    driver: ArcDriver,
}

impl<D> From<D> for Storage
where
    D: Driver + Send + Sync + 'static,
{
    fn from(value: D) -> Self {
        Storage::new(value)
    }
}

impl Storage {
    /// Wrap a driver.
    pub fn new<D: Driver + Send + Sync + 'static>(driver: D) -> Self {
        Self {
            driver: Arc::new(driver),
        }
    }

    /// The name of the underlying driver.
    pub fn name(&self) -> &str {
        self.driver.name()
    }

    /// A handle bound to a single bucket.
    pub fn bucket<S: Into<String>>(&self, bucket: S) -> StorageBucket {
        StorageBucket {
            driver: self.driver.clone(),
            bucket: bucket.into(),
        }
    }
}

/// A storage handle bound to one bucket.
///
/// On top of the streaming [`Driver`] calls this exposes whole-object
/// operations where a missing key is an ordinary value (`None`, `false`)
/// rather than an error. Only genuine backend failures are returned as
/// [`StorageError`].
#[derive(Debug, Clone)]
pub struct StorageBucket {
    /// The bucket name.
    pub bucket: String,
    driver: ArcDriver,
}

impl StorageBucket {
    /// Object metadata, or `None` when the key is absent.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name(), bucket=self.bucket))]
    pub async fn metadata(&self, remote: &Utf8Path) -> Result<Option<Metadata>, StorageError> {
        absent_as_none(self.driver.metadata(&self.bucket, remote).await)
    }

    /// Whether an object exists under `remote`.
    pub async fn exists(&self, remote: &Utf8Path) -> Result<bool, StorageError> {
        Ok(self.metadata(remote).await?.is_some())
    }

    /// Stream an object into `writer`.
    #[tracing::instrument(skip(self, writer), fields(driver=self.driver.name(), bucket=self.bucket))]
    pub async fn download<'d, W>(
        &'d self,
        remote: &Utf8Path,
        writer: &mut W,
    ) -> Result<(), StorageError>
    where
        W: io::AsyncWrite + Unpin + Send + Sync + 'd,
    {
        tracing::trace!(%remote, "Downloading from: {}/{remote}", self.bucket);
        self.driver.download(&self.bucket, remote, writer).await?;
        Ok(())
    }

    /// Stream an object from `reader`, replacing any existing object.
    #[tracing::instrument(skip(self, reader), fields(driver=self.driver.name(), bucket=self.bucket))]
    pub async fn upload<'d, R>(
        &'d self,
        remote: &Utf8Path,
        reader: &mut R,
    ) -> Result<(), StorageError>
    where
        R: io::AsyncBufRead + Unpin + Send + Sync + 'd,
    {
        tracing::trace!(%remote, "Uploading to: {}/{remote}", self.bucket);
        self.driver.upload(&self.bucket, remote, reader).await?;
        Ok(())
    }

    /// Fetch a whole object, or `None` when the key is absent.
    pub async fn get(&self, remote: &Utf8Path) -> Result<Option<Vec<u8>>, StorageError> {
        let mut data = Vec::new();
        match self.download(remote, &mut data).await {
            Ok(()) => Ok(Some(data)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Store a whole object, replacing any existing object.
    pub async fn put(&self, remote: &Utf8Path, data: &[u8]) -> Result<(), StorageError> {
        let mut reader = data;
        self.upload(remote, &mut reader).await
    }

    /// Remove an object, reporting whether it was present.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name(), bucket=self.bucket))]
    pub async fn remove(&self, remote: &Utf8Path) -> Result<bool, StorageError> {
        match self.driver.delete(&self.bucket, remote).await {
            Ok(()) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Remove an object. Removing an absent key succeeds.
    pub async fn delete(&self, remote: &Utf8Path) -> Result<(), StorageError> {
        self.remove(remote).await.map(|_| ())
    }

    /// All keys beginning with `prefix`.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name(), bucket=self.bucket))]
    pub async fn list(&self, prefix: Option<&Utf8Path>) -> Result<Vec<String>, StorageError> {
        absent_as_empty(self.driver.list(&self.bucket, prefix).await)
    }

    /// At most `limit` keys beginning with `prefix`, ascending, strictly after `after`.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name(), bucket=self.bucket))]
    pub async fn list_after(
        &self,
        prefix: &Utf8Path,
        after: Option<&Utf8Path>,
        limit: usize,
    ) -> Result<Vec<String>, StorageError> {
        absent_as_empty(
            self.driver
                .list_after(&self.bucket, prefix, after, limit)
                .await,
        )
    }
}

fn absent_as_none<T>(result: Result<T, StorageError>) -> Result<Option<T>, StorageError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

fn absent_as_empty(result: Result<Vec<String>, StorageError>) -> Result<Vec<String>, StorageError> {
    absent_as_none(result).map(Option::unwrap_or_default)
}
