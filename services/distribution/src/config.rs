//! Configuration file for `distribution-server`
//!
//! ```toml
//! listen = "0.0.0.0:5000"
//! metadata-bucket = "metadata"
//! blob-bucket = "blobs"
//! max-manifest-size = 10485760
//! tag-page-size = 100
//!
//! [storage.local]
//! path = "/var/lib/distribution"
//!
//! [log]
//! filter = "info,distribution=debug"
//! format = "json"
//! ```

use std::net::{Ipv4Addr, SocketAddr};

use camino::{Utf8Path, Utf8PathBuf};
use distribution::{DEFAULT_MAX_MANIFEST_SIZE, DEFAULT_TAG_PAGE_SIZE, RegistryBuilder};
use serde::Deserialize;
use storage::{Storage, StorageConfig};

/// Errors loading the configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("reading {path}")]
    Read {
        /// The configuration file.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid configuration.
    #[error("parsing configuration")]
    Parse(#[from] toml_edit::de::Error),
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    /// Address to serve the registry on.
    pub listen: SocketAddr,
    /// Bucket for manifests and tags.
    pub metadata_bucket: String,
    /// Bucket for blobs and upload sessions.
    pub blob_bucket: String,
    /// Largest manifest body accepted, in bytes.
    pub max_manifest_size: usize,
    /// Tag page size when a client does not ask for one.
    pub tag_page_size: usize,
    /// Storage backend.
    pub storage: StorageConfig,
    /// Logging.
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::LOCALHOST, 5000)),
            metadata_bucket: "metadata".into(),
            blob_bucket: "blobs".into(),
            max_manifest_size: DEFAULT_MAX_MANIFEST_SIZE,
            tag_page_size: DEFAULT_TAG_PAGE_SIZE,
            storage: StorageConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Read and parse a configuration file.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        contents.parse()
    }

    /// A registry builder carrying these settings.
    pub fn registry(&self, storage: Storage) -> RegistryBuilder {
        RegistryBuilder::new()
            .storage(storage)
            .metadata_bucket(&self.metadata_bucket)
            .blob_bucket(&self.blob_bucket)
            .max_manifest_size(self.max_manifest_size)
            .tag_page_size(self.tag_page_size)
    }
}

impl std::str::FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(toml_edit::de::from_str(s)?)
    }
}

/// `[log]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct LogConfig {
    /// Directive for `tracing_subscriber::EnvFilter`. `RUST_LOG` takes precedence.
    pub filter: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".into(),
            format: LogFormat::default(),
        }
    }
}

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    /// Multi-line, human oriented.
    Pretty,
    /// One line per event.
    #[default]
    Compact,
    /// Newline-delimited JSON.
    Json,
}
