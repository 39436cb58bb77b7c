//! # Container image registry
//!
//! The storage and validation core of a registry speaking the
//! [OCI Distribution Specification](https://github.com/opencontainers/distribution-spec),
//! plus the HTTP routes that expose it.
//!
//! ## Components
//!
//! - [`Digest`]: canonical `sha256:` content digests
//! - [`BlobStore`]: immutable blobs keyed by repository and digest
//! - [`UploadSessions`]: resumable chunked uploads, serialized per session
//! - [`ManifestValidator`]: media type, schema and blob reference checks
//! - [`ManifestStore`]: manifest bodies, re-verified on every read
//! - [`TagRegistry`]: mutable tag pointers with paginated listing
//!
//! All of them take their storage handles at construction, so independent
//! instances can run side by side.
//!
//! ## Example
//!
//! ```no_run
//! use distribution::RegistryBuilder;
//! use storage::MemoryStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = MemoryStorage::with_buckets(&["metadata", "blobs"]);
//! let registry = RegistryBuilder::new()
//!     .storage(storage.into())
//!     .metadata_bucket("metadata")
//!     .blob_bucket("blobs")
//!     .build();
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:5000").await?;
//! axum::serve(listener, registry).await?;
//! # Ok(())
//! # }
//! ```

mod api;
mod blob;
pub mod cas;
pub mod digest;
mod error;
mod manifest;
pub mod manifests;
pub mod name;
mod route;
pub mod schema;
mod storage;
pub mod tags;
pub mod upload;
pub mod validate;

pub use api::RegistryBuilder;
pub use cas::BlobStore;
pub use digest::{Digest, DigestMismatch, InvalidDigest};
pub use error::{RegistryError, RegistryResult};
pub use manifests::ManifestStore;
pub use name::{Reference, Repository, Tag};
pub use crate::storage::{DEFAULT_MAX_MANIFEST_SIZE, DEFAULT_TAG_PAGE_SIZE, Limits, RegistryStorage};
pub use tags::{TagPage, TagRegistry};
pub use upload::{FinalizedBlob, SessionId, UploadSessions};
pub use validate::{ManifestValidator, ValidationError};
