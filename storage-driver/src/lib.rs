//! The backing-store contract shared by every storage backend.
//!
//! A [`Driver`] moves whole objects in and out of named buckets and lists keys
//! by prefix. Failures carry a [`StorageErrorKind`] so callers can tell an
//! absent object apart from a broken backend.

mod driver;
mod error;

pub use driver::Driver;
pub use driver::Metadata;
pub use driver::Reader;
pub use driver::Writer;
pub use error::{StorageError, StorageErrorBuilder, StorageErrorKind};
