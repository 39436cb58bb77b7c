//! Error types for the registry

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use storage::StorageError;

use crate::digest::{Digest, DigestMismatch, InvalidDigest};
use crate::name::{InvalidName, InvalidReference};

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Error types for registry operations
///
/// Every variant except [`RegistryError::Storage`] is an expected outcome that
/// maps onto a protocol error code. Storage failures are backend faults and
/// surface as `500`.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Blob not found
    #[error("blob unknown to registry: {0}")]
    BlobUnknown(Digest),

    /// Upload session id is not one this registry could have issued
    #[error("blob upload unknown: {0}")]
    UploadUnknown(String),

    /// Upload request was malformed
    #[error("blob upload invalid: {0}")]
    UploadInvalid(String),

    /// Chunk does not start at the end of the data received so far
    #[error("chunk starts at offset {offset}, expected {expected}")]
    RangeNotSatisfiable {
        /// The current length of the upload.
        expected: u64,
        /// The offset the client claimed.
        offset: u64,
    },

    /// Manifest not found, by digest or by tag
    #[error("manifest unknown: {0}")]
    ManifestUnknown(String),

    /// Manifest failed validation
    #[error("manifest invalid: {0}")]
    ManifestInvalid(String),

    /// Manifest body exceeds the configured ceiling
    #[error("manifest too large: limit is {limit} bytes")]
    ManifestTooLarge {
        /// The ceiling in bytes.
        limit: usize,
    },

    /// Image manifest references a blob the repository does not have
    #[error("manifest blob {0} unknown")]
    ManifestBlobUnknown(Digest),

    /// Digest was missing or malformed
    #[error("invalid digest: {0}")]
    DigestInvalid(String),

    /// Content did not hash to the claimed digest
    #[error(transparent)]
    DigestMismatch(#[from] DigestMismatch),

    /// Repository name or tag is malformed
    #[error("name is malformed: {0}")]
    NameInvalid(String),

    /// Tag list `n` parameter is not a number
    #[error("invalid number of results requested: {0}")]
    PaginationInvalid(String),

    /// Storage error
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl RegistryError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            RegistryError::BlobUnknown(_)
            | RegistryError::UploadUnknown(_)
            | RegistryError::ManifestUnknown(_)
            | RegistryError::ManifestInvalid(_) => StatusCode::NOT_FOUND,
            RegistryError::ManifestTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            RegistryError::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            RegistryError::UploadInvalid(_)
            | RegistryError::ManifestBlobUnknown(_)
            | RegistryError::DigestInvalid(_)
            | RegistryError::DigestMismatch(_)
            | RegistryError::NameInvalid(_)
            | RegistryError::PaginationInvalid(_) => StatusCode::BAD_REQUEST,
            RegistryError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for OCI error responses
    pub fn error_code(&self) -> &'static str {
        match self {
            RegistryError::BlobUnknown(_) => "BLOB_UNKNOWN",
            RegistryError::UploadUnknown(_) => "BLOB_UPLOAD_UNKNOWN",
            RegistryError::UploadInvalid(_) | RegistryError::RangeNotSatisfiable { .. } => {
                "BLOB_UPLOAD_INVALID"
            }
            RegistryError::ManifestUnknown(_) => "MANIFEST_UNKNOWN",
            RegistryError::ManifestInvalid(_) | RegistryError::ManifestTooLarge { .. } => {
                "MANIFEST_INVALID"
            }
            RegistryError::ManifestBlobUnknown(_) => "MANIFEST_BLOB_UNKNOWN",
            RegistryError::DigestInvalid(_) | RegistryError::DigestMismatch(_) => "DIGEST_INVALID",
            RegistryError::NameInvalid(_) => "NAME_INVALID",
            RegistryError::PaginationInvalid(_) => "PAGINATION_NUMBER_INVALID",
            RegistryError::Storage(_) => "UNKNOWN",
        }
    }
}

impl From<InvalidDigest> for RegistryError {
    fn from(err: InvalidDigest) -> Self {
        RegistryError::DigestInvalid(err.0)
    }
}

impl From<InvalidName> for RegistryError {
    fn from(err: InvalidName) -> Self {
        RegistryError::NameInvalid(err.0)
    }
}

impl From<InvalidReference> for RegistryError {
    fn from(err: InvalidReference) -> Self {
        match err {
            InvalidReference::Digest(err) => err.into(),
            InvalidReference::Name(err) => err.into(),
        }
    }
}

/// OCI error response format
#[derive(Debug, serde::Serialize)]
struct ErrorResponse {
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, serde::Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        if let RegistryError::Storage(err) = &self {
            tracing::error!(
                engine = err.engine(),
                retryable = err.is_retryable(),
                "storage failure: {err}"
            );
        } else {
            tracing::debug!(%status, code, "{self}");
        }

        let body = ErrorResponse {
            errors: vec![ErrorDetail {
                code,
                message: self.to_string(),
            }],
        };

        (status, axum::Json(body)).into_response()
    }
}
