//! API server builder and router

use axum::Router;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, HeaderName, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{any, get};
use serde_json::json;
use storage::{MemoryStorage, Storage};
use tower_http::trace::TraceLayer;

use crate::route::{self, Endpoint};
use crate::storage::{Limits, RegistryStorage};
use crate::{blob, manifest};

/// The canonical digest of the content in a response or just stored.
pub(crate) const DOCKER_CONTENT_DIGEST: HeaderName = HeaderName::from_static("docker-content-digest");

/// The session id of an upload in progress.
pub(crate) const DOCKER_UPLOAD_UUID: HeaderName = HeaderName::from_static("docker-upload-uuid");

/// Registry builder for configuring and creating the registry service
#[derive(Debug)]
pub struct RegistryBuilder {
    storage: Option<Storage>,
    metadata_bucket: String,
    blob_bucket: String,
    limits: Limits,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilder {
    /// Create a new registry builder
    pub fn new() -> Self {
        Self {
            storage: None,
            metadata_bucket: "metadata".to_string(),
            blob_bucket: "blobs".to_string(),
            limits: Limits::default(),
        }
    }

    /// Set the storage backend. Defaults to volatile in-memory storage.
    pub fn storage(mut self, storage: Storage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Keep manifests, tags and blobs in a single bucket.
    pub fn bucket(self, bucket: impl Into<String>) -> Self {
        let bucket = bucket.into();
        self.metadata_bucket(bucket.clone()).blob_bucket(bucket)
    }

    /// Set the bucket for manifests and tags
    pub fn metadata_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.metadata_bucket = bucket.into();
        self
    }

    /// Set the bucket for blobs and upload sessions
    pub fn blob_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.blob_bucket = bucket.into();
        self
    }

    /// Set the largest manifest body accepted, in bytes
    pub fn max_manifest_size(mut self, bytes: usize) -> Self {
        self.limits.max_manifest_size = bytes;
        self
    }

    /// Set the tag page size used when a client does not ask for one
    pub fn tag_page_size(mut self, size: usize) -> Self {
        self.limits.tag_page_size = size;
        self
    }

    /// Build the registry service
    ///
    /// Returns a Router that can be served with any tower-compatible server
    pub fn build(self) -> Router {
        let storage = self
            .storage
            .unwrap_or_else(|| MemoryStorage::new().into());

        let registry_storage =
            RegistryStorage::new(&storage, &self.metadata_bucket, &self.blob_bucket)
                .with_limits(self.limits);

        tracing::debug!(
            driver = storage.name(),
            metadata = %self.metadata_bucket,
            blobs = %self.blob_bucket,
            "building registry"
        );

        Router::new()
            .route("/v2/", get(api_version_check))
            .route("/v2/{*path}", any(dispatch))
            .fallback(not_found)
            .layer(DefaultBodyLimit::disable())
            .layer(TraceLayer::new_for_http())
            .with_state(registry_storage)
    }
}

/// API version check endpoint
///
/// Returns 200 OK to indicate the registry is available
async fn api_version_check() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(json!({})))
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not found")
}

/// Route a `/v2/<name>/...` request by path tail, then by method.
async fn dispatch(
    State(storage): State<RegistryStorage>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let Some(route) = uri.path().strip_prefix("/v2/").and_then(route::recognize) else {
        return not_found().await.into_response();
    };
    let name = route.repository;

    match (method.as_str(), route.endpoint) {
        ("GET", Endpoint::TagList) => manifest::list_tags(&storage, name, &uri).await.into_response(),

        ("GET", Endpoint::Manifest(reference)) => {
            manifest::get_manifest(&storage, name, reference, false).await.into_response()
        }
        ("HEAD", Endpoint::Manifest(reference)) => {
            manifest::get_manifest(&storage, name, reference, true).await.into_response()
        }
        ("PUT", Endpoint::Manifest(reference)) => {
            manifest::put_manifest(&storage, name, reference, &headers, body).await.into_response()
        }
        ("DELETE", Endpoint::Manifest(reference)) => {
            manifest::delete_manifest(&storage, name, reference).await.into_response()
        }

        ("POST", Endpoint::UploadStart) => {
            blob::start_upload(&storage, name, &uri, body).await.into_response()
        }
        ("GET", Endpoint::Upload(id)) => blob::upload_status(&storage, name, id).await.into_response(),
        ("PATCH", Endpoint::Upload(id)) => {
            blob::patch_upload(&storage, name, id, &headers, body).await.into_response()
        }
        ("PUT", Endpoint::Upload(id)) => {
            blob::complete_upload(&storage, name, id, &uri, body).await.into_response()
        }
        ("DELETE", Endpoint::Upload(id)) => blob::cancel_upload(&storage, name, id).await.into_response(),

        ("GET", Endpoint::Blob(digest)) => blob::get_blob(&storage, name, digest, false).await.into_response(),
        ("HEAD", Endpoint::Blob(digest)) => blob::get_blob(&storage, name, digest, true).await.into_response(),
        ("PUT", Endpoint::Blob(digest)) => blob::put_blob(&storage, name, digest, body).await.into_response(),
        ("DELETE", Endpoint::Blob(digest)) => blob::delete_blob(&storage, name, digest).await.into_response(),

        _ => not_found().await.into_response(),
    }
}
