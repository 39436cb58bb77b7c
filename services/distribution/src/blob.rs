//! Blob and upload operations for the registry

use axum::body::Body;
use axum::extract::Query;
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Deserialize;

use crate::api::{DOCKER_CONTENT_DIGEST, DOCKER_UPLOAD_UUID};
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::name::Repository;
use crate::storage::RegistryStorage;
use crate::upload::SessionId;

#[derive(Debug, Deserialize)]
struct DigestQuery {
    digest: Option<String>,
}

impl DigestQuery {
    fn from_uri(uri: &Uri) -> RegistryResult<Option<Digest>> {
        let Query(query) = Query::<DigestQuery>::try_from_uri(uri)
            .map_err(|rejection| RegistryError::DigestInvalid(rejection.body_text()))?;
        Ok(query.digest.map(|d| d.parse::<Digest>()).transpose()?)
    }
}

async fn read_body(body: Body) -> RegistryResult<Bytes> {
    axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|err| RegistryError::UploadInvalid(format!("failed to read request body: {err}")))
}

/// `Range` header value for `length` bytes received.
fn range(length: u64) -> String {
    format!("0-{}", length.saturating_sub(1))
}

/// Response for a blob that is now stored.
fn created(repository: &Repository, digest: &Digest) -> Response {
    (
        StatusCode::CREATED,
        [
            (header::LOCATION, format!("/v2/{repository}/blobs/{digest}")),
            (DOCKER_CONTENT_DIGEST, digest.to_string()),
            (header::CONTENT_LENGTH, "0".to_string()),
        ],
    )
        .into_response()
}

/// Response describing an upload session in progress.
fn session(status: StatusCode, repository: &Repository, id: SessionId, length: u64) -> Response {
    (
        status,
        [
            (header::LOCATION, format!("/v2/{repository}/blobs/uploads/{id}")),
            (header::RANGE, range(length)),
            (DOCKER_UPLOAD_UUID, id.to_string()),
        ],
    )
        .into_response()
}

/// Get a blob, or just its headers for `HEAD`
pub(crate) async fn get_blob(
    storage: &RegistryStorage,
    name: &str,
    digest: &str,
    head: bool,
) -> RegistryResult<Response> {
    let repository: Repository = name.parse()?;
    let digest: Digest = digest.parse()?;

    let data = storage.get_blob(&repository, &digest).await?;
    let headers = [
        (header::CONTENT_TYPE, "application/octet-stream".to_string()),
        (DOCKER_CONTENT_DIGEST, digest.to_string()),
        (header::CONTENT_LENGTH, data.len().to_string()),
    ];

    let body = if head { Body::empty() } else { Body::from(data) };
    Ok((StatusCode::OK, headers, body).into_response())
}

/// Put a whole blob by digest
pub(crate) async fn put_blob(
    storage: &RegistryStorage,
    name: &str,
    digest: &str,
    body: Body,
) -> RegistryResult<Response> {
    let repository: Repository = name.parse()?;
    let digest: Digest = digest.parse()?;

    let data = read_body(body).await?;
    storage.put_blob(&repository, &digest, &data).await?;

    Ok(created(&repository, &digest))
}

/// Delete a blob
pub(crate) async fn delete_blob(
    storage: &RegistryStorage,
    name: &str,
    digest: &str,
) -> RegistryResult<StatusCode> {
    let repository: Repository = name.parse()?;
    let digest: Digest = digest.parse()?;

    storage.delete_blob(&repository, &digest).await?;
    Ok(StatusCode::ACCEPTED)
}

/// Start a blob upload session
///
/// With a `digest` query parameter the request body is the whole blob and
/// no session is created.
pub(crate) async fn start_upload(
    storage: &RegistryStorage,
    name: &str,
    uri: &Uri,
    body: Body,
) -> RegistryResult<Response> {
    let repository: Repository = name.parse()?;

    if let Some(digest) = DigestQuery::from_uri(uri)? {
        let data = read_body(body).await?;
        storage.put_blob(&repository, &digest, &data).await?;
        return Ok(created(&repository, &digest));
    }

    let id = storage.uploads().create(&repository);
    Ok(session(StatusCode::ACCEPTED, &repository, id, 0))
}

/// The start offset of a `Content-Range: <start>-<end>` header.
fn content_range_start(headers: &HeaderMap) -> RegistryResult<Option<u64>> {
    let Some(value) = headers.get(header::CONTENT_RANGE) else {
        return Ok(None);
    };

    let invalid = || RegistryError::UploadInvalid("malformed Content-Range".into());
    let value = value.to_str().map_err(|_| invalid())?;
    let value = value.trim_start_matches("bytes").trim_start_matches(['=', ' ']);
    let (start, _end) = value.split_once('-').ok_or_else(invalid)?;
    start.trim().parse().map(Some).map_err(|_| invalid())
}

/// Append a chunk to an upload session
pub(crate) async fn patch_upload(
    storage: &RegistryStorage,
    name: &str,
    id: &str,
    headers: &HeaderMap,
    body: Body,
) -> RegistryResult<Response> {
    let repository: Repository = name.parse()?;
    let id: SessionId = id.parse()?;
    let offset = content_range_start(headers)?;

    let chunk = read_body(body).await?;
    let uploads = storage.uploads();
    let length = match offset {
        Some(offset) => uploads.append_at(&repository, id, &chunk, offset).await?,
        None => uploads.append(&repository, id, &chunk).await?,
    };

    Ok(session(StatusCode::ACCEPTED, &repository, id, length))
}

/// Complete a blob upload
pub(crate) async fn complete_upload(
    storage: &RegistryStorage,
    name: &str,
    id: &str,
    uri: &Uri,
    body: Body,
) -> RegistryResult<Response> {
    let repository: Repository = name.parse()?;
    let id: SessionId = id.parse()?;
    let digest = DigestQuery::from_uri(uri)?
        .ok_or_else(|| RegistryError::DigestInvalid("digest query parameter is required".into()))?;

    let chunk = read_body(body).await?;
    let blob = storage
        .uploads()
        .finalize(&repository, id, &chunk, &digest)
        .await?;

    Ok(created(&repository, &blob.digest))
}

/// Report how much of an upload has been received
pub(crate) async fn upload_status(
    storage: &RegistryStorage,
    name: &str,
    id: &str,
) -> RegistryResult<Response> {
    let repository: Repository = name.parse()?;
    let id: SessionId = id.parse()?;

    let length = storage.uploads().status(&repository, id).await?;
    Ok(session(StatusCode::NO_CONTENT, &repository, id, length))
}

/// Cancel a blob upload
pub(crate) async fn cancel_upload(
    storage: &RegistryStorage,
    name: &str,
    id: &str,
) -> RegistryResult<StatusCode> {
    let repository: Repository = name.parse()?;
    let id: SessionId = id.parse()?;

    storage.uploads().abort(&repository, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn ranges() {
        assert_eq!(range(0), "0-0");
        assert_eq!(range(1), "0-0");
        assert_eq!(range(1024), "0-1023");
    }

    #[test]
    fn content_range() {
        let mut headers = HeaderMap::new();
        assert_eq!(content_range_start(&headers).unwrap(), None);

        for (value, start) in [("0-1023", 0), ("1024-2047", 1024), ("bytes=10-19", 10), ("bytes 5-9/10", 5)] {
            headers.insert(header::CONTENT_RANGE, HeaderValue::from_static(value));
            assert_eq!(content_range_start(&headers).unwrap(), Some(start), "{value}");
        }

        headers.insert(header::CONTENT_RANGE, HeaderValue::from_static("garbage"));
        assert_eq!(
            content_range_start(&headers).unwrap_err().error_code(),
            "BLOB_UPLOAD_INVALID"
        );
    }
}
