//! Manifest and tag operations for the registry

use axum::Json;
use axum::body::Body;
use axum::extract::Query;
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::{AppendHeaders, IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::api::DOCKER_CONTENT_DIGEST;
use crate::error::{RegistryError, RegistryResult};
use crate::name::{Reference, Repository};
use crate::schema;
use crate::storage::RegistryStorage;

/// Get a manifest, or just its headers for `HEAD`
pub(crate) async fn get_manifest(
    storage: &RegistryStorage,
    name: &str,
    reference: &str,
    head: bool,
) -> RegistryResult<Response> {
    let repository: Repository = name.parse()?;
    let reference: Reference = reference.parse()?;

    let (digest, data) = storage.get_manifest(&repository, &reference).await?;
    let headers = [
        (header::CONTENT_TYPE, schema::media_type_of(&data)),
        (DOCKER_CONTENT_DIGEST, digest.to_string()),
        (header::CONTENT_LENGTH, data.len().to_string()),
    ];

    let body = if head { Body::empty() } else { Body::from(data) };
    Ok((StatusCode::OK, headers, body).into_response())
}

/// Put a manifest
pub(crate) async fn put_manifest(
    storage: &RegistryStorage,
    name: &str,
    reference: &str,
    headers: &HeaderMap,
    body: Body,
) -> RegistryResult<Response> {
    let repository: Repository = name.parse()?;
    let reference: Reference = reference.parse()?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| RegistryError::ManifestInvalid("Content-Type is required".into()))?;

    let length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|length| *length > 0)
        .ok_or_else(|| RegistryError::ManifestInvalid("Content-Length is required".into()))?;

    let limit = storage.limits().max_manifest_size;
    if length > limit as u64 {
        return Err(RegistryError::ManifestTooLarge { limit });
    }

    // A body longer than its Content-Length still stops at the ceiling.
    let body = axum::body::to_bytes(body, limit)
        .await
        .map_err(|_| RegistryError::ManifestTooLarge { limit })?;

    let digest = storage
        .put_manifest(&repository, &reference, content_type, &body)
        .await?;

    let location = format!("/v2/{repository}/manifests/{digest}");

    Ok((
        StatusCode::CREATED,
        [
            (header::LOCATION, location),
            (DOCKER_CONTENT_DIGEST, digest.to_string()),
        ],
    )
        .into_response())
}

/// Delete a manifest by digest, or a tag
pub(crate) async fn delete_manifest(
    storage: &RegistryStorage,
    name: &str,
    reference: &str,
) -> RegistryResult<StatusCode> {
    let repository: Repository = name.parse()?;
    let reference: Reference = reference.parse()?;

    storage.delete_manifest(&repository, &reference).await?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Deserialize)]
struct TagQuery {
    n: Option<String>,
    last: Option<String>,
}

/// Tag list response
#[derive(Debug, Serialize)]
struct TagList {
    name: String,
    tags: Vec<String>,
}

/// List tags for a repository, one page at a time
pub(crate) async fn list_tags(
    storage: &RegistryStorage,
    name: &str,
    uri: &Uri,
) -> RegistryResult<Response> {
    let repository: Repository = name.parse()?;

    let Query(query) = Query::<TagQuery>::try_from_uri(uri)
        .map_err(|rejection| RegistryError::PaginationInvalid(rejection.body_text()))?;

    let limit = match query.n {
        Some(n) => n
            .parse::<usize>()
            .map_err(|_| RegistryError::PaginationInvalid(n))?,
        None => storage.limits().tag_page_size,
    };

    let page = storage
        .list_tags(&repository, limit, query.last.as_deref())
        .await?;

    // Tag and repository grammars only allow URL-safe characters.
    let link = page.next.map(|last| {
        (
            header::LINK,
            format!("</v2/{repository}/tags/list?n={limit}&last={last}>; rel=\"next\""),
        )
    });

    Ok((
        AppendHeaders(link),
        Json(TagList {
            name: repository.to_string(),
            tags: page.tags,
        }),
    )
        .into_response())
}
