//! Integration tests for the registry HTTP surface

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode, header};
use bytes::Bytes;
use distribution::{Digest, RegistryBuilder};
use serde_json::{Value, json};
use storage::MemoryStorage;
use tower::ServiceExt;

const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Helper to create a test registry
fn test_registry() -> Router {
    let storage = MemoryStorage::with_buckets(&["metadata", "blobs"]);
    RegistryBuilder::new()
        .storage(storage.into())
        .metadata_bucket("metadata")
        .blob_bucket("blobs")
        .build()
}

async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

fn request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn with_body(method: &str, uri: &str, body: impl Into<Bytes>) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::from(body.into()))
        .unwrap()
}

fn manifest_put(uri: &str, media_type: &str, body: &[u8]) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(uri)
        .header(header::CONTENT_TYPE, media_type)
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body.to_vec()))
        .unwrap()
}

async fn body(response: Response<Body>) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

async fn error_code(response: Response<Body>) -> String {
    let body: Value = serde_json::from_slice(&body(response).await).unwrap();
    body["errors"][0]["code"].as_str().unwrap().to_string()
}

fn header<'r>(response: &'r Response<Body>, name: &str) -> &'r str {
    response
        .headers()
        .get(name)
        .unwrap_or_else(|| panic!("missing {name} header"))
        .to_str()
        .unwrap()
}

/// Push a blob through a single-request upload.
async fn push_blob(app: &Router, repo: &str, data: &[u8]) -> Digest {
    let digest = Digest::compute(data);
    let response = send(
        app,
        with_body("PUT", &format!("/v2/{repo}/blobs/{digest}"), data.to_vec()),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    digest
}

fn image_manifest(config: &Digest, layers: &[&Digest]) -> Vec<u8> {
    let layers: Vec<Value> = layers
        .iter()
        .map(|d| json!({ "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip", "digest": d, "size": 1 }))
        .collect();
    serde_json::to_vec(&json!({
        "schemaVersion": 2,
        "mediaType": OCI_MANIFEST,
        "config": { "mediaType": "application/vnd.oci.image.config.v1+json", "digest": config, "size": 1 },
        "layers": layers,
    }))
    .unwrap()
}

#[tokio::test]
async fn test_api_version_check() {
    let app = test_registry();

    let response = send(&app, request("GET", "/v2/")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(&body(response).await[..], b"{}");
}

#[tokio::test]
async fn test_blob_upload_and_download() {
    let app = test_registry();
    let data = b"Hello, OCI Registry!";
    let digest = Digest::compute(data);

    let response = send(&app, request("POST", "/v2/app/blobs/uploads/")).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(header(&response, "range"), "0-0");
    let location = header(&response, "location").to_string();
    let uuid = header(&response, "docker-upload-uuid").to_string();
    assert_eq!(location, format!("/v2/app/blobs/uploads/{uuid}"));

    let response = send(
        &app,
        with_body("PUT", &format!("{location}?digest={digest}"), data.to_vec()),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(header(&response, "location"), format!("/v2/app/blobs/{digest}"));
    assert_eq!(header(&response, "docker-content-digest"), digest.to_string());

    let response = send(&app, request("GET", &format!("/v2/app/blobs/{digest}"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "docker-content-digest"), digest.to_string());
    assert_eq!(&body(response).await[..], data);

    let response = send(&app, request("HEAD", &format!("/v2/app/blobs/{digest}"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "content-length"), data.len().to_string());
    assert!(body(response).await.is_empty());
}

#[tokio::test]
async fn test_chunked_upload() {
    let app = test_registry();
    let chunks: [&[u8]; 3] = [b"first ", b"second ", b"third"];
    let whole = chunks.concat();
    let digest = Digest::compute(&whole);

    let response = send(&app, request("POST", "/v2/library/nginx/blobs/uploads/")).await;
    let location = header(&response, "location").to_string();

    let mut offset = 0;
    for chunk in chunks {
        let response = send(
            &app,
            Request::builder()
                .method("PATCH")
                .uri(&location)
                .header(header::CONTENT_RANGE, format!("{}-{}", offset, offset + chunk.len() - 1))
                .body(Body::from(chunk.to_vec()))
                .unwrap(),
        )
        .await;
        offset += chunk.len();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(header(&response, "range"), format!("0-{}", offset - 1));
    }

    let response = send(&app, request("GET", &location)).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(header(&response, "range"), format!("0-{}", whole.len() - 1));

    // A wrong digest leaves the session usable.
    let wrong = Digest::compute(b"something else");
    let response = send(&app, request("PUT", &format!("{location}?digest={wrong}"))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "DIGEST_INVALID");

    let response = send(&app, request("PUT", &format!("{location}?digest={digest}"))).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = send(&app, request("GET", &format!("/v2/library/nginx/blobs/{digest}"))).await;
    assert_eq!(&body(response).await[..], &whole[..]);
}

#[tokio::test]
async fn test_upload_errors() {
    let app = test_registry();

    let response = send(&app, request("POST", "/v2/app/blobs/uploads/")).await;
    let location = header(&response, "location").to_string();

    let response = send(
        &app,
        Request::builder()
            .method("PATCH")
            .uri(&location)
            .header(header::CONTENT_RANGE, "10-19")
            .body(Body::from("0123456789"))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(error_code(response).await, "BLOB_UPLOAD_INVALID");

    let response = send(&app, with_body("PUT", &location, "data")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "DIGEST_INVALID");

    let response = send(&app, request("PATCH", "/v2/app/blobs/uploads/not-a-session")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(response).await, "BLOB_UPLOAD_UNKNOWN");

    let response = send(&app, request("DELETE", &location)).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_monolithic_post() {
    let app = test_registry();
    let data = b"all at once";
    let digest = Digest::compute(data);

    let response = send(
        &app,
        with_body("POST", &format!("/v2/app/blobs/uploads/?digest={digest}"), data.to_vec()),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(header(&response, "location"), format!("/v2/app/blobs/{digest}"));

    let response = send(&app, request("HEAD", &format!("/v2/app/blobs/{digest}"))).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_blob_put_verifies_and_delete() {
    let app = test_registry();
    let wrong = Digest::compute(b"not this");

    let response = send(&app, with_body("PUT", &format!("/v2/app/blobs/{wrong}"), "data")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "DIGEST_INVALID");

    let response = send(&app, request("GET", "/v2/app/blobs/sha256:nope")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "DIGEST_INVALID");

    let digest = push_blob(&app, "app", b"data").await;
    let response = send(&app, request("DELETE", &format!("/v2/app/blobs/{digest}"))).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = send(&app, request("DELETE", &format!("/v2/app/blobs/{digest}"))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(response).await, "BLOB_UNKNOWN");

    let response = send(&app, request("GET", &format!("/v2/app/blobs/{digest}"))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(response).await, "BLOB_UNKNOWN");
}

#[tokio::test]
async fn test_manifest_requires_referenced_blobs() {
    let app = test_registry();
    let config = Digest::compute(b"{}");
    let layer = Digest::compute(b"layer");
    let manifest = image_manifest(&config, &[&layer]);

    let response = send(&app, manifest_put("/v2/app/manifests/latest", OCI_MANIFEST, &manifest)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let message: Value = serde_json::from_slice(&body(response).await).unwrap();
    assert_eq!(message["errors"][0]["code"], "MANIFEST_BLOB_UNKNOWN");
    assert!(
        message["errors"][0]["message"]
            .as_str()
            .unwrap()
            .contains(&config.to_string())
    );

    push_blob(&app, "app", b"{}").await;
    push_blob(&app, "app", b"layer").await;

    let response = send(&app, manifest_put("/v2/app/manifests/latest", OCI_MANIFEST, &manifest)).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let digest = Digest::compute(&manifest);
    assert_eq!(header(&response, "docker-content-digest"), digest.to_string());
    assert_eq!(header(&response, "location"), format!("/v2/app/manifests/{digest}"));

    for reference in ["latest".to_string(), digest.to_string()] {
        let response = send(&app, request("GET", &format!("/v2/app/manifests/{reference}"))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, "content-type"), OCI_MANIFEST);
        assert_eq!(header(&response, "docker-content-digest"), digest.to_string());
        assert_eq!(&body(response).await[..], &manifest[..]);
    }

    let response = send(&app, request("HEAD", "/v2/app/manifests/latest")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "content-length"), manifest.len().to_string());
    assert!(body(response).await.is_empty());
}

#[tokio::test]
async fn test_manifest_put_by_digest() {
    let app = test_registry();
    let index = serde_json::to_vec(&json!({
        "schemaVersion": 2,
        "mediaType": OCI_INDEX,
        "manifests": [{ "mediaType": OCI_MANIFEST, "digest": Digest::compute(b"later"), "size": 5 }],
    }))
    .unwrap();
    let digest = Digest::compute(&index);

    let wrong = Digest::compute(b"wrong");
    let response = send(&app, manifest_put(&format!("/v2/app/manifests/{wrong}"), OCI_INDEX, &index)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "DIGEST_INVALID");

    // Index manifests may reference manifests that are not pushed yet.
    let response = send(&app, manifest_put(&format!("/v2/app/manifests/{digest}"), OCI_INDEX, &index)).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = send(&app, request("GET", &format!("/v2/app/manifests/{digest}"))).await;
    assert_eq!(header(&response, "content-type"), OCI_INDEX);
}

#[tokio::test]
async fn test_manifest_put_rejections() {
    let app = test_registry();
    let config = push_blob(&app, "app", b"{}").await;
    let manifest = image_manifest(&config, &[]);

    // Declared type differs from the document's own mediaType.
    let response = send(
        &app,
        manifest_put(
            "/v2/app/manifests/latest",
            "application/vnd.docker.distribution.manifest.v2+json",
            &manifest,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(response).await, "MANIFEST_INVALID");

    let response = send(
        &app,
        Request::builder()
            .method("PUT")
            .uri("/v2/app/manifests/latest")
            .header(header::CONTENT_LENGTH, manifest.len())
            .body(Body::from(manifest.clone()))
            .unwrap(),
    )
    .await;
    assert_eq!(error_code(response).await, "MANIFEST_INVALID");

    let response = send(
        &app,
        Request::builder()
            .method("PUT")
            .uri("/v2/app/manifests/latest")
            .header(header::CONTENT_TYPE, OCI_MANIFEST)
            .body(Body::from(manifest.clone()))
            .unwrap(),
    )
    .await;
    assert_eq!(error_code(response).await, "MANIFEST_INVALID");

    let response = send(&app, manifest_put("/v2/app/manifests/latest", "text/plain", &manifest)).await;
    assert_eq!(error_code(response).await, "MANIFEST_INVALID");

    let response = send(&app, manifest_put("/v2/app/manifests/latest", OCI_MANIFEST, b"{oops")).await;
    assert_eq!(error_code(response).await, "MANIFEST_INVALID");

    let response = send(&app, manifest_put("/v2/app/manifests/a:b", OCI_MANIFEST, &manifest)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "NAME_INVALID");

    let response = send(&app, manifest_put("/v2/App/manifests/latest", OCI_MANIFEST, &manifest)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "NAME_INVALID");
}

#[tokio::test]
async fn test_manifest_too_large() {
    let storage = MemoryStorage::new();
    let app = RegistryBuilder::new()
        .storage(storage.into())
        .max_manifest_size(64)
        .build();

    let body = vec![b' '; 65];
    let response = send(&app, manifest_put("/v2/app/manifests/latest", OCI_MANIFEST, &body)).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(error_code(response).await, "MANIFEST_INVALID");
}

#[tokio::test]
async fn test_tags_pagination_and_delete() {
    let app = test_registry();
    let index = serde_json::to_vec(&json!({
        "schemaVersion": 2,
        "mediaType": OCI_INDEX,
        "manifests": [],
    }))
    .unwrap();

    for tag in ["e", "c", "a", "d", "b"] {
        let response = send(&app, manifest_put(&format!("/v2/app/manifests/{tag}"), OCI_INDEX, &index)).await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let mut uri = "/v2/app/tags/list?n=2".to_string();
    let mut pages = Vec::new();
    loop {
        let response = send(&app, request("GET", &uri)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let link = response
            .headers()
            .get(header::LINK)
            .map(|value| value.to_str().unwrap().to_string());

        let page: Value = serde_json::from_slice(&body(response).await).unwrap();
        assert_eq!(page["name"], "app");
        pages.push(page["tags"].clone());

        match link {
            Some(link) => {
                let next = link
                    .strip_prefix('<')
                    .and_then(|l| l.strip_suffix(">; rel=\"next\""))
                    .unwrap();
                uri = next.to_string();
            }
            None => break,
        }
    }
    assert_eq!(pages, vec![json!(["a", "b"]), json!(["c", "d"]), json!(["e"])]);

    let response = send(&app, request("GET", "/v2/app/tags/list")).await;
    let page: Value = serde_json::from_slice(&body(response).await).unwrap();
    assert_eq!(page["tags"], json!(["a", "b", "c", "d", "e"]));

    let response = send(&app, request("GET", "/v2/app/tags/list?n=lots")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "PAGINATION_NUMBER_INVALID");

    let response = send(&app, request("DELETE", "/v2/app/manifests/c")).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = send(&app, request("GET", "/v2/app/manifests/c")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(response).await, "MANIFEST_UNKNOWN");

    let response = send(&app, request("GET", "/v2/app/tags/list?n=10&last=b")).await;
    let page: Value = serde_json::from_slice(&body(response).await).unwrap();
    assert_eq!(page["tags"], json!(["d", "e"]));
}

#[tokio::test]
async fn test_manifest_delete_leaves_dangling_tag() {
    let app = test_registry();
    let index = serde_json::to_vec(&json!({
        "schemaVersion": 2,
        "mediaType": OCI_INDEX,
        "manifests": [],
    }))
    .unwrap();
    let digest = Digest::compute(&index);

    send(&app, manifest_put("/v2/a/b/manifests/v1", OCI_INDEX, &index)).await;

    let response = send(&app, request("DELETE", &format!("/v2/a/b/manifests/{digest}"))).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = send(&app, request("GET", "/v2/a/b/manifests/v1")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(response).await, "MANIFEST_UNKNOWN");

    let response = send(&app, request("DELETE", &format!("/v2/a/b/manifests/{digest}"))).await;
    assert_eq!(error_code(response).await, "MANIFEST_UNKNOWN");

    let response = send(&app, request("GET", "/v2/a/b/tags/list")).await;
    let page: Value = serde_json::from_slice(&body(response).await).unwrap();
    assert_eq!(page["tags"], json!(["v1"]));
}

#[tokio::test]
async fn test_repositories_are_isolated() {
    let app = test_registry();
    let digest = push_blob(&app, "one", b"mine").await;

    let response = send(&app, request("GET", &format!("/v2/two/blobs/{digest}"))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(response).await, "BLOB_UNKNOWN");
}
