//! Route table for `/v2/<name>/...`
//!
//! Repository names contain `/`, so a request path cannot be split into
//! name and endpoint from the front. Each pattern here describes the tail of
//! the path; everything before the tail is the repository name.

/// Which endpoint a path addresses, with its parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Endpoint<'a> {
    /// `tags/list`
    TagList,
    /// `blobs/uploads/`
    UploadStart,
    /// `blobs/uploads/<session>`
    Upload(&'a str),
    /// `manifests/<reference>`
    Manifest(&'a str),
    /// `blobs/<digest>`
    Blob(&'a str),
}

/// A matched path: the raw repository name and the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Route<'a> {
    pub(crate) repository: &'a str,
    pub(crate) endpoint: Endpoint<'a>,
}

#[derive(Debug, Clone, Copy)]
enum Segment {
    Literal(&'static str),
    Param,
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    TagList,
    UploadStart,
    Upload,
    Manifest,
    Blob,
}

use Segment::{Literal, Param};

const TAG_LIST: &[Segment] = &[Literal("tags"), Literal("list")];
const UPLOAD_START: &[Segment] = &[Literal("blobs"), Literal("uploads"), Literal("")];
const UPLOAD_START_BARE: &[Segment] = &[Literal("blobs"), Literal("uploads")];
const UPLOAD: &[Segment] = &[Literal("blobs"), Literal("uploads"), Param];
const MANIFEST: &[Segment] = &[Literal("manifests"), Param];
const BLOB: &[Segment] = &[Literal("blobs"), Param];

/// Tried in order; the first match wins.
const ROUTES: &[(&[Segment], Kind)] = &[
    (TAG_LIST, Kind::TagList),
    (UPLOAD_START, Kind::UploadStart),
    (UPLOAD_START_BARE, Kind::UploadStart),
    (UPLOAD, Kind::Upload),
    (MANIFEST, Kind::Manifest),
    (BLOB, Kind::Blob),
];

/// Match the part of a path after `/v2/`.
pub(crate) fn recognize(path: &str) -> Option<Route<'_>> {
    ROUTES
        .iter()
        .find_map(|(pattern, kind)| match_tail(path, pattern, *kind))
}

fn match_tail<'a>(path: &'a str, pattern: &[Segment], kind: Kind) -> Option<Route<'a>> {
    let mut parts = path.rsplitn(pattern.len() + 1, '/');

    let mut param = None;
    for segment in pattern.iter().rev() {
        let part = parts.next()?;
        match segment {
            Literal(literal) if part == *literal => {}
            Param if !part.is_empty() => param = Some(part),
            _ => return None,
        }
    }

    let repository = parts.next().filter(|name| !name.is_empty())?;
    let endpoint = match (kind, param) {
        (Kind::TagList, _) => Endpoint::TagList,
        (Kind::UploadStart, _) => Endpoint::UploadStart,
        (Kind::Upload, Some(id)) => Endpoint::Upload(id),
        (Kind::Manifest, Some(reference)) => Endpoint::Manifest(reference),
        (Kind::Blob, Some(digest)) => Endpoint::Blob(digest),
        _ => return None,
    };

    Some(Route {
        repository,
        endpoint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(path: &str) -> Option<(&str, Endpoint<'_>)> {
        recognize(path).map(|route| (route.repository, route.endpoint))
    }

    #[test]
    fn endpoints() {
        assert_eq!(route("app/tags/list"), Some(("app", Endpoint::TagList)));
        assert_eq!(route("app/blobs/uploads/"), Some(("app", Endpoint::UploadStart)));
        assert_eq!(route("app/blobs/uploads"), Some(("app", Endpoint::UploadStart)));
        assert_eq!(
            route("app/blobs/uploads/1234"),
            Some(("app", Endpoint::Upload("1234")))
        );
        assert_eq!(
            route("app/manifests/latest"),
            Some(("app", Endpoint::Manifest("latest")))
        );
        assert_eq!(
            route("app/blobs/sha256:abc"),
            Some(("app", Endpoint::Blob("sha256:abc")))
        );
    }

    #[test]
    fn nested_repository_names() {
        assert_eq!(
            route("library/nginx/manifests/1.25"),
            Some(("library/nginx", Endpoint::Manifest("1.25")))
        );
        assert_eq!(
            route("a/b/c/blobs/uploads/"),
            Some(("a/b/c", Endpoint::UploadStart))
        );
        // Endpoint words are fine inside a repository name.
        assert_eq!(
            route("blobs/manifests/manifests/x"),
            Some(("blobs/manifests", Endpoint::Manifest("x")))
        );
    }

    #[test]
    fn unmatched() {
        assert_eq!(route(""), None);
        assert_eq!(route("tags/list"), None);
        assert_eq!(route("/tags/list"), None);
        assert_eq!(route("app/manifests/"), None);
        assert_eq!(route("app/blobs/"), None);
        assert_eq!(route("app/catalog"), None);
        assert_eq!(route("app/manifests/a/b"), None);
    }
}
