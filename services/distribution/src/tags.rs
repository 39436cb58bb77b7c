//! Tag pointers

use camino::{Utf8Path, Utf8PathBuf};
use storage::{StorageBucket, StorageError};

use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::name::{Repository, Tag};

/// One page of a repository's tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagPage {
    /// Tag names in ascending byte order.
    pub tags: Vec<String>,
    /// Whether tags exist beyond this page.
    pub has_more: bool,
    /// The cursor for the next page: the last tag on this one, when `has_more`.
    pub next: Option<String>,
}

/// Mutable `(repository, tag) -> digest` pointers.
///
/// Writes are last-writer-wins. A tag is not tied to the lifetime of the
/// manifest it points at.
#[derive(Debug, Clone)]
pub struct TagRegistry {
    bucket: StorageBucket,
}

impl TagRegistry {
    /// Tags are kept in `bucket` under `<repository>/_tags/<tag>`, the value
    /// being the digest string.
    pub fn new(bucket: StorageBucket) -> Self {
        Self { bucket }
    }

    fn prefix(repository: &Repository) -> String {
        format!("{}/", repository.key("_tags"))
    }

    fn path(repository: &Repository, tag: &Tag) -> Utf8PathBuf {
        repository.key("_tags").join(tag.as_str())
    }

    /// The digest a tag points at.
    #[tracing::instrument(skip_all, fields(%repository, %tag))]
    pub async fn resolve(&self, repository: &Repository, tag: &Tag) -> RegistryResult<Digest> {
        let value = self
            .bucket
            .get(&Self::path(repository, tag))
            .await?
            .ok_or_else(|| RegistryError::ManifestUnknown(format!("{repository}:{tag}")))?;

        let value = String::from_utf8_lossy(&value);
        Ok(value.parse()?)
    }

    /// Point `tag` at `digest`, replacing any previous target.
    #[tracing::instrument(skip_all, fields(%repository, %tag, %digest))]
    pub async fn set(
        &self,
        repository: &Repository,
        tag: &Tag,
        digest: &Digest,
    ) -> Result<(), StorageError> {
        self.bucket
            .put(&Self::path(repository, tag), digest.to_string().as_bytes())
            .await?;
        tracing::debug!("tag updated");
        Ok(())
    }

    /// Remove a tag.
    #[tracing::instrument(skip_all, fields(%repository, %tag))]
    pub async fn delete(&self, repository: &Repository, tag: &Tag) -> RegistryResult<()> {
        if self.bucket.remove(&Self::path(repository, tag)).await? {
            Ok(())
        } else {
            Err(RegistryError::ManifestUnknown(format!("{repository}:{tag}")))
        }
    }

    /// Up to `limit` tag names in ascending order, strictly after `after`.
    #[tracing::instrument(skip_all, fields(%repository, limit = limit, ?after))]
    pub async fn list(
        &self,
        repository: &Repository,
        limit: usize,
        after: Option<&str>,
    ) -> Result<TagPage, StorageError> {
        if limit == 0 {
            return Ok(TagPage {
                tags: Vec::new(),
                has_more: false,
                next: None,
            });
        }

        let prefix = Self::prefix(repository);
        let cursor = after.map(|tag| format!("{prefix}{tag}"));

        // One extra key tells us whether another page exists.
        let keys = self
            .bucket
            .list_after(
                Utf8Path::new(&prefix),
                cursor.as_deref().map(Utf8Path::new),
                limit.saturating_add(1),
            )
            .await?;

        let mut tags: Vec<String> = keys
            .iter()
            .filter_map(|key| key.strip_prefix(&prefix))
            .map(str::to_owned)
            .collect();

        let has_more = tags.len() > limit;
        tags.truncate(limit);
        let next = if has_more { tags.last().cloned() } else { None };

        Ok(TagPage {
            tags,
            has_more,
            next,
        })
    }
}
