use camino::{Utf8Path, Utf8PathBuf};
use eyre::Context;
use tokio::io::AsyncWriteExt;
use tracing::Instrument;

use storage_driver::{Driver, Metadata, Reader, StorageError, StorageErrorKind, Writer};

/// Storage driver that keeps objects as files under a root directory.
///
/// Objects live at `<root>/<bucket>/b/<key>`.
#[derive(Debug)]
pub struct LocalDriver {
    root: Utf8PathBuf,
}

impl LocalDriver {
    /// Create a driver rooted at `root`. The directory is created lazily.
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    fn base(&self, bucket: &str) -> Utf8PathBuf {
        let mut path = self.root.join(bucket);
        path.push("b");
        path
    }

    fn path(&self, bucket: &str, remote: &Utf8Path) -> Result<Utf8PathBuf, StorageError> {
        if remote.is_absolute() || remote.as_str().split('/').any(|part| part == "..") {
            return Err(StorageError::builder(
                self.name(),
                StorageErrorKind::InvalidRequest,
                eyre::eyre!("key escapes the bucket: {remote}"),
            )
            .bucket(bucket)
            .path(remote.as_str())
            .build());
        }
        Ok(self.base(bucket).join(remote))
    }
}

#[async_trait::async_trait]
impl Driver for LocalDriver {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        let path = self.path(bucket, remote)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|err| StorageError::io(self.name(), err))?;
        if !metadata.is_file() {
            return Err(StorageError::builder(
                self.name(),
                StorageErrorKind::NotFound,
                eyre::eyre!("not a file: {path}"),
            )
            .bucket(bucket)
            .path(remote.as_str())
            .build());
        }
        Ok(Metadata {
            size: metadata.len(),
            created: metadata
                .created()
                .or_else(|_| metadata.modified())
                .map_err(|err| StorageError::io(self.name(), err))?
                .into(),
        })
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        let path = self.path(bucket, remote)?;
        tokio::fs::remove_file(path)
            .await
            .map_err(|err| StorageError::io(self.name(), err))?;
        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let path = self.path(bucket, remote)?;
        let parent = path
            .parent()
            .map(Utf8Path::to_owned)
            .unwrap_or_else(|| self.base(bucket));

        tokio::fs::create_dir_all(&parent)
            .await
            .context("create_dir_all")
            .map_err(StorageError::with(self.name(), StorageErrorKind::Io))?;

        // Write beside the target and rename, so readers never see a partial object.
        // Each writer stages to its own file; the last rename wins.
        let staging = parent.join(format!(
            ".{}.{}.partial",
            path.file_name().unwrap_or("object"),
            uuid::Uuid::new_v4().simple()
        ));

        let result = async {
            let mut writer = tokio::io::BufWriter::new(
                tokio::fs::File::create(&staging)
                    .await
                    .context("local: open staging file")?,
            );
            tokio::io::copy(local, &mut writer).await.context("copy")?;
            writer.shutdown().await.context("shutdown writer")?;
            tokio::fs::rename(&staging, &path)
                .await
                .context("rename staging file")
        }
        .await;

        if result.is_err() {
            let _ = tokio::fs::remove_file(&staging).await;
        }
        result.map_err(StorageError::with(self.name(), StorageErrorKind::Io))
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let path = self.path(bucket, remote)?;

        let mut reader = tokio::io::BufReader::new(
            tokio::fs::File::open(&path)
                .await
                .map_err(|err| StorageError::io(self.name(), err))?,
        );

        tokio::io::copy(&mut reader, local)
            .await
            .context("copy")
            .map_err(StorageError::with(self.name(), StorageErrorKind::Io))?;

        local
            .flush()
            .await
            .context("flush writer")
            .map_err(StorageError::with(self.name(), StorageErrorKind::Io))?;

        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        let base = self.base(bucket);
        let prefix = prefix.map(|p| p.as_str().to_owned()).unwrap_or_default();

        let items = tokio::task::spawn_blocking(move || collect_list(&base, &prefix))
            .in_current_span()
            .await
            .wrap_err("local driver")
            .map_err(StorageError::with(self.name(), StorageErrorKind::Other))?
            .map_err(|err| StorageError::io(self.name(), err))?;

        tracing::debug!("Found {} entries", items.len());
        Ok(items)
    }
}

/// Walk the smallest directory that can contain keys starting with `prefix`.
#[tracing::instrument]
fn collect_list(base: &Utf8Path, prefix: &str) -> std::io::Result<Vec<String>> {
    let start = match prefix.rfind('/') {
        Some(idx) => base.join(&prefix[..idx]),
        None => base.to_owned(),
    };

    let mut files = Vec::new();
    match visit(&start, &mut files) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    }

    Ok(files
        .into_iter()
        .filter_map(|p| p.strip_prefix(base).ok().map(|p| p.as_str().to_owned()))
        .filter(|key| key.starts_with(prefix))
        .collect())
}

fn visit(path: &Utf8Path, files: &mut Vec<Utf8PathBuf>) -> std::io::Result<()> {
    for entry in path.read_dir_utf8()? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            visit(entry.path(), files)?;
        } else if !entry.file_name().ends_with(".partial") {
            files.push(entry.path().to_owned())
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> (tempfile::TempDir, LocalDriver) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_owned()).unwrap();
        (dir, LocalDriver::new(root))
    }

    async fn put(driver: &LocalDriver, key: &str, data: &[u8]) {
        let mut reader = data;
        driver
            .upload("bucket", Utf8Path::new(key), &mut reader)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn round_trip() {
        let (_dir, driver) = driver();
        put(&driver, "repo/_blobs/sha256/abc", b"layer").await;

        let mut out = Vec::new();
        driver
            .download("bucket", Utf8Path::new("repo/_blobs/sha256/abc"), &mut out)
            .await
            .unwrap();
        assert_eq!(out, b"layer");

        let meta = driver
            .metadata("bucket", Utf8Path::new("repo/_blobs/sha256/abc"))
            .await
            .unwrap();
        assert_eq!(meta.size, 5);
    }

    #[tokio::test]
    async fn missing_is_not_found() {
        let (_dir, driver) = driver();

        let mut out = Vec::new();
        let err = driver
            .download("bucket", Utf8Path::new("nope"), &mut out)
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let err = driver
            .delete("bucket", Utf8Path::new("nope"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn rejects_escaping_keys() {
        let (_dir, driver) = driver();
        let mut reader: &[u8] = b"x";
        let err = driver
            .upload("bucket", Utf8Path::new("../outside"), &mut reader)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn list_after_is_ordered() {
        let (_dir, driver) = driver();
        for tag in ["c", "a", "b"] {
            put(&driver, &format!("repo/_tags/{tag}"), b"x").await;
        }
        put(&driver, "repo/_manifests/sha256/abc", b"x").await;

        let keys = driver
            .list_after("bucket", Utf8Path::new("repo/_tags/"), None, 10)
            .await
            .unwrap();
        assert_eq!(keys, vec!["repo/_tags/a", "repo/_tags/b", "repo/_tags/c"]);

        let keys = driver
            .list_after(
                "bucket",
                Utf8Path::new("repo/_tags/"),
                Some(Utf8Path::new("repo/_tags/a")),
                1,
            )
            .await
            .unwrap();
        assert_eq!(keys, vec!["repo/_tags/b"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_writes_to_one_key() {
        let (_dir, driver) = driver();
        let driver = std::sync::Arc::new(driver);
        let key = Utf8Path::new("repo/_tags/latest");
        let values: Vec<Vec<u8>> = (0..8u8).map(|i| vec![b'a' + i; 256 * 1024]).collect();

        // Identical content from every writer, then distinct content.
        for values in [vec![values[0].clone(); 8], values.clone(), values] {
            let writes = values.iter().cloned().map(|value| {
                let driver = driver.clone();
                tokio::spawn(async move {
                    let mut reader = value.as_slice();
                    driver.upload("bucket", key, &mut reader).await
                })
            });
            for result in futures::future::join_all(writes).await {
                result.unwrap().unwrap();
            }

            let mut out = Vec::new();
            driver.download("bucket", key, &mut out).await.unwrap();
            assert!(values.contains(&out), "read back a spliced value");
        }

        // Staging files are gone once every writer finishes.
        let keys = driver.list("bucket", None).await.unwrap();
        assert_eq!(keys, vec!["repo/_tags/latest"]);
        let staged = std::fs::read_dir(driver.base("bucket").join("repo/_tags"))
            .unwrap()
            .count();
        assert_eq!(staged, 1);
    }

    #[tokio::test]
    async fn listing_a_missing_directory_is_empty() {
        let (_dir, driver) = driver();
        let keys = driver
            .list("bucket", Some(Utf8Path::new("nothing/here/")))
            .await
            .unwrap();
        assert!(keys.is_empty());
    }
}
