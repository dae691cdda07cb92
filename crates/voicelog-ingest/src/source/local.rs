use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, instrument};
use voicelog_common::types::RawObjectRef;

use super::ObjectSource;
use crate::error::FetchError;
use crate::filename::DOCUMENT_SUFFIX;

const HTML_CONTENT_TYPE: &str = "text/html";

/// An unpacked export on the local filesystem
///
/// Keys are paths relative to the root, always `/`-separated, so a local run
/// and an S3 run over the same export produce the same keys.
#[derive(Debug, Clone)]
pub struct LocalDirSource {
    root: PathBuf,
}

impl LocalDirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        Some(parts.join("/"))
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, FetchError> {
        let relative = Path::new(key);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(FetchError::AccessDenied(format!(
                "{} escapes the export directory",
                key
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectSource for LocalDirSource {
    #[instrument(skip(self), fields(root = %self.root.display()))]
    async fn list(&self, prefix: &str) -> Result<Vec<RawObjectRef>, FetchError> {
        let mut refs = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                if !path.to_string_lossy().ends_with(DOCUMENT_SUFFIX) {
                    continue;
                }
                match self.key_for(&path) {
                    Some(key) if key.starts_with(prefix) => {
                        refs.push(RawObjectRef::new(key).with_content_type(HTML_CONTENT_TYPE))
                    }
                    Some(_) => {}
                    None => debug!("Skipping non UTF-8 path {}", path.display()),
                }
            }
        }

        refs.sort_by(|a, b| a.key.cmp(&b.key));
        debug!("Listed {} documents under {}", refs.len(), self.root.display());

        Ok(refs)
    }

    async fn fetch(&self, key: &str) -> Result<Vec<u8>, FetchError> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::read(&path).await?)
    }

    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn export_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        let calls = dir.path().join("Voice").join("Calls");
        tokio::fs::create_dir_all(&calls).await.unwrap();
        tokio::fs::write(
            calls.join("+15551234567 - Text - 2023-03-01T10_15_00Z.html"),
            b"<html></html>",
        )
        .await
        .unwrap();
        tokio::fs::write(
            calls.join("+15551234567 - Missed - 2023-03-02T08_00_00Z.html"),
            b"<html></html>",
        )
        .await
        .unwrap();
        tokio::fs::write(calls.join("avatar.jpg"), b"\xff\xd8").await.unwrap();
        tokio::fs::write(dir.path().join("index.html"), b"<html></html>")
            .await
            .unwrap();
        dir
    }

    #[tokio::test]
    async fn test_list_is_recursive_and_html_only() {
        let dir = export_dir().await;
        let source = LocalDirSource::new(dir.path());

        let keys: Vec<String> = source.list("").await.unwrap().into_iter().map(|r| r.key).collect();
        assert_eq!(
            keys,
            vec![
                "Voice/Calls/+15551234567 - Missed - 2023-03-02T08_00_00Z.html".to_string(),
                "Voice/Calls/+15551234567 - Text - 2023-03-01T10_15_00Z.html".to_string(),
                "index.html".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_list_honours_prefix() {
        let dir = export_dir().await;
        let source = LocalDirSource::new(dir.path());

        let refs = source.list("Voice/").await.unwrap();
        assert_eq!(refs.len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_by_key() {
        let dir = export_dir().await;
        let source = LocalDirSource::new(dir.path());

        let bytes = source.fetch("index.html").await.unwrap();
        assert_eq!(bytes, b"<html></html>");

        let missing = source.fetch("Voice/nope.html").await.unwrap_err();
        assert!(matches!(missing, FetchError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_fetch_rejects_parent_components() {
        let dir = export_dir().await;
        let source = LocalDirSource::new(dir.path().join("Voice"));

        let err = source.fetch("../index.html").await.unwrap_err();
        assert!(matches!(err, FetchError::AccessDenied(_)));
    }
}
