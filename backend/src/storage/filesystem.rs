//! Filesystem archive store.
//!
//! Files are written flat into one directory; the file id is the file name.
//! An existing archive is never overwritten.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{RemoteFile, RemoteStore};
use crate::error::{AppError, Result};

/// Directory-backed archive store
pub struct FilesystemStore {
    base_path: PathBuf,
}

impl FilesystemStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Resolve a file id, refusing anything that could escape the directory.
    fn id_to_path(&self, file_id: &str) -> Result<PathBuf> {
        let name = Path::new(file_id);
        let plain = name.components().count() == 1
            && name.file_name().map(|n| n == name.as_os_str()).unwrap_or(false);
        if !plain {
            return Err(AppError::Validation(format!("Invalid archive id: {}", file_id)));
        }
        Ok(self.base_path.join(name))
    }
}

#[async_trait]
impl RemoteStore for FilesystemStore {
    fn backend(&self) -> &'static str {
        "filesystem"
    }

    fn location(&self) -> String {
        self.base_path.display().to_string()
    }

    async fn upload(&self, name: &str, content: Bytes) -> Result<String> {
        let path = self.id_to_path(name)?;
        fs::create_dir_all(&self.base_path).await?;

        let conflict = || AppError::Conflict(format!("Archive {} already exists", name));

        // Write to a temp name first so a crash never leaves a truncated archive
        let partial = path.with_extension("partial");
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&partial)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Err(conflict()),
            Err(e) => return Err(e.into()),
        };
        file.write_all(&content).await?;
        file.sync_all().await?;
        drop(file);

        // hard_link fails instead of replacing an existing target
        let linked = fs::hard_link(&partial, &path).await;
        fs::remove_file(&partial).await?;
        match linked {
            Ok(()) => Ok(name.to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(conflict()),
            Err(e) => Err(AppError::Storage(format!("Failed to store {}: {}", name, e))),
        }
    }

    async fn download(&self, file_id: &str) -> Result<Bytes> {
        let path = self.id_to_path(file_id)?;
        let content = fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                AppError::NotFound(format!("Archive {} not found", file_id))
            }
            _ => AppError::Storage(format!("Failed to read {}: {}", file_id, e)),
        })?;
        Ok(Bytes::from(content))
    }

    async fn list(&self) -> Result<Vec<RemoteFile>> {
        let mut entries = match fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(AppError::Storage(format!(
                    "Failed to list {}: {}",
                    self.base_path.display(),
                    e
                )))
            }
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".partial") {
                continue;
            }
            files.push(RemoteFile {
                id: name.clone(),
                name,
                size_bytes: Some(metadata.len() as i64),
                created_at: metadata.modified().ok().map(DateTime::<Utc>::from),
            });
        }
        files.sort_by(|a, b| b.name.cmp(&a.name));
        Ok(files)
    }

    async fn delete(&self, file_id: &str) -> Result<()> {
        let path = self.id_to_path(file_id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Storage(format!(
                "Failed to delete {}: {}",
                file_id, e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_download_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());

        let id = store
            .upload("backup-20250101-020000-scheduled.ccbak", Bytes::from_static(b"gz"))
            .await
            .unwrap();
        assert_eq!(store.download(&id).await.unwrap(), Bytes::from_static(b"gz"));

        let files = store.list().await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].size_bytes, Some(2));

        store.delete(&id).await.unwrap();
        store.delete(&id).await.unwrap();
        assert!(matches!(
            store.download(&id).await.unwrap_err(),
            AppError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_upload_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());
        let name = "backup-20250101-020000-manual-0a1b2c3d.ccbak";

        store.upload(name, Bytes::from_static(b"first")).await.unwrap();
        let second = store.upload(name, Bytes::from_static(b"second")).await;
        assert!(matches!(second, Err(AppError::Conflict(_))));

        assert_eq!(store.download(name).await.unwrap(), Bytes::from_static(b"first"));
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());
        assert!(store.download("../etc/passwd").await.is_err());
        assert!(store.upload("a/b.ccbak", Bytes::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_list_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path().join("not-yet-created"));
        assert!(store.list().await.unwrap().is_empty());
    }
}
