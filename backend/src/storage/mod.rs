//! Remote archive stores.
//!
//! Backups are uploaded to, and restored from, a [`RemoteStore`]. Which store
//! is active depends on the current backup settings, so the choice lives in a
//! [`RemoteStoreHandle`] that is re-resolved whenever settings change.

pub mod drive;
pub mod filesystem;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use utoipa::ToSchema;

use crate::error::Result;
use crate::models::backup::BackupSettings;

pub use drive::{DriveConfig, DriveStore};
pub use filesystem::FilesystemStore;

/// A stored archive as reported by the remote listing.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    pub size_bytes: Option<i64>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Remote archive store trait
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Short backend name reported by the status endpoint
    fn backend(&self) -> &'static str;

    /// Folder id or directory the store writes into
    fn location(&self) -> String;

    /// Store `content` under `name`, returning the store's file id
    async fn upload(&self, name: &str, content: Bytes) -> Result<String>;

    /// Fetch a file by id
    async fn download(&self, file_id: &str) -> Result<Bytes>;

    /// List stored archives
    async fn list(&self) -> Result<Vec<RemoteFile>>;

    /// Delete a file by id. A file that is already gone is not an error.
    async fn delete(&self, file_id: &str) -> Result<()>;
}

/// Pick the store for the given settings: Drive when its credentials are
/// complete and usable, then the archive directory, otherwise none.
pub fn resolve(settings: &BackupSettings, archive_dir: Option<&str>) -> Option<Arc<dyn RemoteStore>> {
    if let Some(config) = DriveConfig::from_settings(settings) {
        match DriveStore::new(config) {
            Ok(store) => return Some(Arc::new(store)),
            Err(e) => tracing::warn!(error = %e, "Drive credentials unusable, falling back"),
        }
    }
    archive_dir.map(|dir| Arc::new(FilesystemStore::new(dir)) as Arc<dyn RemoteStore>)
}

/// Shared, swappable reference to the active store.
#[derive(Clone, Default)]
pub struct RemoteStoreHandle {
    inner: Arc<RwLock<Option<Arc<dyn RemoteStore>>>>,
}

impl RemoteStoreHandle {
    pub fn new(store: Option<Arc<dyn RemoteStore>>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(store)),
        }
    }

    pub async fn current(&self) -> Option<Arc<dyn RemoteStore>> {
        self.inner.read().await.clone()
    }

    pub async fn replace(&self, store: Option<Arc<dyn RemoteStore>>) {
        let backend = store.as_ref().map(|s| s.backend()).unwrap_or("none");
        tracing::info!(backend, "Remote archive store configured");
        *self.inner.write().await = store;
    }

    /// Re-resolve from settings and swap the result in.
    pub async fn reconfigure(&self, settings: &BackupSettings, archive_dir: Option<&str>) {
        self.replace(resolve(settings, archive_dir)).await;
    }
}
