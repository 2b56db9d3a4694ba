//! Backup service.
//!
//! Dumps every registry table into a checksummed archive, uploads it to the
//! configured remote store, and keeps the history row in step with progress.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::archive::{ArchiveData, ARCHIVE_EXTENSION, ARCHIVE_FORMAT_VERSION};
use crate::models::backup::{
    BackupKind, BackupProgress, BackupRecord, BackupState, NewBackupRecord,
};
use crate::schema::SchemaRegistry;
use crate::services::archive_codec;
use crate::services::operation_guard::{OperationGuard, OperationKind};
use crate::storage::RemoteStoreHandle;
use crate::store::{BackupHistory, EntityStore};

/// Largest page the history listing returns
const MAX_PAGE_SIZE: i64 = 100;

/// Remote store status for the settings screen
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DriveStatus {
    pub configured: bool,
    pub backend: Option<String>,
    pub folder_id: Option<String>,
    pub reachable: bool,
    pub file_count: Option<usize>,
    pub error: Option<String>,
}

/// One page of backup history
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BackupHistoryPage {
    pub items: Vec<BackupRecord>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

/// `backup-<YYYYmmdd-HHMMSS>-<kind>-<id8>.ccbak`
///
/// The id prefix keeps two backups started in the same second apart.
pub fn archive_filename(at: DateTime<Utc>, kind: BackupKind, id: Uuid) -> String {
    let simple = id.simple().to_string();
    format!(
        "backup-{}-{}-{}.{}",
        at.format("%Y%m%d-%H%M%S"),
        kind.as_str(),
        &simple[..8],
        ARCHIVE_EXTENSION
    )
}

/// Backup service
pub struct BackupService {
    registry: Arc<SchemaRegistry>,
    store: Arc<dyn EntityStore>,
    history: Arc<dyn BackupHistory>,
    remote: RemoteStoreHandle,
    guard: OperationGuard,
    table_prefix: String,
}

impl BackupService {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        store: Arc<dyn EntityStore>,
        history: Arc<dyn BackupHistory>,
        remote: RemoteStoreHandle,
        guard: OperationGuard,
        table_prefix: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            store,
            history,
            remote,
            guard,
            table_prefix: table_prefix.into(),
        }
    }

    /// Run a full backup.
    ///
    /// Any failure after the history row exists marks it FAILED with the
    /// error message before the error is returned.
    pub async fn create_backup(&self, actor: Option<Uuid>, kind: BackupKind) -> Result<BackupRecord> {
        let _permit = self.guard.try_acquire(OperationKind::Backup)?;

        let started_at = Utc::now();
        let id = Uuid::new_v4();
        let record = self
            .history
            .create(NewBackupRecord {
                id,
                filename: archive_filename(started_at, kind, id),
                format_version: ARCHIVE_FORMAT_VERSION.to_string(),
                kind,
                created_by: actor,
            })
            .await?;

        tracing::info!(
            backup_id = %record.id,
            kind = kind.as_str(),
            filename = %record.filename,
            "Backup started"
        );

        match self.execute(&record, started_at).await {
            Ok(completed) => Ok(completed),
            Err(e) => {
                tracing::error!(backup_id = %record.id, error = %e, "Backup failed");
                let progress = BackupProgress {
                    error_message: Some(e.to_string()),
                    ..Default::default()
                };
                if let Err(mark_err) = self
                    .history
                    .transition(record.id, BackupState::Failed, progress)
                    .await
                {
                    tracing::error!(
                        backup_id = %record.id,
                        error = %mark_err,
                        "Failed to record backup failure"
                    );
                }
                Err(e)
            }
        }
    }

    async fn execute(&self, record: &BackupRecord, started_at: DateTime<Utc>) -> Result<BackupRecord> {
        let data = self.dump().await?;
        let archive = archive_codec::build(data, &self.table_prefix, started_at)?;
        let bytes = archive_codec::encode(&archive)?;

        self.history
            .transition(
                record.id,
                BackupState::Uploading,
                BackupProgress {
                    file_size_bytes: Some(bytes.len() as i64),
                    total_records: Some(archive.metadata.total_records),
                    entity_counts: Some(archive.metadata.entity_counts.clone()),
                    ..Default::default()
                },
            )
            .await?;

        let remote_file_id = match self.remote.current().await {
            Some(remote) => Some(remote.upload(&record.filename, Bytes::from(bytes)).await?),
            None => {
                tracing::warn!(
                    backup_id = %record.id,
                    "No remote archive store configured, backup has no remote copy"
                );
                None
            }
        };

        let completed = self
            .history
            .transition(
                record.id,
                BackupState::Completed,
                BackupProgress {
                    remote_file_id,
                    ..Default::default()
                },
            )
            .await?;

        tracing::info!(
            backup_id = %completed.id,
            total_records = completed.total_records,
            size_bytes = completed.file_size_bytes,
            remote = completed.remote_file_id.is_some(),
            "Backup completed"
        );
        Ok(completed)
    }

    /// Read every registry table into archive form.
    ///
    /// Entity rows are keyed by entity name with secret columns removed;
    /// junction rows are keyed by table name. A junction table that does not
    /// exist yet is dumped as empty.
    pub async fn dump(&self) -> Result<ArchiveData> {
        let mut data = ArchiveData::new();

        for mapping in self.registry.entity_load_order() {
            let mut rows = self.store.fetch_all(&mapping.table_name).await?;
            for row in &mut rows {
                mapping.strip_secrets(row);
            }
            tracing::debug!(entity = %mapping.entity_name, rows = rows.len(), "Dumped entity");
            data.insert(mapping.entity_name.clone(), rows);
        }

        for junction in self.registry.junction_tables() {
            let rows = match self.store.fetch_all(&junction.table_name).await {
                Ok(rows) => rows,
                Err(AppError::NotFound(_)) => {
                    tracing::warn!(table = %junction.table_name, "Junction table missing, dumped as empty");
                    Vec::new()
                }
                Err(e) => return Err(e),
            };
            data.insert(junction.table_name.clone(), rows);
        }

        Ok(data)
    }

    /// History page, newest first. `page` is 1-based.
    pub async fn list(&self, page: i64, limit: i64) -> Result<BackupHistoryPage> {
        let page = page.max(1);
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let (items, total) = self.history.list((page - 1) * limit, limit).await?;
        Ok(BackupHistoryPage {
            items,
            total,
            page,
            limit,
        })
    }

    pub async fn get(&self, id: Uuid) -> Result<BackupRecord> {
        self.history
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Backup {} not found", id)))
    }

    /// Delete a history row, removing its remote copy first.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let record = self.get(id).await?;
        if let Some(file_id) = &record.remote_file_id {
            match self.remote.current().await {
                Some(remote) => remote.delete(file_id).await?,
                None => tracing::warn!(
                    backup_id = %id,
                    file_id = %file_id,
                    "No remote store configured, remote copy left in place"
                ),
            }
        }
        self.history.delete(id).await?;
        tracing::info!(backup_id = %id, "Backup deleted");
        Ok(())
    }

    /// Report whether a remote store is configured and reachable.
    pub async fn drive_status(&self) -> DriveStatus {
        let Some(remote) = self.remote.current().await else {
            return DriveStatus {
                configured: false,
                backend: None,
                folder_id: None,
                reachable: false,
                file_count: None,
                error: None,
            };
        };

        let (reachable, file_count, error) = match remote.list().await {
            Ok(files) => (true, Some(files.len()), None),
            Err(e) => {
                tracing::warn!(backend = remote.backend(), error = %e, "Remote store unreachable");
                (false, None, Some(e.to_string()))
            }
        };

        DriveStatus {
            configured: true,
            backend: Some(remote.backend().to_string()),
            folder_id: Some(remote.location()),
            reachable,
            file_count,
            error,
        }
    }
}
