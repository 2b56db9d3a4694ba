//! Restore service.
//!
//! Downloads a completed backup, verifies it, and reloads every table inside
//! one transaction with referential checks suspended. Truncation runs
//! children-first and reload parents-first, so the order is valid even
//! for a session that still enforces constraints.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::archive::{ArchiveFile, ArchiveMetadata};
use crate::models::backup::{BackupRecord, BackupState};
use crate::schema::SchemaRegistry;
use crate::services::archive_codec;
use crate::services::operation_guard::{OperationGuard, OperationKind};
use crate::storage::RemoteStoreHandle;
use crate::store::{BackupHistory, EntityStore, Record, StoreTransaction};

/// Rows per insert statement
pub const RESTORE_BATCH_SIZE: usize = 500;

/// Archive header shown before a destructive restore
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RestorePreview {
    pub backup_id: Uuid,
    pub filename: String,
    pub metadata: ArchiveMetadata,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSummary {
    pub backup_id: Uuid,
    /// Rows inserted per entity or junction table
    pub restored: BTreeMap<String, u64>,
    pub total_restored: u64,
    /// Rows present in the archive but skipped on key conflict
    pub skipped: u64,
}

/// Restore service
pub struct RestoreService {
    registry: Arc<SchemaRegistry>,
    store: Arc<dyn EntityStore>,
    history: Arc<dyn BackupHistory>,
    remote: RemoteStoreHandle,
    guard: OperationGuard,
}

impl RestoreService {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        store: Arc<dyn EntityStore>,
        history: Arc<dyn BackupHistory>,
        remote: RemoteStoreHandle,
        guard: OperationGuard,
    ) -> Self {
        Self {
            registry,
            store,
            history,
            remote,
            guard,
        }
    }

    /// Download and verify an archive without touching the database.
    pub async fn preview(&self, id: Uuid) -> Result<RestorePreview> {
        let record = self.restorable(id).await?;
        let archive = self.fetch(&record).await?;
        Ok(RestorePreview {
            backup_id: record.id,
            filename: record.filename,
            metadata: archive.metadata,
        })
    }

    /// Replace the contents of every registry table with the archive's rows.
    pub async fn restore(&self, id: Uuid) -> Result<RestoreSummary> {
        let _permit = self.guard.try_acquire(OperationKind::Restore)?;

        let record = self.restorable(id).await?;
        let archive = self.fetch(&record).await?;
        let junctions = self.present_junction_tables().await?;

        tracing::info!(
            backup_id = %id,
            total_records = archive.metadata.total_records,
            "Restore started"
        );

        let mut tx = self.store.begin().await?;
        match self.reload(tx.as_mut(), &archive, &junctions).await {
            Ok(summary) => {
                tx.commit().await?;
                tracing::info!(
                    backup_id = %id,
                    restored = summary.total_restored,
                    skipped = summary.skipped,
                    "Restore completed"
                );
                Ok(RestoreSummary {
                    backup_id: id,
                    ..summary
                })
            }
            Err(e) => {
                tracing::error!(backup_id = %id, error = %e, "Restore failed, rolling back");
                // Constraint checks are disabled per transaction only, so the
                // rollback restores enforcement with it.
                if let Err(rb) = tx.rollback().await {
                    tracing::error!(error = %rb, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn restorable(&self, id: Uuid) -> Result<BackupRecord> {
        let record = self
            .history
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Backup {} not found", id)))?;
        if record.state != BackupState::Completed {
            return Err(AppError::Validation(format!(
                "Backup {} is {} and cannot be restored",
                id, record.state
            )));
        }
        if record.remote_file_id.is_none() {
            return Err(AppError::Validation(format!(
                "Backup {} has no remote copy and cannot be restored",
                id
            )));
        }
        Ok(record)
    }

    async fn fetch(&self, record: &BackupRecord) -> Result<ArchiveFile> {
        let remote = self.remote.current().await.ok_or_else(|| {
            AppError::Validation("No remote archive store is configured".to_string())
        })?;
        let file_id = record
            .remote_file_id
            .as_deref()
            .ok_or_else(|| AppError::Internal("restorable backup without file id".to_string()))?;

        let bytes = remote.download(file_id).await?;
        let archive = archive_codec::open(&bytes)?;
        tracing::debug!(
            backup_id = %record.id,
            compressed_bytes = bytes.len(),
            checksum = %archive.metadata.checksum,
            "Archive verified"
        );
        Ok(archive)
    }

    /// Junction tables that exist. Checked before the transaction starts,
    /// since a failed statement would abort it.
    async fn present_junction_tables(&self) -> Result<HashSet<String>> {
        let mut present = HashSet::new();
        for junction in self.registry.junction_tables() {
            match self.store.count(&junction.table_name).await {
                Ok(_) => {
                    present.insert(junction.table_name.clone());
                }
                Err(AppError::NotFound(_)) => {
                    tracing::warn!(table = %junction.table_name, "Junction table missing, skipped");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(present)
    }

    async fn reload(
        &self,
        tx: &mut dyn StoreTransaction,
        archive: &ArchiveFile,
        junctions: &HashSet<String>,
    ) -> Result<RestoreSummary> {
        let order = self.registry.entity_load_order();
        let junction_tables: Vec<&str> = self
            .registry
            .junction_tables()
            .iter()
            .map(|j| j.table_name.as_str())
            .filter(|t| junctions.contains(*t))
            .collect();

        tx.set_constraint_checks(false).await?;

        // Children before parents, in one statement
        let truncation: Vec<&str> = junction_tables
            .iter()
            .copied()
            .chain(order.iter().rev().map(|m| m.table_name.as_str()))
            .collect();
        tx.truncate(&truncation).await?;

        let mut summary = RestoreSummary {
            backup_id: Uuid::nil(),
            restored: BTreeMap::new(),
            total_restored: 0,
            skipped: 0,
        };

        let targets = order
            .iter()
            .map(|m| (m.entity_name.as_str(), m.table_name.as_str()))
            .chain(junction_tables.iter().map(|t| (*t, *t)));

        for (key, table) in targets {
            let rows = archive.data.get(key).map(Vec::as_slice).unwrap_or_default();
            let (inserted, skipped) = insert_rows(tx, table, rows).await?;
            tracing::debug!(entity = key, inserted, skipped, "Reloaded table");
            summary.restored.insert(key.to_string(), inserted);
            summary.total_restored += inserted;
            summary.skipped += skipped;
        }

        for key in archive.data.keys() {
            if !summary.restored.contains_key(key) {
                tracing::warn!(entity = %key, "Archive section has no matching table, ignored");
            }
        }

        tx.set_constraint_checks(true).await?;
        Ok(summary)
    }
}

/// Keep only scalar columns; nested relation objects are re-established by
/// the FK id columns captured at dump time.
fn scalar_columns(row: &Record) -> Record {
    row.iter()
        .filter(|(_, value)| !value.is_object())
        .map(|(column, value)| (column.clone(), value.clone()))
        .collect::<serde_json::Map<String, Value>>()
}

async fn insert_rows(tx: &mut dyn StoreTransaction, table: &str, rows: &[Record]) -> Result<(u64, u64)> {
    let mut inserted = 0;
    for chunk in rows.chunks(RESTORE_BATCH_SIZE) {
        let batch: Vec<Record> = chunk.iter().map(scalar_columns).collect();
        inserted += tx.insert_batch(table, &batch).await?;
    }
    Ok((inserted, rows.len() as u64 - inserted))
}
