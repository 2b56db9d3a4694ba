//! In-memory store used by the test suite and local tooling.
//!
//! Tables live in one shared map. A transaction works on a private snapshot
//! and swaps it in on commit; the last commit wins. Primary keys, unique
//! columns, junction pairs, and foreign keys are derived from the schema
//! registry and enforced while constraint checks are enabled.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    illegal_transition, BackupHistory, EntityStore, Record, StoreTransaction, UpsertOutcome,
};
use crate::error::{AppError, Result};
use crate::models::backup::{
    BackupProgress, BackupRecord, BackupSettings, BackupState, NewBackupRecord,
};
use crate::schema::SchemaRegistry;

type Tables = BTreeMap<String, Vec<Record>>;

#[derive(Clone)]
pub struct MemoryEntityStore {
    registry: Arc<SchemaRegistry>,
    tables: Arc<RwLock<Tables>>,
    failing: Arc<RwLock<HashSet<String>>>,
    failing_inserts: Arc<RwLock<HashSet<String>>>,
}

impl MemoryEntityStore {
    /// Empty store with one table per registry table.
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        let tables = registry
            .all_tables()
            .into_iter()
            .map(|table| (table, Vec::new()))
            .collect();
        Self {
            registry,
            tables: Arc::new(RwLock::new(tables)),
            failing: Arc::new(RwLock::new(HashSet::new())),
            failing_inserts: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Append rows without any constraint checks.
    pub async fn seed(&self, table: &str, rows: Vec<Record>) {
        self.tables
            .write()
            .await
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    /// Remove a table entirely, as if it was never migrated.
    pub async fn drop_table(&self, table: &str) {
        self.tables.write().await.remove(table);
    }

    /// Make every read and write against `table` fail.
    pub async fn fail_table(&self, table: &str) {
        self.failing.write().await.insert(table.to_string());
    }

    /// Make inserts into `table` fail; reads and truncation still work.
    pub async fn fail_inserts(&self, table: &str) {
        self.failing_inserts.write().await.insert(table.to_string());
    }

    pub async fn rows(&self, table: &str) -> Vec<Record> {
        self.tables
            .read()
            .await
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Row count per table.
    pub async fn row_counts(&self) -> BTreeMap<String, usize> {
        self.tables
            .read()
            .await
            .iter()
            .map(|(table, rows)| (table.clone(), rows.len()))
            .collect()
    }

    async fn check_failing(&self, table: &str) -> Result<()> {
        if self.failing.read().await.contains(table) {
            return Err(injected_failure(table));
        }
        Ok(())
    }

    async fn table(&self, table: &str) -> Result<Vec<Record>> {
        self.check_failing(table).await?;
        self.tables
            .read()
            .await
            .get(table)
            .cloned()
            .ok_or_else(|| missing_table(table))
    }
}

fn missing_table(table: &str) -> AppError {
    AppError::NotFound(format!("relation \"{}\" does not exist", table))
}

fn injected_failure(table: &str) -> AppError {
    AppError::Database(format!("simulated failure on {}", table))
}

fn timestamp_of(value: &Value) -> Option<DateTime<Utc>> {
    let raw = value.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        })
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn count(&self, table: &str) -> Result<i64> {
        Ok(self.table(table).await?.len() as i64)
    }

    async fn fetch_all(&self, table: &str) -> Result<Vec<Record>> {
        self.table(table).await
    }

    async fn fetch_range(
        &self,
        table: &str,
        column: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Record>> {
        let rows = self.table(table).await?;
        if from.is_none() && to.is_none() {
            return Ok(rows);
        }
        Ok(rows
            .into_iter()
            .filter(|row| match row.get(column).and_then(timestamp_of) {
                Some(ts) => from.map_or(true, |f| ts >= f) && to.map_or(true, |t| ts <= t),
                None => false,
            })
            .collect())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let working = self.tables.read().await.clone();
        let failing = self.failing.read().await.clone();
        let failing_inserts = self.failing_inserts.read().await.clone();
        Ok(Box::new(MemoryTransaction {
            registry: self.registry.clone(),
            shared: self.tables.clone(),
            failing,
            failing_inserts,
            working,
            checks: true,
            open: true,
        }))
    }
}

pub struct MemoryTransaction {
    registry: Arc<SchemaRegistry>,
    shared: Arc<RwLock<Tables>>,
    failing: HashSet<String>,
    failing_inserts: HashSet<String>,
    working: Tables,
    checks: bool,
    open: bool,
}

impl MemoryTransaction {
    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(AppError::Internal("transaction already finished".to_string()))
        }
    }

    fn ensure_writable(&self, table: &str) -> Result<()> {
        self.ensure_open()?;
        if self.failing.contains(table) {
            return Err(injected_failure(table));
        }
        if !self.working.contains_key(table) {
            return Err(missing_table(table));
        }
        Ok(())
    }

    fn ensure_insertable(&self, table: &str) -> Result<()> {
        self.ensure_writable(table)?;
        if self.failing_inserts.contains(table) {
            return Err(injected_failure(table));
        }
        Ok(())
    }

    /// Column sets that must be unique within a table.
    fn keys(&self, table: &str) -> Vec<Vec<String>> {
        if let Some(junction) = self
            .registry
            .junction_tables()
            .iter()
            .find(|j| j.table_name == table)
        {
            return vec![vec![junction.left.column.clone(), junction.right.column.clone()]];
        }
        match self.registry.mapping_for_table(table) {
            Some(mapping) => mapping
                .unique_columns()
                .into_iter()
                .map(|column| vec![column])
                .collect(),
            None => vec![vec!["id".to_string()]],
        }
    }

    /// Index of the first existing row sharing any key with `row`.
    fn conflicting(&self, table: &str, row: &Record, except: Option<usize>) -> Option<(usize, String)> {
        let rows = self.working.get(table)?;
        for key in self.keys(table) {
            let wanted: Option<Vec<&Value>> = key
                .iter()
                .map(|c| row.get(c).filter(|v| !v.is_null()))
                .collect();
            let Some(wanted) = wanted else { continue };
            let hit = rows.iter().enumerate().position(|(idx, existing)| {
                Some(idx) != except
                    && key
                        .iter()
                        .zip(&wanted)
                        .all(|(c, v)| existing.get(c) == Some(*v))
            });
            if let Some(idx) = hit {
                return Some((idx, key.join(", ")));
            }
        }
        None
    }

    fn check_foreign_keys(&self, table: &str, row: &Record) -> Result<()> {
        if !self.checks {
            return Ok(());
        }
        for (column, target) in self.registry.foreign_keys(table) {
            let Some(value) = row.get(&column).filter(|v| !v.is_null()) else {
                continue;
            };
            let found = self
                .working
                .get(&target)
                .map(|rows| rows.iter().any(|r| r.get("id") == Some(value)))
                .unwrap_or(false);
            if !found {
                return Err(AppError::ForeignKey(format!(
                    "{}.{} references missing {} row {}",
                    table, column, target, value
                )));
            }
        }
        Ok(())
    }

    fn push(&mut self, table: &str, row: Record) {
        self.working.entry(table.to_string()).or_default().push(row);
    }

    fn referencing_tables(&self, table: &str) -> Vec<String> {
        self.working
            .keys()
            .filter(|candidate| {
                candidate.as_str() != table
                    && self
                        .registry
                        .foreign_keys(candidate)
                        .iter()
                        .any(|(_, target)| target == table)
            })
            .cloned()
            .collect()
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn set_constraint_checks(&mut self, enabled: bool) -> Result<()> {
        self.checks = enabled;
        Ok(())
    }

    async fn truncate(&mut self, tables: &[&str]) -> Result<()> {
        for table in tables {
            self.ensure_writable(table)?;
        }
        for table in tables {
            if let Some(child) = self
                .referencing_tables(table)
                .into_iter()
                .find(|child| !tables.contains(&child.as_str()))
            {
                return Err(AppError::ForeignKey(format!(
                    "cannot truncate {}: {} references it and is not truncated with it",
                    table, child
                )));
            }
        }
        for table in tables {
            if let Some(rows) = self.working.get_mut(*table) {
                rows.clear();
            }
        }
        Ok(())
    }

    async fn insert_batch(&mut self, table: &str, rows: &[Record]) -> Result<u64> {
        self.ensure_insertable(table)?;
        let mut inserted = 0;
        for row in rows {
            if self.conflicting(table, row, None).is_some() {
                continue;
            }
            self.check_foreign_keys(table, row)?;
            self.push(table, row.clone());
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn insert(&mut self, table: &str, row: &Record) -> Result<()> {
        self.ensure_insertable(table)?;
        if let Some((_, key)) = self.conflicting(table, row, None) {
            return Err(AppError::Duplicate(format!(
                "duplicate key value violates unique constraint on {} ({})",
                table, key
            )));
        }
        self.check_foreign_keys(table, row)?;
        self.push(table, row.clone());
        Ok(())
    }

    async fn upsert(&mut self, table: &str, key: &str, row: &Record) -> Result<UpsertOutcome> {
        self.ensure_insertable(table)?;
        let existing = row.get(key).filter(|v| !v.is_null()).and_then(|value| {
            self.working
                .get(table)?
                .iter()
                .position(|r| r.get(key) == Some(value))
        });

        let Some(idx) = existing else {
            self.insert(table, row).await?;
            return Ok(UpsertOutcome::Inserted);
        };

        let mut merged = self.working[table][idx].clone();
        merged.extend(row.clone());
        if let Some((_, key)) = self.conflicting(table, &merged, Some(idx)) {
            return Err(AppError::Duplicate(format!(
                "duplicate key value violates unique constraint on {} ({})",
                table, key
            )));
        }
        self.check_foreign_keys(table, &merged)?;
        if let Some(rows) = self.working.get_mut(table) {
            rows[idx] = merged;
        }
        Ok(UpsertOutcome::Updated)
    }

    async fn insert_link(&mut self, table: &str, row: &Record) -> Result<bool> {
        self.ensure_insertable(table)?;
        if self.conflicting(table, row, None).is_some() {
            return Ok(false);
        }
        self.check_foreign_keys(table, row)?;
        self.push(table, row.clone());
        Ok(true)
    }

    async fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.open = false;
        *self.shared.write().await = std::mem::take(&mut self.working);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.open = false;
        self.working.clear();
        Ok(())
    }
}

/// History and settings kept in memory.
#[derive(Clone, Default)]
pub struct MemoryBackupHistory {
    records: Arc<RwLock<Vec<BackupRecord>>>,
    settings: Arc<RwLock<Option<BackupSettings>>>,
}

impl MemoryBackupHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a fully-formed record as-is, e.g. one backdated for retention.
    pub async fn insert_record(&self, record: BackupRecord) {
        self.records.write().await.push(record);
    }

    async fn sorted(&self) -> Vec<BackupRecord> {
        let mut records = self.records.read().await.clone();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }
}

#[async_trait]
impl BackupHistory for MemoryBackupHistory {
    async fn create(&self, new: NewBackupRecord) -> Result<BackupRecord> {
        let now = Utc::now();
        let record = BackupRecord {
            id: new.id,
            filename: new.filename,
            remote_file_id: None,
            file_size_bytes: 0,
            total_records: 0,
            entity_counts: serde_json::json!({}),
            format_version: new.format_version,
            kind: new.kind,
            state: BackupState::InProgress,
            error_message: None,
            created_by: new.created_by,
            created_at: now,
            updated_at: now,
        };
        self.records.write().await.push(record.clone());
        Ok(record)
    }

    async fn transition(
        &self,
        id: Uuid,
        state: BackupState,
        progress: BackupProgress,
    ) -> Result<BackupRecord> {
        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| AppError::NotFound(format!("Backup {} not found", id)))?;
        if !record.state.can_transition_to(state) {
            return Err(illegal_transition(id, record.state, state));
        }
        record.state = state;
        if let Some(file_id) = progress.remote_file_id {
            record.remote_file_id = Some(file_id);
        }
        if let Some(size) = progress.file_size_bytes {
            record.file_size_bytes = size;
        }
        if let Some(total) = progress.total_records {
            record.total_records = total;
        }
        if let Some(counts) = progress.entity_counts {
            record.entity_counts = serde_json::to_value(counts)?;
        }
        if let Some(message) = progress.error_message {
            record.error_message = Some(message);
        }
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<BackupRecord>> {
        Ok(self.records.read().await.iter().find(|r| r.id == id).cloned())
    }

    async fn list(&self, offset: i64, limit: i64) -> Result<(Vec<BackupRecord>, i64)> {
        let records = self.sorted().await;
        let total = records.len() as i64;
        let page = records
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn list_completed(&self) -> Result<Vec<BackupRecord>> {
        Ok(self
            .sorted()
            .await
            .into_iter()
            .filter(|r| r.state == BackupState::Completed)
            .collect())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() == before {
            return Err(AppError::NotFound(format!("Backup {} not found", id)));
        }
        Ok(())
    }

    async fn load_settings(&self) -> Result<Option<BackupSettings>> {
        Ok(self.settings.read().await.clone())
    }

    async fn save_settings(&self, settings: &BackupSettings) -> Result<()> {
        *self.settings.write().await = Some(settings.clone());
        Ok(())
    }
}
