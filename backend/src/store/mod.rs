//! Entity repositories.
//!
//! The interchange pipelines never talk to the database driver directly: they
//! go through [`EntityStore`] (reads and transaction start), [`StoreTransaction`]
//! (all writes), and [`BackupHistory`] (history rows and the settings
//! singleton). PostgreSQL is the production implementation; the in-memory
//! implementation enforces the same key and foreign-key rules for tests and
//! local tooling.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::backup::{
    BackupProgress, BackupRecord, BackupSettings, BackupState, NewBackupRecord,
};

pub use memory::{MemoryBackupHistory, MemoryEntityStore};
pub use postgres::{PgBackupHistory, PgEntityStore};

/// One row as a JSON object keyed by column name.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Result of an upsert keyed by primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Read access to entity tables plus transaction start.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Row count of a table. Missing tables are `AppError::NotFound`.
    async fn count(&self, table: &str) -> Result<i64>;

    /// Every row of a table.
    async fn fetch_all(&self, table: &str) -> Result<Vec<Record>>;

    /// Rows whose `column` falls inside the inclusive `[from, to]` range.
    /// Open bounds are unfiltered.
    async fn fetch_range(
        &self,
        table: &str,
        column: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Record>>;

    /// Open a transaction. Nothing written through it is visible until commit.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;
}

/// Writes inside one database transaction.
///
/// Single-row writes are isolated: a failed row leaves the transaction usable
/// so callers can record it and continue.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Toggle referential-integrity enforcement for the rest of this transaction.
    async fn set_constraint_checks(&mut self, enabled: bool) -> Result<()>;

    /// Empty the listed tables together. Fails when a table outside the list
    /// references one inside it, so unlisted data is never wiped.
    async fn truncate(&mut self, tables: &[&str]) -> Result<()>;

    /// Insert rows, silently skipping primary/unique key conflicts.
    /// Returns how many rows were inserted.
    async fn insert_batch(&mut self, table: &str, rows: &[Record]) -> Result<u64>;

    /// Insert one row. A key conflict is `AppError::Duplicate`.
    async fn insert(&mut self, table: &str, row: &Record) -> Result<()>;

    /// Insert or update one row keyed by `key`.
    async fn upsert(&mut self, table: &str, key: &str, row: &Record) -> Result<UpsertOutcome>;

    /// Insert a junction row keyed on its FK pair. Returns false when the
    /// link already existed.
    async fn insert_link(&mut self, table: &str, row: &Record) -> Result<bool>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;
}

/// Backup history rows and the settings singleton.
#[async_trait]
pub trait BackupHistory: Send + Sync {
    async fn create(&self, record: NewBackupRecord) -> Result<BackupRecord>;

    /// Move a record to `state`, applying any populated progress fields.
    /// A move the state machine forbids is `AppError::Conflict`.
    async fn transition(
        &self,
        id: Uuid,
        state: BackupState,
        progress: BackupProgress,
    ) -> Result<BackupRecord>;

    async fn get(&self, id: Uuid) -> Result<Option<BackupRecord>>;

    /// Newest first, with the total row count.
    async fn list(&self, offset: i64, limit: i64) -> Result<(Vec<BackupRecord>, i64)>;

    /// Completed records, newest first.
    async fn list_completed(&self) -> Result<Vec<BackupRecord>>;

    async fn delete(&self, id: Uuid) -> Result<()>;

    async fn load_settings(&self) -> Result<Option<BackupSettings>>;

    async fn save_settings(&self, settings: &BackupSettings) -> Result<()>;
}

/// A history row asked to leave its current state for one it cannot reach.
pub(crate) fn illegal_transition(id: Uuid, from: BackupState, to: BackupState) -> crate::error::AppError {
    crate::error::AppError::Conflict(format!("Backup {} cannot move from {} to {}", id, from, to))
}

/// Reject anything that is not a plain SQL identifier.
pub(crate) fn checked_ident(name: &str) -> Result<&str> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(name)
    } else {
        Err(crate::error::AppError::Validation(format!(
            "Invalid identifier: {}",
            name
        )))
    }
}
