//! PostgreSQL-backed entity store and backup history.
//!
//! Rows travel as JSON: dumps use `to_jsonb(t)` and writes go through
//! `jsonb_populate_record(set)` so one code path serves every registry table.
//! Physical table names are the registry table name behind the configured
//! tenant prefix.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::{
    checked_ident, illegal_transition, BackupHistory, EntityStore, Record, StoreTransaction,
    UpsertOutcome,
};
use crate::error::{AppError, Result};
use crate::models::backup::{
    BackupProgress, BackupRecord, BackupSettings, BackupState, NewBackupRecord,
};

fn qualified(prefix: &str, table: &str) -> Result<String> {
    let physical = format!("{}{}", prefix, table);
    Ok(format!("\"{}\"", checked_ident(&physical)?))
}

fn quoted(column: &str) -> Result<String> {
    Ok(format!("\"{}\"", checked_ident(column)?))
}

/// Union of the keys of every row, as quoted identifiers.
fn column_list<'a>(rows: impl IntoIterator<Item = &'a Record>) -> Result<Vec<String>> {
    let names: BTreeSet<&str> = rows
        .into_iter()
        .flat_map(|row| row.keys().map(String::as_str))
        .collect();
    names.into_iter().map(quoted).collect()
}

fn into_records(values: Vec<Value>) -> Vec<Record> {
    values
        .into_iter()
        .filter_map(|value| match value {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect()
}

#[derive(Clone)]
pub struct PgEntityStore {
    pool: PgPool,
    prefix: String,
}

impl PgEntityStore {
    pub fn new(pool: PgPool, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl EntityStore for PgEntityStore {
    async fn count(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", qualified(&self.prefix, table)?);
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn fetch_all(&self, table: &str) -> Result<Vec<Record>> {
        let sql = format!("SELECT to_jsonb(t) FROM {} t", qualified(&self.prefix, table)?);
        let rows: Vec<Value> = sqlx::query_scalar(&sql).fetch_all(&self.pool).await?;
        Ok(into_records(rows))
    }

    async fn fetch_range(
        &self,
        table: &str,
        column: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Record>> {
        let column = quoted(column)?;
        let sql = format!(
            r#"
            SELECT to_jsonb(t) FROM {table} t
            WHERE ($1::timestamptz IS NULL OR t.{column} >= $1)
              AND ($2::timestamptz IS NULL OR t.{column} <= $2)
            "#,
            table = qualified(&self.prefix, table)?,
            column = column,
        );
        let rows: Vec<Value> = sqlx::query_scalar(&sql)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?;
        Ok(into_records(rows))
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTransaction {
            tx: Some(tx),
            prefix: self.prefix.clone(),
        }))
    }
}

pub struct PgStoreTransaction {
    tx: Option<Transaction<'static, Postgres>>,
    prefix: String,
}

impl PgStoreTransaction {
    fn tx(&mut self) -> Result<&mut Transaction<'static, Postgres>> {
        self.tx
            .as_mut()
            .ok_or_else(|| AppError::Internal("transaction already finished".to_string()))
    }

    async fn exec(&mut self, sql: &str) -> Result<()> {
        sqlx::query(sql).execute(&mut **self.tx()?).await?;
        Ok(())
    }

    /// Close the per-row savepoint, undoing the row when it failed.
    async fn end_row(&mut self, ok: bool) -> Result<()> {
        if ok {
            self.exec("RELEASE SAVEPOINT row_write").await
        } else {
            self.exec("ROLLBACK TO SAVEPOINT row_write").await
        }
    }

    fn insert_sql(&self, table: &str, row: &Record, tail: &str) -> Result<String> {
        let table = qualified(&self.prefix, table)?;
        let columns = column_list([row])?.join(", ");
        Ok(format!(
            "INSERT INTO {table} ({columns}) SELECT {columns} FROM jsonb_populate_record(NULL::{table}, $1::jsonb) {tail}",
        ))
    }
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn set_constraint_checks(&mut self, enabled: bool) -> Result<()> {
        // SET LOCAL reverts on COMMIT or ROLLBACK
        let role = if enabled { "origin" } else { "replica" };
        self.exec(&format!("SET LOCAL session_replication_role = '{}'", role))
            .await
    }

    async fn truncate(&mut self, tables: &[&str]) -> Result<()> {
        if tables.is_empty() {
            return Ok(());
        }
        let targets = tables
            .iter()
            .map(|table| qualified(&self.prefix, table))
            .collect::<Result<Vec<_>>>()?;
        // No CASCADE: a referencing table left off the list is an error
        let sql = format!("TRUNCATE TABLE {} RESTART IDENTITY", targets.join(", "));
        self.exec(&sql).await
    }

    async fn insert_batch(&mut self, table: &str, rows: &[Record]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let target = qualified(&self.prefix, table)?;
        let columns = column_list(rows)?.join(", ");
        let sql = format!(
            "INSERT INTO {target} ({columns}) SELECT {columns} FROM jsonb_populate_recordset(NULL::{target}, $1::jsonb) ON CONFLICT DO NOTHING",
        );
        let payload = Value::Array(rows.iter().cloned().map(Value::Object).collect());
        let result = sqlx::query(&sql)
            .bind(payload)
            .execute(&mut **self.tx()?)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert(&mut self, table: &str, row: &Record) -> Result<()> {
        let sql = self.insert_sql(table, row, "")?;
        self.exec("SAVEPOINT row_write").await?;
        let result = sqlx::query(&sql)
            .bind(Value::Object(row.clone()))
            .execute(&mut **self.tx()?)
            .await;
        self.end_row(result.is_ok()).await?;
        result?;
        Ok(())
    }

    async fn upsert(&mut self, table: &str, key: &str, row: &Record) -> Result<UpsertOutcome> {
        let key_column = quoted(key)?;
        let updates: Vec<String> = column_list([row])?
            .into_iter()
            .filter(|c| *c != key_column)
            .map(|c| format!("{c} = EXCLUDED.{c}"))
            .collect();
        let set = if updates.is_empty() {
            format!("{k} = EXCLUDED.{k}", k = key_column)
        } else {
            updates.join(", ")
        };
        // xmax is zero only for freshly inserted tuples.
        let tail = format!(
            "ON CONFLICT ({}) DO UPDATE SET {} RETURNING (xmax = 0)",
            key_column, set
        );
        let sql = self.insert_sql(table, row, &tail)?;

        self.exec("SAVEPOINT row_write").await?;
        let result: std::result::Result<bool, sqlx::Error> = sqlx::query_scalar(&sql)
            .bind(Value::Object(row.clone()))
            .fetch_one(&mut **self.tx()?)
            .await;
        self.end_row(result.is_ok()).await?;
        Ok(if result? {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Updated
        })
    }

    async fn insert_link(&mut self, table: &str, row: &Record) -> Result<bool> {
        let sql = self.insert_sql(table, row, "ON CONFLICT DO NOTHING")?;
        self.exec("SAVEPOINT row_write").await?;
        let result = sqlx::query(&sql)
            .bind(Value::Object(row.clone()))
            .execute(&mut **self.tx()?)
            .await;
        self.end_row(result.is_ok()).await?;
        Ok(result?.rows_affected() == 1)
    }

    async fn commit(&mut self) -> Result<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| AppError::Internal("transaction already finished".to_string()))?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }
}

const RECORD_COLUMNS: &str = "id, filename, remote_file_id, file_size_bytes, total_records, \
     entity_counts, format_version, kind, state, error_message, created_by, created_at, updated_at";

const SETTINGS_COLUMNS: &str = "auto_backup_enabled, schedule_kind, cron_expression, \
     retention_days, max_backups, drive_service_account_email, drive_private_key, \
     drive_folder_id, updated_at";

/// History rows live in `backup_records`; settings in the `backup_settings`
/// singleton row (`id = 1`).
#[derive(Clone)]
pub struct PgBackupHistory {
    pool: PgPool,
}

impl PgBackupHistory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BackupHistory for PgBackupHistory {
    async fn create(&self, new: NewBackupRecord) -> Result<BackupRecord> {
        let sql = format!(
            r#"
            INSERT INTO backup_records (id, filename, format_version, kind, state, created_by)
            VALUES ($1, $2, $3, $4, 'in_progress', $5)
            RETURNING {RECORD_COLUMNS}
            "#
        );
        let record = sqlx::query_as::<_, BackupRecord>(&sql)
            .bind(new.id)
            .bind(&new.filename)
            .bind(&new.format_version)
            .bind(new.kind)
            .bind(new.created_by)
            .fetch_one(&self.pool)
            .await?;
        Ok(record)
    }

    async fn transition(
        &self,
        id: Uuid,
        state: BackupState,
        progress: BackupProgress,
    ) -> Result<BackupRecord> {
        let counts = progress
            .entity_counts
            .map(serde_json::to_value)
            .transpose()?;
        let sql = format!(
            r#"
            UPDATE backup_records SET
                state = $2,
                remote_file_id = COALESCE($3, remote_file_id),
                file_size_bytes = COALESCE($4, file_size_bytes),
                total_records = COALESCE($5, total_records),
                entity_counts = COALESCE($6, entity_counts),
                error_message = COALESCE($7, error_message),
                updated_at = NOW()
            WHERE id = $1 AND state::text = ANY($8)
            RETURNING {RECORD_COLUMNS}
            "#
        );
        let sources: Vec<String> = BackupState::sources_of(state)
            .iter()
            .map(ToString::to_string)
            .collect();
        let updated = sqlx::query_as::<_, BackupRecord>(&sql)
            .bind(id)
            .bind(state)
            .bind(progress.remote_file_id)
            .bind(progress.file_size_bytes)
            .bind(progress.total_records)
            .bind(counts)
            .bind(progress.error_message)
            .bind(sources)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(record) = updated {
            return Ok(record);
        }
        match self.get(id).await? {
            Some(current) => Err(illegal_transition(id, current.state, state)),
            None => Err(AppError::NotFound(format!("Backup {} not found", id))),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<BackupRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM backup_records WHERE id = $1");
        let record = sqlx::query_as::<_, BackupRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn list(&self, offset: i64, limit: i64) -> Result<(Vec<BackupRecord>, i64)> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM backup_records ORDER BY created_at DESC OFFSET $1 LIMIT $2"
        );
        let records = sqlx::query_as::<_, BackupRecord>(&sql)
            .bind(offset)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM backup_records")
            .fetch_one(&self.pool)
            .await?;
        Ok((records, total))
    }

    async fn list_completed(&self) -> Result<Vec<BackupRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM backup_records WHERE state = 'completed' ORDER BY created_at DESC"
        );
        let records = sqlx::query_as::<_, BackupRecord>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM backup_records WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Backup {} not found", id)));
        }
        Ok(())
    }

    async fn load_settings(&self) -> Result<Option<BackupSettings>> {
        let sql = format!("SELECT {SETTINGS_COLUMNS} FROM backup_settings WHERE id = 1");
        let settings = sqlx::query_as::<_, BackupSettings>(&sql)
            .fetch_optional(&self.pool)
            .await?;
        Ok(settings)
    }

    async fn save_settings(&self, settings: &BackupSettings) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO backup_settings (
                id, auto_backup_enabled, schedule_kind, cron_expression, retention_days,
                max_backups, drive_service_account_email, drive_private_key, drive_folder_id,
                updated_at
            )
            VALUES (1, $1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                auto_backup_enabled = EXCLUDED.auto_backup_enabled,
                schedule_kind = EXCLUDED.schedule_kind,
                cron_expression = EXCLUDED.cron_expression,
                retention_days = EXCLUDED.retention_days,
                max_backups = EXCLUDED.max_backups,
                drive_service_account_email = EXCLUDED.drive_service_account_email,
                drive_private_key = EXCLUDED.drive_private_key,
                drive_folder_id = EXCLUDED.drive_folder_id,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(settings.auto_backup_enabled)
        .bind(settings.schedule_kind)
        .bind(&settings.cron_expression)
        .bind(settings.retention_days)
        .bind(settings.max_backups)
        .bind(&settings.drive_service_account_email)
        .bind(&settings.drive_private_key)
        .bind(&settings.drive_folder_id)
        .bind(settings.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
