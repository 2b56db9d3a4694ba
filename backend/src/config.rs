//! Application configuration loaded from environment variables.

use crate::error::{AppError, Result};
use std::env;

/// Application configuration
#[derive(Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Server bind address (host:port)
    pub bind_address: String,

    /// Maximum pooled database connections
    pub db_max_connections: u32,

    /// Prefix prepended to every physical table name (tenant isolation)
    pub table_prefix: String,

    /// Directory used as the archive store when no Drive credentials are set
    pub backup_archive_dir: Option<String>,

    /// Upper bound for uploaded import workbooks, in bytes
    pub import_max_upload_bytes: usize,

    /// Emit JSON log lines instead of the human-readable format
    pub log_json: bool,
}

redacted_debug!(Config {
    redact database_url,
    show bind_address,
    show db_max_connections,
    show table_prefix,
    show backup_archive_dir,
    show import_max_upload_bytes,
    show log_json,
});

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| AppError::Config("DATABASE_URL not set".into()))?,
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".into())
                .parse()
                .unwrap_or(10),
            table_prefix: env::var("TABLE_PREFIX").unwrap_or_default(),
            backup_archive_dir: env::var("BACKUP_ARCHIVE_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            import_max_upload_bytes: env::var("IMPORT_MAX_UPLOAD_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20 * 1024 * 1024),
            log_json: env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        })
    }

    /// Configuration for tests and embedded use; no database URL is required.
    pub fn for_tests() -> Self {
        Self {
            database_url: String::new(),
            bind_address: "127.0.0.1:0".into(),
            db_max_connections: 1,
            table_prefix: String::new(),
            backup_archive_dir: None,
            import_max_upload_bytes: 20 * 1024 * 1024,
            log_json: false,
        }
    }
}
