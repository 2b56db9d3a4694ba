//! Common test utilities for backend integration and handler tests
//!
//! This module provides shared infrastructure for testing:
//! - A fully wired application state over the in-memory stores
//! - A temporary archive directory acting as the remote store
//! - Workbook builders for import tests

#![allow(dead_code)]
#![allow(unused_imports)]

pub mod fixtures;

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use axum::Router;
use rust_xlsxwriter::Workbook;
use tempfile::TempDir;

use pos_keeper_backend::api::{routes::create_router, AppState, SharedState};
use pos_keeper_backend::config::Config;
use pos_keeper_backend::schema::SchemaRegistry;
use pos_keeper_backend::store::{MemoryBackupHistory, MemoryEntityStore, Record};

/// Test context containing shared resources for tests
pub struct TestApp {
    pub registry: Arc<SchemaRegistry>,
    pub store: MemoryEntityStore,
    pub history: MemoryBackupHistory,
    pub state: SharedState,
    /// Archive directory; `None` when the app runs without a remote store
    pub archive_dir: Option<TempDir>,
}

impl TestApp {
    /// App whose backups land in a temporary archive directory
    pub async fn new() -> Self {
        Self::build(true).await
    }

    /// App with no remote store at all
    pub async fn without_archive_store() -> Self {
        Self::build(false).await
    }

    async fn build(with_archive: bool) -> Self {
        let registry = Arc::new(SchemaRegistry::builtin().expect("builtin registry is valid"));
        let store = MemoryEntityStore::new(registry.clone());
        let history = MemoryBackupHistory::new();

        let archive_dir = with_archive.then(|| tempfile::tempdir().expect("create archive dir"));
        let mut config = Config::for_tests();
        config.backup_archive_dir = archive_dir
            .as_ref()
            .map(|dir| dir.path().display().to_string());

        let state = Arc::new(AppState::new(
            config,
            registry.clone(),
            Arc::new(store.clone()),
            Arc::new(history.clone()),
        ));
        state.scheduler.start().await.expect("scheduler starts");

        Self {
            registry,
            store,
            history,
            state,
            archive_dir,
        }
    }

    /// Seeded app with the full fixture dataset
    pub async fn seeded() -> Self {
        let app = Self::new().await;
        fixtures::seed_all(&app.store).await;
        app
    }

    /// Router wired exactly as in production, minus CORS
    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    /// Path of an archive in the temporary directory
    pub fn archive_path(&self, file_id: &str) -> PathBuf {
        self.archive_dir
            .as_ref()
            .expect("app has an archive dir")
            .path()
            .join(file_id)
    }
}

/// Build a record from a JSON object literal
pub fn record(value: serde_json::Value) -> Record {
    value.as_object().cloned().expect("record literal is an object")
}

/// One sheet of a test workbook; every cell is written as text
pub struct SheetSpec {
    name: String,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

pub fn sheet(name: &str, headers: &[&str]) -> SheetSpec {
    SheetSpec {
        name: name.to_string(),
        headers: headers.iter().map(|h| h.to_string()).collect(),
        rows: Vec::new(),
    }
}

impl SheetSpec {
    pub fn row(mut self, cells: &[&str]) -> Self {
        self.rows.push(cells.iter().map(|c| c.to_string()).collect());
        self
    }
}

/// Render sheets into `.xlsx` bytes
pub fn workbook(sheets: Vec<SheetSpec>) -> Vec<u8> {
    let mut workbook = Workbook::new();
    for spec in &sheets {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(&spec.name).expect("valid sheet name");
        for (col, header) in spec.headers.iter().enumerate() {
            worksheet
                .write_string(0, col as u16, header)
                .expect("write header");
        }
        for (idx, cells) in spec.rows.iter().enumerate() {
            for (col, cell) in cells.iter().enumerate() {
                if cell.is_empty() {
                    continue;
                }
                worksheet
                    .write_string(idx as u32 + 1, col as u16, cell)
                    .expect("write cell");
            }
        }
    }
    workbook.save_to_buffer().expect("save workbook")
}

/// Multipart request body carrying a workbook and optional form fields
pub fn multipart_request(uri: &str, file: &[u8], fields: &[(&str, &str)]) -> Request<Body> {
    let boundary = "----pos-keeper-test-boundary";
    let mut body = Vec::new();

    for (name, value) in fields {
        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
        );
        body.extend_from_slice(value.as_bytes());
        body.extend_from_slice(b"\r\n");
    }

    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"file\"; filename=\"import.xlsx\"\r\n",
    );
    body.extend_from_slice(
        b"Content-Type: application/vnd.openxmlformats-officedocument.spreadsheetml.sheet\r\n\r\n",
    );
    body.extend_from_slice(file);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(body))
        .expect("valid request")
}
