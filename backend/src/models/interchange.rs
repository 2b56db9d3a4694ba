//! Transient import/export report types. Nothing here is persisted.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Import persistence mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    /// Plain insert; duplicates are skipped
    Insert,
    /// Insert or update keyed by primary key
    Upsert,
}

impl ImportMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "insert" => Some(ImportMode::Insert),
            "upsert" => Some(ImportMode::Upsert),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ImportOptions {
    pub mode: ImportMode,
    pub skip_errors: bool,
}

/// One validation problem found during preview.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ImportDiagnostic {
    pub sheet: String,
    /// Spreadsheet row number (1-based, header is row 1); 0 for sheet-level issues
    pub row: u32,
    pub field: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SheetPreview {
    pub sheet: String,
    pub entity: Option<String>,
    pub total_rows: usize,
    pub valid_rows: usize,
    pub error_rows: usize,
    pub headers: Vec<String>,
    pub unknown_headers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ImportPreview {
    pub sheets: Vec<SheetPreview>,
    pub total_rows: usize,
    pub valid_rows: usize,
    pub error_rows: usize,
    pub diagnostics: Vec<ImportDiagnostic>,
}

impl ImportPreview {
    pub fn has_errors(&self) -> bool {
        !self.diagnostics.is_empty()
    }
}

/// Outcome for a row that was skipped or failed during execute.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct RowOutcome {
    pub entity: String,
    pub row: u32,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct SheetResult {
    pub sheet: String,
    pub entity: String,
    pub inserted: usize,
    pub updated: usize,
    /// Duplicates under insert mode
    pub skipped: usize,
    /// Rows dropped under `skip_errors`
    pub failed: usize,
}

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct ImportResult {
    pub sheets: Vec<SheetResult>,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<RowOutcome>,
}

impl ImportResult {
    pub(crate) fn tally(&mut self) {
        self.inserted = self.sheets.iter().map(|s| s.inserted).sum();
        self.updated = self.sheets.iter().map(|s| s.updated).sum();
        self.skipped = self.sheets.iter().map(|s| s.skipped).sum();
        self.failed = self.sheets.iter().map(|s| s.failed).sum();
    }
}

/// Export group summary with a live record count.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GroupInfo {
    pub name: String,
    pub label: String,
    pub description: String,
    pub entity_names: Vec<String>,
    pub sheets: Vec<String>,
    pub record_count: i64,
}
