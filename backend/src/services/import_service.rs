//! Spreadsheet import service.
//!
//! Preview validates every row against the schema registry without touching
//! the database. Execute converts valid rows into entity records and writes
//! them in dependency phases inside a single transaction.

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::interchange::{
    ImportDiagnostic, ImportMode, ImportOptions, ImportPreview, ImportResult, RowOutcome,
    SheetPreview, SheetResult,
};
use crate::schema::{normalize_header, ColumnSpec, EntityMapping, SchemaRegistry};
use crate::services::operation_guard::{OperationGuard, OperationKind};
use crate::services::spreadsheet::{self, SheetData, SheetRow};
use crate::store::{EntityStore, Record, StoreTransaction, UpsertOutcome};

/// What a header cell resolved to.
#[derive(Debug, Clone, Copy)]
enum HeaderMatch<'m> {
    Field(&'m str, &'m ColumnSpec),
    /// Known but never imported (secrets, skip fields)
    Ignored,
    Unknown,
    Blank,
}

fn resolve_header<'m>(mapping: &'m EntityMapping, raw: &str) -> HeaderMatch<'m> {
    let normalized = normalize_header(raw);
    if normalized.is_empty() {
        return HeaderMatch::Blank;
    }
    let column = mapping
        .columns
        .iter()
        .find(|(name, _)| *name == normalized)
        .or_else(|| {
            // A header may also use the remapped property name.
            let header = mapping.header_for(&normalized);
            mapping.columns.iter().find(|(name, _)| name == header)
        });
    match column {
        Some((name, spec)) if spec.secret || mapping.skip_fields.contains(name) => HeaderMatch::Ignored,
        Some((name, spec)) => HeaderMatch::Field(name.as_str(), spec),
        None => HeaderMatch::Unknown,
    }
}

/// Header fields to entity properties, with relation columns nested as
/// `{relation: {id}}` references.
pub(crate) fn convert_record(mapping: &EntityMapping, values: BTreeMap<&str, Value>) -> Record {
    let mut record = Record::new();
    for (field, value) in values {
        match mapping.relation_mappings.get(field) {
            Some(relation) => {
                record.insert(relation.property.clone(), json!({ "id": value }));
            }
            None => {
                record.insert(mapping.property_for(field).to_string(), value);
            }
        }
    }
    record
}

#[derive(Debug)]
struct ParsedRow {
    number: u32,
    record: std::result::Result<Record, Vec<ImportDiagnostic>>,
}

#[derive(Debug)]
struct ParsedSheet<'r> {
    name: String,
    mapping: Option<&'r EntityMapping>,
    headers: Vec<String>,
    unknown_headers: Vec<String>,
    rows: Vec<ParsedRow>,
    /// Sheet-level problems (unknown sheet)
    diagnostics: Vec<ImportDiagnostic>,
}

impl ParsedSheet<'_> {
    fn invalid_rows(&self) -> impl Iterator<Item = (u32, &Vec<ImportDiagnostic>)> {
        self.rows
            .iter()
            .filter_map(|row| row.record.as_ref().err().map(|d| (row.number, d)))
    }

    fn preview(&self) -> SheetPreview {
        let error_rows = self.invalid_rows().count();
        SheetPreview {
            sheet: self.name.clone(),
            entity: self.mapping.map(|m| m.entity_name.clone()),
            total_rows: self.rows.len(),
            valid_rows: self.rows.len() - error_rows,
            error_rows,
            headers: self.headers.clone(),
            unknown_headers: self.unknown_headers.clone(),
        }
    }
}

/// Import service
pub struct ImportService {
    registry: Arc<SchemaRegistry>,
    store: Arc<dyn EntityStore>,
    guard: OperationGuard,
}

impl ImportService {
    pub fn new(registry: Arc<SchemaRegistry>, store: Arc<dyn EntityStore>, guard: OperationGuard) -> Self {
        Self {
            registry,
            store,
            guard,
        }
    }

    /// Validate a workbook. Never writes.
    pub fn parse_and_preview(&self, bytes: &[u8]) -> Result<ImportPreview> {
        let sheets = spreadsheet::read_workbook(bytes)?;
        let parsed: Vec<ParsedSheet> = sheets.iter().map(|s| self.parse_sheet(s)).collect();

        let previews: Vec<SheetPreview> = parsed.iter().map(ParsedSheet::preview).collect();
        let mut diagnostics = Vec::new();
        for sheet in &parsed {
            diagnostics.extend(sheet.diagnostics.iter().cloned());
            for (_, row_diagnostics) in sheet.invalid_rows() {
                diagnostics.extend(row_diagnostics.iter().cloned());
            }
        }

        let preview = ImportPreview {
            total_rows: previews.iter().map(|p| p.total_rows).sum(),
            valid_rows: previews.iter().map(|p| p.valid_rows).sum(),
            error_rows: previews.iter().map(|p| p.error_rows).sum(),
            sheets: previews,
            diagnostics,
        };
        tracing::info!(
            sheets = preview.sheets.len(),
            total_rows = preview.total_rows,
            error_rows = preview.error_rows,
            "Import preview generated"
        );
        Ok(preview)
    }

    fn parse_sheet<'r>(&'r self, sheet: &SheetData) -> ParsedSheet<'r> {
        let Some(mapping) = self.registry.mapping_for_sheet(&sheet.name) else {
            return ParsedSheet {
                name: sheet.name.clone(),
                mapping: None,
                headers: sheet.headers.clone(),
                unknown_headers: Vec::new(),
                rows: Vec::new(),
                diagnostics: vec![ImportDiagnostic {
                    sheet: sheet.name.clone(),
                    row: 0,
                    field: None,
                    message: format!("Unknown sheet '{}', skipped", sheet.name),
                }],
            };
        };

        let columns: Vec<HeaderMatch> = sheet
            .headers
            .iter()
            .map(|h| resolve_header(mapping, h))
            .collect();
        let unknown_headers = sheet
            .headers
            .iter()
            .zip(&columns)
            .filter(|(_, c)| matches!(c, HeaderMatch::Unknown))
            .map(|(h, _)| h.clone())
            .collect();

        let rows = sheet
            .rows
            .iter()
            .map(|row| ParsedRow {
                number: row.number,
                record: parse_row(&sheet.name, mapping, &columns, row),
            })
            .collect();

        ParsedSheet {
            name: sheet.name.clone(),
            mapping: Some(mapping),
            headers: sheet.headers.clone(),
            unknown_headers,
            rows,
            diagnostics: Vec::new(),
        }
    }

    /// Import a workbook in one transaction.
    ///
    /// Duplicates under insert mode are always skipped. Any other row failure
    /// aborts and rolls back unless `skip_errors` is set, in which case the
    /// row is reported and the import continues.
    pub async fn execute_import(
        &self,
        bytes: &[u8],
        options: ImportOptions,
        cancel: &CancellationToken,
    ) -> Result<ImportResult> {
        let _permit = self.guard.try_acquire(OperationKind::Import)?;

        let sheets = spreadsheet::read_workbook(bytes)?;
        let parsed: Vec<ParsedSheet> = sheets.iter().map(|s| self.parse_sheet(s)).collect();

        for sheet in parsed.iter().filter(|s| s.mapping.is_none()) {
            tracing::warn!(sheet = %sheet.name, "Unknown sheet skipped");
        }

        if !options.skip_errors {
            let invalid: Vec<&ImportDiagnostic> = parsed
                .iter()
                .flat_map(|s| s.invalid_rows().flat_map(|(_, d)| d.iter()))
                .collect();
            if let Some(first) = invalid.first() {
                return Err(AppError::Validation(format!(
                    "{} validation problem(s); first at {} row {}: {}",
                    invalid.len(),
                    first.sheet,
                    first.row,
                    first.message
                )));
            }
        }

        tracing::info!(
            mode = ?options.mode,
            skip_errors = options.skip_errors,
            sheets = parsed.len(),
            "Import started"
        );

        let mut result = ImportResult::default();
        let mut tx = self.store.begin().await?;
        match self
            .persist(tx.as_mut(), &parsed, options, cancel, &mut result)
            .await
        {
            Ok(()) => {
                tx.commit().await?;
                result.tally();
                tracing::info!(
                    inserted = result.inserted,
                    updated = result.updated,
                    skipped = result.skipped,
                    failed = result.failed,
                    "Import completed"
                );
                Ok(result)
            }
            Err(e) => {
                tracing::error!(error = %e, "Import failed, rolling back");
                if let Err(rb) = tx.rollback().await {
                    tracing::error!(error = %rb, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn persist(
        &self,
        tx: &mut dyn StoreTransaction,
        parsed: &[ParsedSheet<'_>],
        options: ImportOptions,
        cancel: &CancellationToken,
        result: &mut ImportResult,
    ) -> Result<()> {
        for (phase_idx, phase) in self.registry.import_phases().iter().enumerate() {
            for mapping in phase {
                let sheets = parsed.iter().filter(|s| {
                    s.mapping
                        .map(|m| m.entity_name == mapping.entity_name)
                        .unwrap_or(false)
                });
                for sheet in sheets {
                    tracing::debug!(
                        phase = phase_idx,
                        sheet = %sheet.name,
                        rows = sheet.rows.len(),
                        "Importing sheet"
                    );
                    let sheet_result = persist_sheet(tx, mapping, sheet, options, cancel, result).await?;
                    result.sheets.push(sheet_result);
                }
            }
        }
        Ok(())
    }
}

fn parse_row(
    sheet: &str,
    mapping: &EntityMapping,
    columns: &[HeaderMatch<'_>],
    row: &SheetRow,
) -> std::result::Result<Record, Vec<ImportDiagnostic>> {
    let diagnostic = |field: &str, message: String| ImportDiagnostic {
        sheet: sheet.to_string(),
        row: row.number,
        field: Some(field.to_string()),
        message,
    };

    let mut values: BTreeMap<&str, Value> = BTreeMap::new();
    let mut diagnostics = Vec::new();

    for (idx, column) in columns.iter().enumerate() {
        let HeaderMatch::Field(field, spec) = *column else {
            continue;
        };
        let raw = row.cell(idx);
        if raw.is_empty() || values.contains_key(field) {
            continue;
        }
        match spec.parse_cell(raw) {
            Ok(value) => {
                values.insert(field, value);
            }
            Err(message) => diagnostics.push(diagnostic(field, message)),
        }
    }

    for required in &mapping.required_fields {
        let reported = diagnostics
            .iter()
            .any(|d| d.field.as_deref() == Some(required.as_str()));
        if !values.contains_key(required.as_str()) && !reported {
            diagnostics.push(diagnostic(required, format!("'{}' is required", required)));
        }
    }

    if diagnostics.is_empty() {
        Ok(convert_record(mapping, values))
    } else {
        Err(diagnostics)
    }
}

/// Flat table row for a converted record; entity rows get an id when missing.
fn persistable(mapping: &EntityMapping, record: &Record) -> Record {
    let mut row = mapping.flatten_relations(record.clone());
    if let Some(pk) = &mapping.primary_key {
        if row.get(pk).map_or(true, Value::is_null) {
            row.insert(pk.clone(), Value::String(Uuid::new_v4().to_string()));
        }
    }
    row
}

async fn persist_sheet(
    tx: &mut dyn StoreTransaction,
    mapping: &EntityMapping,
    sheet: &ParsedSheet<'_>,
    options: ImportOptions,
    cancel: &CancellationToken,
    result: &mut ImportResult,
) -> Result<SheetResult> {
    let mut outcome = SheetResult {
        sheet: sheet.name.clone(),
        entity: mapping.entity_name.clone(),
        ..Default::default()
    };
    let report = |row: u32, message: String| RowOutcome {
        entity: mapping.entity_name.clone(),
        row,
        message,
    };

    for parsed in &sheet.rows {
        if cancel.is_cancelled() {
            tracing::info!(sheet = %sheet.name, row = parsed.number, "Import cancelled");
            return Err(AppError::Cancelled("Import cancelled".to_string()));
        }

        let record = match &parsed.record {
            Ok(record) => record,
            Err(diagnostics) => {
                // Only reachable under skip_errors; invalid rows abort earlier otherwise.
                let message = diagnostics
                    .iter()
                    .map(|d| d.message.as_str())
                    .collect::<Vec<_>>()
                    .join("; ");
                outcome.failed += 1;
                result.errors.push(report(parsed.number, message));
                continue;
            }
        };
        let row = persistable(mapping, record);

        let written = if mapping.is_junction() {
            tx.insert_link(&mapping.table_name, &row).await.map(|inserted| {
                if inserted {
                    outcome.inserted += 1;
                } else {
                    outcome.skipped += 1;
                    result
                        .errors
                        .push(report(parsed.number, "Link already exists, skipped".to_string()));
                }
            })
        } else {
            match options.mode {
                ImportMode::Insert => match tx.insert(&mapping.table_name, &row).await {
                    Ok(()) => {
                        outcome.inserted += 1;
                        Ok(())
                    }
                    Err(AppError::Duplicate(message)) => {
                        outcome.skipped += 1;
                        result
                            .errors
                            .push(report(parsed.number, format!("Duplicate, skipped: {}", message)));
                        Ok(())
                    }
                    Err(e) => Err(e),
                },
                ImportMode::Upsert => {
                    let key = mapping.primary_key.as_deref().unwrap_or("id");
                    tx.upsert(&mapping.table_name, key, &row).await.map(|o| match o {
                        UpsertOutcome::Inserted => outcome.inserted += 1,
                        UpsertOutcome::Updated => outcome.updated += 1,
                    })
                }
            }
        };

        if let Err(e) = written {
            if !options.skip_errors {
                tracing::warn!(
                    sheet = %sheet.name,
                    row = parsed.number,
                    error = %e,
                    "Import row failed"
                );
                return Err(e);
            }
            outcome.failed += 1;
            result.errors.push(report(parsed.number, e.to_string()));
        }
    }

    Ok(outcome)
}
