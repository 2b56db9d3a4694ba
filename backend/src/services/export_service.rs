//! Spreadsheet export service.
//!
//! Entities are exported in named groups, one worksheet per sheet mapping.
//! Columns come from the schema registry, so a template produced here has
//! exactly the headers the importer expects.

use chrono::{DateTime, NaiveDate, Utc};
use rust_xlsxwriter::Workbook;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use crate::error::{AppError, Result};
use crate::models::interchange::GroupInfo;
use crate::schema::{EntityMapping, SchemaRegistry};
use crate::services::spreadsheet;
use crate::store::{EntityStore, Record};

/// Static export group definition
#[derive(Debug, Clone, Copy)]
pub struct ExportGroup {
    pub name: &'static str,
    pub label: &'static str,
    pub description: &'static str,
    /// Sheet names in worksheet order
    pub sheets: &'static [&'static str],
}

pub const EXPORT_GROUPS: &[ExportGroup] = &[
    ExportGroup {
        name: "catalog",
        label: "Catalog",
        description: "Categories, units, items and their variants",
        sheets: &["Categories", "Units", "Items", "Item Variants", "Item-Categories"],
    },
    ExportGroup {
        name: "customers",
        label: "Customers",
        description: "Customer records and discount codes",
        sheets: &["Customers", "Discounts"],
    },
    ExportGroup {
        name: "sales",
        label: "Sales",
        description: "Orders with line items, payments, tables and payment methods",
        sheets: &["Orders", "Order Items", "Payments", "Tables", "Payment Methods"],
    },
    ExportGroup {
        name: "expenses",
        label: "Expenses",
        description: "Expense categories and recorded expenses",
        sheets: &["Expense Categories", "Expenses"],
    },
    ExportGroup {
        name: "staff",
        label: "Staff",
        description: "Staff accounts without credentials",
        sheets: &["Users"],
    },
];

pub fn find_group(name: &str) -> Result<&'static ExportGroup> {
    let wanted = name.trim();
    EXPORT_GROUPS
        .iter()
        .find(|g| g.name.eq_ignore_ascii_case(wanted))
        .ok_or_else(|| AppError::Validation(format!("Unknown export group '{}'", wanted)))
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    pub groups: Vec<String>,
    pub date_from: Option<NaiveDate>,
    /// Inclusive to the end of the day
    pub date_to: Option<NaiveDate>,
}

impl ExportRequest {
    fn bounds(&self) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)> {
        let from = self
            .date_from
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc());
        let to = self
            .date_to
            .and_then(|d| d.and_hms_micro_opt(23, 59, 59, 999_999))
            .map(|naive| naive.and_utc());
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(AppError::Validation(
                    "dateFrom must not be after dateTo".to_string(),
                ));
            }
        }
        Ok((from, to))
    }
}

/// Export service
pub struct ExportService {
    registry: Arc<SchemaRegistry>,
    store: Arc<dyn EntityStore>,
}

impl ExportService {
    pub fn new(registry: Arc<SchemaRegistry>, store: Arc<dyn EntityStore>) -> Self {
        Self { registry, store }
    }

    fn sheet_mapping(&self, sheet: &str) -> Result<&EntityMapping> {
        self.registry
            .mapping_for_sheet(sheet)
            .ok_or_else(|| AppError::Internal(format!("Export sheet '{}' has no mapping", sheet)))
    }

    /// Every group with a freshly counted number of records.
    pub async fn get_groups(&self) -> Result<Vec<GroupInfo>> {
        let mut groups = Vec::with_capacity(EXPORT_GROUPS.len());
        for group in EXPORT_GROUPS {
            let mut record_count = 0;
            let mut entity_names = Vec::new();
            for sheet in group.sheets {
                let mapping = self.sheet_mapping(sheet)?;
                entity_names.push(mapping.entity_name.clone());
                record_count += match self.store.count(&mapping.table_name).await {
                    Ok(n) => n,
                    Err(AppError::NotFound(_)) => 0,
                    Err(e) => return Err(e),
                };
            }
            groups.push(GroupInfo {
                name: group.name.to_string(),
                label: group.label.to_string(),
                description: group.description.to_string(),
                entity_names,
                sheets: group.sheets.iter().map(|s| s.to_string()).collect(),
                record_count,
            });
        }
        Ok(groups)
    }

    /// Render the requested groups into one workbook.
    pub async fn export_to_excel(
        &self,
        request: &ExportRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        if request.groups.is_empty() {
            return Err(AppError::Validation(
                "At least one export group is required".to_string(),
            ));
        }
        let groups = request
            .groups
            .iter()
            .map(|name| find_group(name))
            .collect::<Result<Vec<_>>>()?;
        let (from, to) = request.bounds()?;

        let mut seen = HashSet::new();
        let mut sheets: Vec<(&EntityMapping, Vec<Record>)> = Vec::new();
        for group in &groups {
            for sheet in group.sheets {
                if !seen.insert(*sheet) {
                    continue;
                }
                if cancel.is_cancelled() {
                    tracing::info!(sheet = %sheet, "Export cancelled");
                    return Err(AppError::Cancelled("Export cancelled".to_string()));
                }
                let mapping = self.sheet_mapping(sheet)?;
                let rows = self.fetch(mapping, from, to).await?;
                tracing::debug!(sheet = %sheet, rows = rows.len(), "Fetched export sheet");
                sheets.push((mapping, rows));
            }
        }

        let bytes = render(&sheets)?;
        tracing::info!(
            groups = ?request.groups,
            sheets = sheets.len(),
            size_bytes = bytes.len(),
            "Export workbook generated"
        );
        Ok(bytes)
    }

    /// Header-only workbook for one group.
    pub fn generate_template(&self, group: &str) -> Result<Vec<u8>> {
        let group = find_group(group)?;
        let sheets = group
            .sheets
            .iter()
            .map(|sheet| self.sheet_mapping(sheet).map(|m| (m, Vec::new())))
            .collect::<Result<Vec<_>>>()?;
        render(&sheets)
    }

    async fn fetch(
        &self,
        mapping: &EntityMapping,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Record>> {
        let result = match (&mapping.date_column, mapping.is_junction(), from.or(to)) {
            (Some(column), false, Some(_)) => {
                self.store
                    .fetch_range(&mapping.table_name, column, from, to)
                    .await
            }
            _ => self.store.fetch_all(&mapping.table_name).await,
        };
        match result {
            Ok(mut rows) => {
                for row in &mut rows {
                    mapping.strip_secrets(row);
                }
                Ok(rows)
            }
            Err(AppError::NotFound(_)) => {
                tracing::warn!(table = %mapping.table_name, "Export table missing, sheet left empty");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }
}

fn render(sheets: &[(&EntityMapping, Vec<Record>)]) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    for (mapping, rows) in sheets {
        spreadsheet::write_sheet(&mut workbook, mapping, rows)?;
    }
    Ok(workbook.save_to_buffer()?)
}
