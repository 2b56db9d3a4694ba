//! Workbook reading and writing helpers.
//!
//! Reading flattens every cell to trimmed text so validation has one input
//! shape regardless of how the spreadsheet typed it. Writing renders the
//! styled sheets shared by exports and import templates.

use calamine::{Data, Reader, Xlsx};
use rust_xlsxwriter::{Color, Format, Workbook};
use serde_json::Value;
use std::io::Cursor;

use crate::error::Result;
use crate::schema::{ColumnKind, EntityMapping};
use crate::store::Record;

/// MIME type for `.xlsx` responses
pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Header row fill
const HEADER_FILL: u32 = 0xD9D9D9;

/// One worksheet as text.
#[derive(Debug, Clone)]
pub struct SheetData {
    pub name: String,
    /// Header cells as written in the workbook
    pub headers: Vec<String>,
    /// Data rows only; blank rows are dropped
    pub rows: Vec<SheetRow>,
}

#[derive(Debug, Clone)]
pub struct SheetRow {
    /// 1-based spreadsheet row number
    pub number: u32,
    pub cells: Vec<String>,
}

impl SheetRow {
    pub fn cell(&self, idx: usize) -> &str {
        self.cells.get(idx).map(String::as_str).unwrap_or("")
    }
}

/// Text form of a cell. Native dates become ISO strings.
pub fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{}", *f as i64)
            } else {
                f.to_string()
            }
        }
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(ts) if ts.time() == chrono::NaiveTime::MIN => ts.format("%Y-%m-%d").to_string(),
            Some(ts) => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => dt.as_f64().to_string(),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.trim().to_string(),
        Data::Error(e) => format!("#{}", e),
    }
}

/// Read every worksheet of an `.xlsx` file.
pub fn read_workbook(bytes: &[u8]) -> Result<Vec<SheetData>> {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes))?;
    let mut sheets = Vec::new();

    for name in workbook.sheet_names() {
        let range = workbook.worksheet_range(&name)?;
        let first_row = range.start().map(|(row, _)| row).unwrap_or(0);
        let mut rows = range.rows().enumerate();

        let headers = match rows.next() {
            Some((_, header)) => header.iter().map(cell_to_string).collect(),
            None => Vec::new(),
        };

        let rows = rows
            .map(|(idx, cells)| SheetRow {
                number: first_row + idx as u32 + 1,
                cells: cells.iter().map(cell_to_string).collect(),
            })
            .filter(|row| row.cells.iter().any(|c| !c.is_empty()))
            .collect();

        sheets.push(SheetData {
            name,
            headers,
            rows,
        });
    }
    Ok(sheets)
}

fn column_width(kind: ColumnKind, header: &str) -> f64 {
    let base: f64 = match kind {
        ColumnKind::Uuid => 38.0,
        ColumnKind::Timestamp => 22.0,
        ColumnKind::Date | ColumnKind::Time => 12.0,
        ColumnKind::Boolean | ColumnKind::Integer => 10.0,
        ColumnKind::Number | ColumnKind::Decimal => 12.0,
        ColumnKind::Enum => 14.0,
        ColumnKind::String => 24.0,
    };
    base.max(header.len() as f64 + 4.0)
}

/// Append one styled sheet: bold gray header, frozen header row, autofilter,
/// and typed cells for numbers and booleans.
pub fn write_sheet(workbook: &mut Workbook, mapping: &EntityMapping, rows: &[Record]) -> Result<()> {
    let header_format = Format::new()
        .set_bold()
        .set_background_color(Color::RGB(HEADER_FILL));

    let fields: Vec<_> = mapping.exported_fields().collect();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(&mapping.sheet_name)?;

    for (col, (field, spec)) in fields.iter().enumerate() {
        let col = col as u16;
        worksheet.write_string_with_format(0, col, *field, &header_format)?;
        worksheet.set_column_width(col, column_width(spec.kind, field))?;
    }

    for (idx, row) in rows.iter().enumerate() {
        let row_num = idx as u32 + 1;
        for (col, (field, spec)) in fields.iter().enumerate() {
            let col = col as u16;
            let Some(value) = row.get(mapping.property_for(field)) else {
                continue;
            };
            match (spec.kind, value) {
                (_, Value::Null) => {}
                (ColumnKind::Number | ColumnKind::Decimal | ColumnKind::Integer, Value::Number(n)) => {
                    if let Some(n) = n.as_f64() {
                        worksheet.write_number(row_num, col, n)?;
                    }
                }
                (ColumnKind::Number | ColumnKind::Decimal | ColumnKind::Integer, Value::String(s)) => {
                    match s.parse::<f64>() {
                        Ok(n) => worksheet.write_number(row_num, col, n)?,
                        Err(_) => worksheet.write_string(row_num, col, s)?,
                    };
                }
                (_, Value::Bool(b)) => {
                    worksheet.write_boolean(row_num, col, *b)?;
                }
                (_, Value::String(s)) => {
                    worksheet.write_string(row_num, col, s)?;
                }
                (_, other) => {
                    worksheet.write_string(row_num, col, other.to_string())?;
                }
            }
        }
    }

    if !fields.is_empty() {
        worksheet.set_freeze_panes(1, 0)?;
        worksheet.autofilter(0, 0, rows.len() as u32, fields.len() as u16 - 1)?;
    }
    Ok(())
}
