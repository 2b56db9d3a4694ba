//! Schema registry: the single source of truth for every interchangeable entity.
//!
//! Each importable sheet maps to one [`EntityMapping`] describing its table,
//! typed columns, required and secret fields, header remaps, and foreign-key
//! relations. Backup, restore, export, and import all read the same registry,
//! and the dependency order used for truncation, reload, and phased import is
//! derived from the relation graph rather than maintained by hand.

pub mod catalog;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use crate::error::{AppError, Result};
use crate::store::Record;

/// Logical type of a column, used for cell validation and conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    String,
    Number,
    Decimal,
    Integer,
    Boolean,
    Date,
    Timestamp,
    Uuid,
    Enum,
    Time,
}

/// Column definition for one entity field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSpec {
    pub kind: ColumnKind,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
    pub nullable: bool,
    /// Never exported, never imported, stripped from every backup dump.
    pub secret: bool,
    pub unique: bool,
}

impl ColumnSpec {
    pub fn of(kind: ColumnKind) -> Self {
        Self {
            kind,
            enum_values: Vec::new(),
            nullable: true,
            secret: false,
            unique: false,
        }
    }

    pub fn string() -> Self {
        Self::of(ColumnKind::String)
    }

    pub fn number() -> Self {
        Self::of(ColumnKind::Number)
    }

    pub fn decimal() -> Self {
        Self::of(ColumnKind::Decimal)
    }

    pub fn integer() -> Self {
        Self::of(ColumnKind::Integer)
    }

    pub fn boolean() -> Self {
        Self::of(ColumnKind::Boolean)
    }

    pub fn date() -> Self {
        Self::of(ColumnKind::Date)
    }

    pub fn timestamp() -> Self {
        Self::of(ColumnKind::Timestamp)
    }

    pub fn uuid() -> Self {
        Self::of(ColumnKind::Uuid)
    }

    pub fn time() -> Self {
        Self::of(ColumnKind::Time)
    }

    pub fn enumeration(values: &[&str]) -> Self {
        Self {
            enum_values: values.iter().map(|v| v.to_string()).collect(),
            ..Self::of(ColumnKind::Enum)
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Parse a raw cell into its persistence-ready JSON value.
    ///
    /// The error string is a human-readable diagnostic for the import preview.
    pub fn parse_cell(&self, raw: &str) -> std::result::Result<Value, String> {
        let raw = raw.trim();
        match self.kind {
            ColumnKind::String => Ok(Value::String(raw.to_string())),
            ColumnKind::Number | ColumnKind::Decimal => parse_number(raw)
                .map(number_value)
                .ok_or_else(|| format!("'{}' is not a valid number", raw)),
            ColumnKind::Integer => parse_integer(raw)
                .map(Value::from)
                .ok_or_else(|| format!("'{}' is not a valid integer", raw)),
            ColumnKind::Boolean => parse_boolean(raw)
                .map(Value::Bool)
                .ok_or_else(|| format!("'{}' is not a valid boolean (use true/false, yes/no, 1/0)", raw)),
            ColumnKind::Uuid => {
                if uuid_regex().is_match(raw) {
                    Ok(Value::String(raw.to_ascii_lowercase()))
                } else {
                    Err(format!("'{}' is not a valid UUID", raw))
                }
            }
            ColumnKind::Enum => self
                .enum_values
                .iter()
                .find(|v| v.eq_ignore_ascii_case(raw))
                .map(|v| Value::String(v.clone()))
                .ok_or_else(|| {
                    format!(
                        "'{}' is not one of: {}",
                        raw,
                        self.enum_values.join(", ")
                    )
                }),
            ColumnKind::Date => parse_date(raw)
                .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
                .ok_or_else(|| format!("'{}' is not a valid date", raw)),
            ColumnKind::Timestamp => parse_timestamp(raw)
                .map(|ts| Value::String(ts.to_rfc3339()))
                .ok_or_else(|| format!("'{}' is not a valid date/time", raw)),
            ColumnKind::Time => parse_time(raw)
                .map(|t| Value::String(t.format("%H:%M:%S").to_string()))
                .ok_or_else(|| format!("'{}' is not a valid time (HH:MM[:SS])", raw)),
        }
    }
}

fn uuid_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$").unwrap()
    })
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn parse_integer(raw: &str) -> Option<i64> {
    raw.parse::<i64>().ok().or_else(|| {
        parse_number(raw)
            .filter(|n| n.fract() == 0.0 && n.abs() < 9.0e15)
            .map(|n| n as i64)
    })
}

/// Literal set accepted for boolean cells.
pub fn parse_boolean(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Some(true),
        "false" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%d/%m/%Y"))
        .ok()
        .or_else(|| parse_timestamp(raw).map(|ts| ts.date_naive()))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%d/%m/%Y"))
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .ok()
        // Spreadsheet time-only cells surface as a datetime on the epoch day
        .or_else(|| parse_timestamp(raw).map(|ts| ts.time()))
}

/// Normalize a spreadsheet header to its canonical snake_case field name.
///
/// `"Customer ID"`, `"customerId"` and `"customer-id"` all become `customer_id`.
pub fn normalize_header(raw: &str) -> String {
    let mut spaced = String::with_capacity(raw.len() + 4);
    let mut prev: Option<char> = None;

    for ch in raw.trim().chars() {
        if ch.is_alphanumeric() {
            if ch.is_uppercase() {
                if matches!(prev, Some(p) if p.is_lowercase() || p.is_ascii_digit()) {
                    spaced.push('_');
                }
                spaced.extend(ch.to_lowercase());
            } else {
                spaced.push(ch);
            }
        } else if ch.is_whitespace() || matches!(ch, '-' | '_' | '.' | '/') {
            spaced.push('_');
        }
        prev = Some(ch);
    }

    let mut out = String::with_capacity(spaced.len());
    for ch in spaced.chars() {
        if ch == '_' && (out.is_empty() || out.ends_with('_')) {
            continue;
        }
        out.push(ch);
    }
    out.trim_end_matches('_').to_string()
}

/// Foreign-key column turned into a nested relation reference on import.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationMapping {
    /// Relation property on the converted record (e.g. `customer`)
    pub property: String,
    /// FK column in the table (e.g. `customer_id`)
    pub column: String,
    /// Referenced entity name
    pub target: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingKind {
    /// Table with its own primary key
    Entity,
    /// Many-to-many link keyed on its FK pair
    Junction,
}

/// How one importable sheet maps to one persisted entity.
#[derive(Debug, Clone, Serialize)]
pub struct EntityMapping {
    pub entity_name: String,
    pub table_name: String,
    pub sheet_name: String,
    pub kind: MappingKind,
    pub primary_key: Option<String>,
    pub columns: Vec<(String, ColumnSpec)>,
    pub required_fields: Vec<String>,
    pub skip_fields: Vec<String>,
    pub field_remap: BTreeMap<String, String>,
    pub relation_mappings: BTreeMap<String, RelationMapping>,
    pub date_column: Option<String>,
}

impl EntityMapping {
    pub fn entity(entity_name: &str, table_name: &str, sheet_name: &str) -> Self {
        Self {
            entity_name: entity_name.to_string(),
            table_name: table_name.to_string(),
            sheet_name: sheet_name.to_string(),
            kind: MappingKind::Entity,
            primary_key: Some("id".to_string()),
            columns: Vec::new(),
            required_fields: Vec::new(),
            skip_fields: Vec::new(),
            field_remap: BTreeMap::new(),
            relation_mappings: BTreeMap::new(),
            date_column: None,
        }
    }

    pub fn junction(entity_name: &str, table_name: &str, sheet_name: &str) -> Self {
        Self {
            kind: MappingKind::Junction,
            primary_key: None,
            ..Self::entity(entity_name, table_name, sheet_name)
        }
    }

    pub fn column(mut self, name: &str, spec: ColumnSpec) -> Self {
        self.columns.push((name.to_string(), spec));
        self
    }

    pub fn required(mut self, name: &str, mut spec: ColumnSpec) -> Self {
        spec.nullable = false;
        self.required_fields.push(name.to_string());
        self.columns.push((name.to_string(), spec));
        self
    }

    pub fn secret(mut self, name: &str, mut spec: ColumnSpec) -> Self {
        spec.secret = true;
        self.skip_fields.push(name.to_string());
        self.columns.push((name.to_string(), spec));
        self
    }

    pub fn remap(mut self, header: &str, property: &str) -> Self {
        self.field_remap.insert(header.to_string(), property.to_string());
        self
    }

    pub fn relation(mut self, header: &str, property: &str, target: &str) -> Self {
        let column = self
            .field_remap
            .get(header)
            .cloned()
            .unwrap_or_else(|| header.to_string());
        self.relation_mappings.insert(
            header.to_string(),
            RelationMapping {
                property: property.to_string(),
                column,
                target: target.to_string(),
            },
        );
        self
    }

    pub fn dated_by(mut self, column: &str) -> Self {
        self.date_column = Some(column.to_string());
        self
    }

    pub fn column_spec(&self, field: &str) -> Option<&ColumnSpec> {
        self.columns
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, spec)| spec)
    }

    pub fn is_junction(&self) -> bool {
        self.kind == MappingKind::Junction
    }

    /// Entity property (and table column) a header field is stored under.
    pub fn property_for<'a>(&'a self, field: &'a str) -> &'a str {
        self.field_remap.get(field).map(String::as_str).unwrap_or(field)
    }

    /// Header field for a table column; the inverse of [`Self::property_for`].
    pub fn header_for<'a>(&'a self, property: &'a str) -> &'a str {
        self.field_remap
            .iter()
            .find(|(_, p)| p.as_str() == property)
            .map(|(h, _)| h.as_str())
            .unwrap_or(property)
    }

    /// Header fields that appear in exports and templates, in column order.
    pub fn exported_fields(&self) -> impl Iterator<Item = (&str, &ColumnSpec)> {
        self.columns
            .iter()
            .filter(|(name, spec)| !spec.secret && !self.skip_fields.contains(name))
            .map(|(name, spec)| (name.as_str(), spec))
    }

    pub fn secret_columns(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .filter(|(_, spec)| spec.secret)
            .map(|(name, _)| self.property_for(name))
    }

    /// Remove every secret-flagged column from a dumped row.
    pub fn strip_secrets(&self, record: &mut Record) {
        for column in self.secret_columns() {
            record.remove(column);
        }
    }

    /// Collapse nested `{relation: {id}}` references back to FK columns.
    pub fn flatten_relations(&self, mut record: Record) -> Record {
        for relation in self.relation_mappings.values() {
            if let Some(nested) = record.remove(&relation.property) {
                let id = match nested {
                    Value::Object(mut obj) => obj.remove("id").unwrap_or(Value::Null),
                    other => other,
                };
                record.insert(relation.column.clone(), id);
            }
        }
        record
    }

    /// Columns the in-memory store enforces as unique.
    pub fn unique_columns(&self) -> Vec<String> {
        let mut unique: Vec<String> = self
            .columns
            .iter()
            .filter(|(_, spec)| spec.unique)
            .map(|(name, _)| self.property_for(name).to_string())
            .collect();
        if let Some(pk) = &self.primary_key {
            if !unique.contains(pk) {
                unique.insert(0, pk.clone());
            }
        }
        unique
    }
}

/// One side of a many-to-many link table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JunctionSide {
    pub column: String,
    pub entity: String,
}

/// Many-to-many table dumped and reloaded alongside the entities it links.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JunctionTable {
    pub table_name: String,
    pub left: JunctionSide,
    pub right: JunctionSide,
}

impl JunctionTable {
    pub fn new(table_name: &str, left: (&str, &str), right: (&str, &str)) -> Self {
        Self {
            table_name: table_name.to_string(),
            left: JunctionSide {
                column: left.0.to_string(),
                entity: left.1.to_string(),
            },
            right: JunctionSide {
                column: right.0.to_string(),
                entity: right.1.to_string(),
            },
        }
    }
}

/// Catalog of every interchangeable entity and link table.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    mappings: Vec<EntityMapping>,
    junctions: Vec<JunctionTable>,
}

impl SchemaRegistry {
    /// Build and validate a registry.
    pub fn new(mappings: Vec<EntityMapping>, junctions: Vec<JunctionTable>) -> Result<Self> {
        let registry = Self { mappings, junctions };
        registry.validate()?;
        Ok(registry)
    }

    /// The restaurant/retail catalog shipped with the backend.
    pub fn builtin() -> Result<Self> {
        Self::new(catalog::entity_mappings(), catalog::junction_tables())
    }

    pub fn mappings(&self) -> &[EntityMapping] {
        &self.mappings
    }

    /// Mappings that own a table with a primary key.
    pub fn entities(&self) -> impl Iterator<Item = &EntityMapping> {
        self.mappings.iter().filter(|m| !m.is_junction())
    }

    pub fn junction_tables(&self) -> &[JunctionTable] {
        &self.junctions
    }

    pub fn mapping(&self, entity_name: &str) -> Option<&EntityMapping> {
        self.mappings.iter().find(|m| m.entity_name == entity_name)
    }

    pub fn mapping_for_table(&self, table_name: &str) -> Option<&EntityMapping> {
        self.mappings.iter().find(|m| m.table_name == table_name)
    }

    /// Resolve a workbook sheet name, ignoring case and surrounding whitespace.
    pub fn mapping_for_sheet(&self, sheet_name: &str) -> Option<&EntityMapping> {
        let wanted = sheet_name.trim();
        self.mappings
            .iter()
            .find(|m| m.sheet_name.eq_ignore_ascii_case(wanted))
    }

    /// Every physical table, entity tables first.
    pub fn all_tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = self.entities().map(|m| m.table_name.clone()).collect();
        tables.extend(self.junction_tables().iter().map(|j| j.table_name.clone()));
        tables
    }

    /// `(fk_column, referenced_table)` pairs for a physical table.
    pub fn foreign_keys(&self, table_name: &str) -> Vec<(String, String)> {
        if let Some(mapping) = self.mappings.iter().find(|m| m.table_name == table_name && !m.is_junction()) {
            return mapping
                .relation_mappings
                .values()
                .filter_map(|rel| {
                    self.mapping(&rel.target)
                        .map(|target| (rel.column.clone(), target.table_name.clone()))
                })
                .collect();
        }
        self.junctions
            .iter()
            .find(|j| j.table_name == table_name)
            .map(|j| {
                [&j.left, &j.right]
                    .into_iter()
                    .filter_map(|side| {
                        self.mapping(&side.entity)
                            .map(|target| (side.column.clone(), target.table_name.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Check the structural invariants every consumer relies on.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        for mapping in &self.mappings {
            for (header, relation) in &mapping.relation_mappings {
                match mapping.column_spec(header) {
                    Some(spec) if spec.kind == ColumnKind::Uuid => {}
                    Some(_) => problems.push(format!(
                        "{}: relation column '{}' must be typed uuid",
                        mapping.entity_name, header
                    )),
                    None => problems.push(format!(
                        "{}: relation column '{}' is not a declared column",
                        mapping.entity_name, header
                    )),
                }
                if self.mapping(&relation.target).is_none() {
                    problems.push(format!(
                        "{}: relation '{}' targets unknown entity '{}'",
                        mapping.entity_name, relation.property, relation.target
                    ));
                }
            }
            for field in &mapping.required_fields {
                if mapping.column_spec(field).is_none() {
                    problems.push(format!(
                        "{}: required field '{}' is not a declared column",
                        mapping.entity_name, field
                    ));
                }
            }
            if mapping.is_junction() && mapping.relation_mappings.len() != 2 {
                problems.push(format!(
                    "{}: junction mappings need exactly two relations",
                    mapping.entity_name
                ));
            }
        }

        for junction in &self.junctions {
            for side in [&junction.left, &junction.right] {
                if self.mapping(&side.entity).is_none() {
                    problems.push(format!(
                        "{}: links unknown entity '{}'",
                        junction.table_name, side.entity
                    ));
                }
            }
        }

        if problems.is_empty() {
            if let Err(cycle) = self.toposort() {
                problems.push(format!("relation graph has a cycle through '{}'", cycle));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(AppError::Config(format!(
                "Invalid schema registry: {}",
                problems.join("; ")
            )))
        }
    }

    /// Edges point from an entity to each relation target, so a plain
    /// topological sort lists children before their parents.
    fn toposort(&self) -> std::result::Result<Vec<&str>, String> {
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for mapping in &self.mappings {
            graph.add_node(mapping.entity_name.as_str());
        }
        for mapping in &self.mappings {
            for relation in mapping.relation_mappings.values() {
                if relation.target != mapping.entity_name {
                    graph.add_edge(mapping.entity_name.as_str(), relation.target.as_str(), ());
                } else {
                    return Err(mapping.entity_name.clone());
                }
            }
        }
        toposort(&graph, None).map_err(|cycle| cycle.node_id().to_string())
    }

    /// Dependency depth of each entity: 0 for entities without relations,
    /// otherwise one more than the deepest relation target.
    fn depths(&self) -> HashMap<&str, usize> {
        let mut depths: HashMap<&str, usize> = HashMap::new();
        let order = self.toposort().unwrap_or_default();
        for name in order.into_iter().rev() {
            let depth = self
                .mapping(name)
                .map(|m| {
                    m.relation_mappings
                        .values()
                        .filter_map(|rel| depths.get(rel.target.as_str()).map(|d| d + 1))
                        .max()
                        .unwrap_or(0)
                })
                .unwrap_or(0);
            depths.insert(name, depth);
        }
        depths
    }

    /// Mappings grouped into phases: no mapping depends on one in its own or a
    /// later phase. Within a phase, registry declaration order is kept.
    pub fn import_phases(&self) -> Vec<Vec<&EntityMapping>> {
        let depths = self.depths();
        let max_depth = depths.values().copied().max().unwrap_or(0);
        let mut phases: Vec<Vec<&EntityMapping>> = vec![Vec::new(); max_depth + 1];
        for mapping in &self.mappings {
            let depth = depths.get(mapping.entity_name.as_str()).copied().unwrap_or(0);
            phases[depth].push(mapping);
        }
        phases.retain(|phase| !phase.is_empty());
        phases
    }

    /// All mappings, parents before children.
    pub fn dependency_order(&self) -> Vec<&EntityMapping> {
        self.import_phases().into_iter().flatten().collect()
    }

    /// Entity (non-junction) mappings, parents before children.
    pub fn entity_load_order(&self) -> Vec<&EntityMapping> {
        self.dependency_order()
            .into_iter()
            .filter(|m| !m.is_junction())
            .collect()
    }

    /// Phase index of every entity, for diagnostics.
    pub fn phase_of(&self, entity_name: &str) -> Option<usize> {
        self.import_phases()
            .iter()
            .position(|phase| phase.iter().any(|m| m.entity_name == entity_name))
    }
}
