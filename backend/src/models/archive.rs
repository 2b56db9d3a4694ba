//! Backup archive envelope (`.ccbak`): gzip-compressed JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

use crate::store::Record;

/// Version written into every new archive.
pub const ARCHIVE_FORMAT_VERSION: &str = "1.0.0";

/// Archive file extension.
pub const ARCHIVE_EXTENSION: &str = "ccbak";

/// Header describing an archive's contents.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveMetadata {
    pub format_version: String,
    pub created_at: DateTime<Utc>,
    pub table_prefix: String,
    pub entity_counts: BTreeMap<String, i64>,
    pub total_records: i64,
    /// SHA-256 hex of the serialized `data` object, computed before compression
    pub checksum: String,
}

impl ArchiveMetadata {
    /// Major component of the format version, used to reject incompatible archives.
    pub fn major_version(&self) -> Option<u64> {
        self.format_version.split('.').next()?.parse().ok()
    }
}

/// Rows per entity (or junction table), keyed by entity name.
///
/// `BTreeMap` keeps serialization order stable so the checksum recomputed
/// after decompression matches the one written at dump time.
pub type ArchiveData = BTreeMap<String, Vec<Record>>;

/// Full archive as written to disk and to the remote store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveFile {
    pub metadata: ArchiveMetadata,
    pub data: ArchiveData,
}
