//! Archive compression and checksum.
//!
//! An archive is the JSON envelope `{metadata, data}` gzip-compressed as one
//! stream. `metadata.checksum` is the SHA-256 of the serialized `data` object,
//! taken before compression and re-checked after decompression.

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::io::Write;

use crate::error::{AppError, Result};
use crate::models::archive::{ArchiveData, ArchiveFile, ArchiveMetadata, ARCHIVE_FORMAT_VERSION};

/// Major format version this build can restore.
const SUPPORTED_MAJOR: u64 = 1;

/// SHA-256 hex digest of the serialized data section.
pub fn checksum(data: &ArchiveData) -> Result<String> {
    let mut hasher = Sha256::new();
    serde_json::to_writer(HashWriter(&mut hasher), data)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Feeds serializer output straight into the digest without buffering.
struct HashWriter<'a>(&'a mut Sha256);

impl Write for HashWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Wrap dumped rows in an envelope with counts and checksum.
pub fn build(data: ArchiveData, table_prefix: &str, created_at: DateTime<Utc>) -> Result<ArchiveFile> {
    let entity_counts = data
        .iter()
        .map(|(entity, rows)| (entity.clone(), rows.len() as i64))
        .collect::<std::collections::BTreeMap<_, _>>();
    let total_records = entity_counts.values().sum();
    let checksum = checksum(&data)?;

    Ok(ArchiveFile {
        metadata: ArchiveMetadata {
            format_version: ARCHIVE_FORMAT_VERSION.to_string(),
            created_at,
            table_prefix: table_prefix.to_string(),
            entity_counts,
            total_records,
            checksum,
        },
        data,
    })
}

/// Serialize and gzip an archive.
pub fn encode(archive: &ArchiveFile) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    serde_json::to_writer(&mut encoder, archive)?;
    Ok(encoder.finish()?)
}

/// Gunzip and parse an archive. Corrupt input is an integrity error.
pub fn decode(bytes: &[u8]) -> Result<ArchiveFile> {
    serde_json::from_reader(GzDecoder::new(bytes))
        .map_err(|e| AppError::Integrity(format!("Archive is unreadable: {}", e)))
}

/// Check the format version and recompute the checksum.
pub fn verify(archive: &ArchiveFile) -> Result<()> {
    match archive.metadata.major_version() {
        Some(SUPPORTED_MAJOR) => {}
        _ => {
            return Err(AppError::Integrity(format!(
                "Unsupported archive format version {}",
                archive.metadata.format_version
            )))
        }
    }

    let actual = checksum(&archive.data)?;
    if !actual.eq_ignore_ascii_case(&archive.metadata.checksum) {
        return Err(AppError::Integrity(format!(
            "Checksum mismatch: expected {}, got {}",
            archive.metadata.checksum, actual
        )));
    }
    Ok(())
}

/// Decode and verify in one step.
pub fn open(bytes: &[u8]) -> Result<ArchiveFile> {
    let archive = decode(bytes)?;
    verify(&archive)?;
    Ok(archive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> ArchiveData {
        let mut data = ArchiveData::new();
        data.insert(
            "Category".into(),
            vec![
                json!({"id": "c1", "name": "Drinks", "sort_order": 1}).as_object().cloned().unwrap(),
                json!({"id": "c2", "name": "Mains", "price": 12.5}).as_object().cloned().unwrap(),
            ],
        );
        data.insert("item_categories".into(), vec![]);
        data
    }

    #[test]
    fn test_build_counts_and_version() {
        let archive = build(sample(), "t1_", Utc::now()).unwrap();
        assert_eq!(archive.metadata.total_records, 2);
        assert_eq!(archive.metadata.entity_counts["item_categories"], 0);
        assert_eq!(archive.metadata.format_version, "1.0.0");
        assert_eq!(archive.metadata.checksum.len(), 64);
    }

    #[test]
    fn test_encoded_archive_verifies() {
        let archive = build(sample(), "", Utc::now()).unwrap();
        let bytes = encode(&archive).unwrap();
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
        let opened = open(&bytes).unwrap();
        assert_eq!(opened.data, archive.data);
    }

    #[test]
    fn test_tampered_data_is_rejected() {
        let mut archive = build(sample(), "", Utc::now()).unwrap();
        archive.data.get_mut("Category").unwrap()[0]
            .insert("name".into(), json!("Drinkz"));
        let bytes = encode(&archive).unwrap();
        assert!(matches!(open(&bytes), Err(AppError::Integrity(_))));
    }

    #[test]
    fn test_future_major_version_is_rejected() {
        let mut archive = build(sample(), "", Utc::now()).unwrap();
        archive.metadata.format_version = "2.0.0".into();
        assert!(matches!(verify(&archive), Err(AppError::Integrity(_))));
    }

    #[test]
    fn test_garbage_is_integrity_error() {
        assert!(matches!(decode(b"not gzip"), Err(AppError::Integrity(_))));
    }
}
