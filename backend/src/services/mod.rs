//! Business logic services.

pub mod archive_codec;
pub mod backup_service;
pub mod export_service;
pub mod import_service;
pub mod operation_guard;
pub mod restore_service;
pub mod scheduler_service;
pub mod spreadsheet;
