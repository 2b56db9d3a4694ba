//! Data models for backup history, archives, and interchange reports.

pub mod archive;
pub mod backup;
pub mod interchange;
