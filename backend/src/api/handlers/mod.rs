//! HTTP request handlers.

pub mod backup;
pub mod export;
pub mod import;
