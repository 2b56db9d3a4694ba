//! POS Keeper - Backend Library
//!
//! Backup, restore, retention, and spreadsheet interchange for the POS Keeper
//! restaurant and retail backend.

#[macro_use]
mod macros;

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod schema;
pub mod services;
pub mod storage;
pub mod store;
pub mod telemetry;

pub use config::Config;
pub use error::{AppError, Result};
