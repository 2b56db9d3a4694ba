//! API middleware.

pub mod context;
