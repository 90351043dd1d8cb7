//! Traffic accident risk prediction backend.
//!
//! Incident records are ingested from CSV into a record store, a random
//! forest is trained on them, and predictions are served over HTTP.

pub mod api;
pub mod config;
pub mod error;
pub mod ingestion;
pub mod metrics;
pub mod ml;
pub mod models;
pub mod schema;
pub mod state;
pub mod storage;
pub mod table;

pub use error::{AppError, Result};
