pub mod handlers;
pub mod routes;

pub use routes::*;

use crate::{ingestion::IngestionPipeline, ml::RiskModelService, state::RecordStore};
use std::sync::Arc;
use std::time::Instant;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RiskModelService>,
    pub ingestion: Arc<IngestionPipeline>,
    pub store: Arc<dyn RecordStore>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        service: Arc<RiskModelService>,
        ingestion: Arc<IngestionPipeline>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            service,
            ingestion,
            store,
            started_at: Instant::now(),
        }
    }
}
