pub mod factory;
pub mod sled_store;
pub mod store;

pub use factory::{create_in_memory_store, create_store};
pub use sled_store::SledStore;
pub use store::*;

use crate::error::Result;
use crate::models::IncidentRecord;
use async_trait::async_trait;
use chrono::NaiveDate;

/// Trait for incident record storage operations
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a record, assigning a fresh id
    async fn insert_record(&self, record: IncidentRecord) -> Result<IncidentRecord>;

    /// Insert every record or none of them; returns the assigned ids
    async fn insert_batch(&self, records: Vec<IncidentRecord>) -> Result<Vec<u64>>;

    /// Get a record by id
    async fn get_record(&self, id: u64) -> Result<Option<IncidentRecord>>;

    /// Replace an existing record
    async fn update_record(&self, record: &IncidentRecord) -> Result<()>;

    /// Delete a record
    async fn delete_record(&self, id: u64) -> Result<()>;

    /// List records with filtering, newest id first
    async fn list_records(
        &self,
        filter: &RecordFilter,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<IncidentRecord>>;

    /// Count records matching filter
    async fn count_records(&self, filter: &RecordFilter) -> Result<u64>;

    /// Every matching record in ascending id order
    async fn all_records(&self, filter: &RecordFilter) -> Result<Vec<IncidentRecord>>;
}

/// Filter for querying incident records
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct RecordFilter {
    pub accidente: Option<i64>,
    pub distrito: Option<i64>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

impl RecordFilter {
    pub fn matches(&self, record: &IncidentRecord) -> bool {
        let accident_match = self.accidente.map_or(true, |a| record.accidente == a);
        let district_match = self.distrito.map_or(true, |d| record.distrito == d);
        let from_match = self.date_from.map_or(true, |d| record.fecha_siniestro >= d);
        let to_match = self.date_to.map_or(true, |d| record.fecha_siniestro <= d);

        accident_match && district_match && from_match && to_match
    }
}
