use crate::error::{AppError, Result};
use crate::models::IncidentRecord;
use crate::state::{RecordFilter, RecordStore};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// In-memory record store (for development and testing)
#[derive(Clone)]
pub struct InMemoryStore {
    records: Arc<DashMap<u64, IncidentRecord>>,
    next_id: Arc<AtomicU64>,
    // serializes batch inserts against each other
    batch_lock: Arc<parking_lot::Mutex<()>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
            batch_lock: Arc::new(parking_lot::Mutex::new(())),
        }
    }

    fn matching(&self, filter: &RecordFilter) -> Vec<IncidentRecord> {
        let mut records: Vec<IncidentRecord> = self
            .records
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by_key(|r| r.id);
        records
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn insert_record(&self, mut record: IncidentRecord) -> Result<IncidentRecord> {
        record.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.records.insert(record.id, record.clone());

        tracing::debug!(record_id = record.id, "Record saved");
        Ok(record)
    }

    async fn insert_batch(&self, records: Vec<IncidentRecord>) -> Result<Vec<u64>> {
        let _guard = self.batch_lock.lock();

        // Ids are reserved up front so the whole batch lands or nothing does
        let first = self
            .next_id
            .fetch_add(records.len() as u64, Ordering::SeqCst);
        let mut ids = Vec::with_capacity(records.len());
        for (offset, mut record) in records.into_iter().enumerate() {
            record.id = first + offset as u64;
            ids.push(record.id);
            self.records.insert(record.id, record);
        }

        tracing::debug!(count = ids.len(), "Record batch saved");
        Ok(ids)
    }

    async fn get_record(&self, id: u64) -> Result<Option<IncidentRecord>> {
        Ok(self.records.get(&id).map(|entry| entry.clone()))
    }

    async fn update_record(&self, record: &IncidentRecord) -> Result<()> {
        match self.records.get_mut(&record.id) {
            Some(mut entry) => {
                *entry = record.clone();
                tracing::debug!(record_id = record.id, "Record updated");
                Ok(())
            }
            None => Err(AppError::NotFound(format!("Record {} not found", record.id))),
        }
    }

    async fn delete_record(&self, id: u64) -> Result<()> {
        if self.records.remove(&id).is_some() {
            tracing::debug!(record_id = id, "Record deleted");
            Ok(())
        } else {
            Err(AppError::NotFound(format!("Record {} not found", id)))
        }
    }

    async fn list_records(
        &self,
        filter: &RecordFilter,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<IncidentRecord>> {
        let mut records = self.matching(filter);

        // Newest first
        records.reverse();

        let start = (page as usize) * (page_size as usize);
        Ok(records
            .into_iter()
            .skip(start)
            .take(page_size as usize)
            .collect())
    }

    async fn count_records(&self, filter: &RecordFilter) -> Result<u64> {
        let count = self
            .records
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .count();

        Ok(count as u64)
    }

    async fn all_records(&self, filter: &RecordFilter) -> Result<Vec<IncidentRecord>> {
        Ok(self.matching(filter))
    }
}
