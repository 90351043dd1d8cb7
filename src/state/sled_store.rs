use crate::error::{AppError, Result};
use crate::models::IncidentRecord;
use crate::state::{RecordFilter, RecordStore};
use async_trait::async_trait;
use sled::Db;
use std::path::Path;
use std::sync::Arc;

/// Persistent record store using Sled embedded database
#[derive(Clone)]
pub struct SledStore {
    db: Arc<Db>,
    records_tree: sled::Tree,
}

impl SledStore {
    /// Create a new Sled store at the specified path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref();
        let db = sled::open(&path).map_err(|e| {
            AppError::Database(format!("Failed to open Sled database: {}", e))
        })?;

        let records_tree = db.open_tree("siniestros").map_err(|e| {
            AppError::Database(format!("Failed to open records tree: {}", e))
        })?;

        tracing::info!("Initialized Sled store at {:?}", path_str);

        Ok(Self {
            db: Arc::new(db),
            records_tree,
        })
    }

    fn serialize_record(record: &IncidentRecord) -> Result<Vec<u8>> {
        bincode::serialize(record).map_err(|e| {
            AppError::Serialization(format!("Failed to serialize record: {}", e))
        })
    }

    fn deserialize_record(bytes: &[u8]) -> Result<IncidentRecord> {
        bincode::deserialize(bytes).map_err(|e| {
            AppError::Serialization(format!("Failed to deserialize record: {}", e))
        })
    }

    /// Big-endian so tree iteration follows id order
    fn record_key(id: u64) -> [u8; 8] {
        id.to_be_bytes()
    }

    fn next_id(&self) -> Result<u64> {
        // generate_id starts at 0; ids start at 1
        Ok(self.db.generate_id()? + 1)
    }

    fn scan(&self, filter: &RecordFilter) -> Result<Vec<IncidentRecord>> {
        let mut records = Vec::new();
        for result in self.records_tree.iter() {
            let (_, value) = result?;
            let record = Self::deserialize_record(&value)?;
            if filter.matches(&record) {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Flush pending writes to disk
    pub async fn flush(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }

    /// Get database size in bytes
    pub fn size_on_disk(&self) -> Result<u64> {
        Ok(self.db.size_on_disk()?)
    }
}

#[async_trait]
impl RecordStore for SledStore {
    async fn insert_record(&self, mut record: IncidentRecord) -> Result<IncidentRecord> {
        record.id = self.next_id()?;
        let value = Self::serialize_record(&record)?;

        self.records_tree.insert(Self::record_key(record.id), value)?;
        self.records_tree.flush_async().await?;

        tracing::debug!(record_id = record.id, "Record saved to Sled");
        Ok(record)
    }

    async fn insert_batch(&self, records: Vec<IncidentRecord>) -> Result<Vec<u64>> {
        let mut batch = sled::Batch::default();
        let mut ids = Vec::with_capacity(records.len());

        for mut record in records {
            record.id = self.next_id()?;
            batch.insert(Self::record_key(record.id).to_vec(), Self::serialize_record(&record)?);
            ids.push(record.id);
        }

        // apply_batch is atomic: all rows become visible together or not at all
        self.records_tree.apply_batch(batch)?;
        self.records_tree.flush_async().await?;

        tracing::debug!(count = ids.len(), "Record batch saved to Sled");
        Ok(ids)
    }

    async fn get_record(&self, id: u64) -> Result<Option<IncidentRecord>> {
        match self.records_tree.get(Self::record_key(id))? {
            Some(bytes) => Ok(Some(Self::deserialize_record(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn update_record(&self, record: &IncidentRecord) -> Result<()> {
        let key = Self::record_key(record.id);

        if !self.records_tree.contains_key(key)? {
            return Err(AppError::NotFound(format!("Record {} not found", record.id)));
        }

        self.records_tree
            .insert(key, Self::serialize_record(record)?)?;
        self.records_tree.flush_async().await?;

        tracing::debug!(record_id = record.id, "Record updated in Sled");
        Ok(())
    }

    async fn delete_record(&self, id: u64) -> Result<()> {
        if self.records_tree.remove(Self::record_key(id))?.is_none() {
            return Err(AppError::NotFound(format!("Record {} not found", id)));
        }
        self.records_tree.flush_async().await?;

        tracing::debug!(record_id = id, "Record deleted from Sled");
        Ok(())
    }

    async fn list_records(
        &self,
        filter: &RecordFilter,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<IncidentRecord>> {
        let mut records = self.scan(filter)?;
        records.reverse();

        let start = (page as usize) * (page_size as usize);
        Ok(records
            .into_iter()
            .skip(start)
            .take(page_size as usize)
            .collect())
    }

    async fn count_records(&self, filter: &RecordFilter) -> Result<u64> {
        let mut count = 0u64;
        for result in self.records_tree.iter() {
            let (_, value) = result?;
            if filter.matches(&Self::deserialize_record(&value)?) {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn all_records(&self, filter: &RecordFilter) -> Result<Vec<IncidentRecord>> {
        self.scan(filter)
    }
}
