//! In-memory stores
//!
//! Lock-guarded collections; state is lost when the daemon stops.

use async_trait::async_trait;
use berth_core::domain::job::{JobRecord, QueueEntry};
use berth_core::domain::schedule::CronRecord;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::{JobStore, QueueStore, ScheduleStore, StoreError};

#[derive(Default)]
pub struct MemoryJobStore {
    records: RwLock<HashMap<String, JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.records.read().await.get(job_id).cloned())
    }

    async fn set(&self, record: JobRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .insert(record.job_id.clone(), record);
        Ok(())
    }

    async fn delete(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.records.write().await.remove(job_id))
    }

    async fn contains(&self, job_id: &str) -> Result<bool, StoreError> {
        Ok(self.records.read().await.contains_key(job_id))
    }

    async fn items(&self) -> Result<Vec<JobRecord>, StoreError> {
        let mut items: Vec<JobRecord> = self.records.read().await.values().cloned().collect();
        items.sort_by(|a, b| {
            a.queued_time
                .cmp(&b.queued_time)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        Ok(items)
    }
}

#[derive(Default)]
pub struct MemoryQueueStore {
    entries: RwLock<Vec<QueueEntry>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn append(&self, entry: QueueEntry) -> Result<usize, StoreError> {
        let mut entries = self.entries.write().await;
        entries.push(entry);
        Ok(entries.len() - 1)
    }

    async fn insert_front(&self, entry: QueueEntry) -> Result<(), StoreError> {
        self.entries.write().await.insert(0, entry);
        Ok(())
    }

    async fn pop_front(&self) -> Result<QueueEntry, StoreError> {
        super::pop_front(&mut *self.entries.write().await)
    }

    async fn peek_front(&self) -> Result<QueueEntry, StoreError> {
        super::peek_front(&self.entries.read().await)
    }

    async fn get(&self, position: usize) -> Result<QueueEntry, StoreError> {
        super::get_at(&self.entries.read().await, position)
    }

    async fn delete_at(&self, position: usize) -> Result<QueueEntry, StoreError> {
        super::delete_at(&mut *self.entries.write().await, position)
    }

    async fn reposition(&self, from: usize, to: usize) -> Result<(), StoreError> {
        super::reposition(&mut *self.entries.write().await, from, to)
    }

    async fn entries(&self) -> Result<Vec<QueueEntry>, StoreError> {
        Ok(self.entries.read().await.clone())
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.entries.read().await.len())
    }
}

#[derive(Default)]
pub struct MemoryScheduleStore {
    records: RwLock<BTreeMap<String, CronRecord>>,
}

impl MemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScheduleStore for MemoryScheduleStore {
    async fn save(&self, record: &CronRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .insert(record.worker_id.clone(), record.clone());
        Ok(())
    }

    async fn remove(&self, worker_id: &str) -> Result<(), StoreError> {
        self.records.write().await.remove(worker_id);
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<CronRecord>, StoreError> {
        Ok(self.records.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::tests::{exercise_job_store, exercise_queue};

    #[tokio::test]
    async fn test_memory_queue() {
        exercise_queue(&MemoryQueueStore::new()).await;
    }

    #[tokio::test]
    async fn test_memory_job_store() {
        exercise_job_store(&MemoryJobStore::new()).await;
    }
}
