//! Repository layer
//!
//! Stores hold the job queue, the running/completed/failed job records and
//! the persisted cron schedules. Every store is trait-based so the backend
//! (in-memory or SQLite) is chosen once at startup and the scheduler never
//! sees which one it got.

mod memory;
mod sqlite;

use async_trait::async_trait;
use berth_core::domain::job::{JobRecord, QueueEntry};
use berth_core::domain::schedule::CronRecord;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;

pub use memory::{MemoryJobStore, MemoryQueueStore, MemoryScheduleStore};
pub use sqlite::{SqliteJobStore, SqliteQueueStore, SqliteScheduleStore};

/// Errors raised by stores
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("queue is empty")]
    Empty,

    #[error("position {position} is out of range (queue length {len})")]
    OutOfRange { position: usize, len: usize },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Key/value store of job records, one per lifecycle state
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError>;

    /// Inserts or replaces the record under its job id
    async fn set(&self, record: JobRecord) -> Result<(), StoreError>;

    /// Removes a record, returning it if it existed
    async fn delete(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError>;

    async fn contains(&self, job_id: &str) -> Result<bool, StoreError>;

    /// All records, oldest queued first
    async fn items(&self) -> Result<Vec<JobRecord>, StoreError>;
}

/// Ordered, repositionable queue of pending jobs
///
/// Positions are 0-based; position 0 is the head.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Appends an entry at the tail, returning its position
    async fn append(&self, entry: QueueEntry) -> Result<usize, StoreError>;

    /// Puts an entry back at the head
    async fn insert_front(&self, entry: QueueEntry) -> Result<(), StoreError>;

    /// Removes and returns the head
    ///
    /// # Errors
    /// [`StoreError::Empty`] if the queue is empty
    async fn pop_front(&self) -> Result<QueueEntry, StoreError>;

    /// Returns the head without removing it
    ///
    /// # Errors
    /// [`StoreError::Empty`] if the queue is empty
    async fn peek_front(&self) -> Result<QueueEntry, StoreError>;

    async fn get(&self, position: usize) -> Result<QueueEntry, StoreError>;

    /// Removes and returns the entry at `position`
    async fn delete_at(&self, position: usize) -> Result<QueueEntry, StoreError>;

    /// Moves the entry at `from` to `to`
    ///
    /// If `to` is out of range the entry is restored at `from` and the
    /// queue is left unchanged.
    async fn reposition(&self, from: usize, to: usize) -> Result<(), StoreError>;

    async fn entries(&self) -> Result<Vec<QueueEntry>, StoreError>;

    async fn len(&self) -> Result<usize, StoreError>;
}

/// Persistent store of cron workers, keyed by worker id
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Inserts or replaces a record
    async fn save(&self, record: &CronRecord) -> Result<(), StoreError>;

    async fn remove(&self, worker_id: &str) -> Result<(), StoreError>;

    async fn load_all(&self) -> Result<Vec<CronRecord>, StoreError>;
}

/// Every store the scheduler needs
#[derive(Clone)]
pub struct Stores {
    pub queue: Arc<dyn QueueStore>,
    pub running: Arc<dyn JobStore>,
    pub completed: Arc<dyn JobStore>,
    pub failed: Arc<dyn JobStore>,
    pub schedules: Arc<dyn ScheduleStore>,
}

impl Stores {
    /// In-memory stores; nothing survives a restart
    pub fn memory() -> Self {
        Self {
            queue: Arc::new(MemoryQueueStore::new()),
            running: Arc::new(MemoryJobStore::new()),
            completed: Arc::new(MemoryJobStore::new()),
            failed: Arc::new(MemoryJobStore::new()),
            schedules: Arc::new(MemoryScheduleStore::new()),
        }
    }

    /// SQLite-backed stores sharing one pool
    pub fn sqlite(pool: SqlitePool) -> Self {
        Self {
            queue: Arc::new(SqliteQueueStore::new(pool.clone())),
            running: Arc::new(SqliteJobStore::new(pool.clone(), "running")),
            completed: Arc::new(SqliteJobStore::new(pool.clone(), "completed")),
            failed: Arc::new(SqliteJobStore::new(pool.clone(), "failed")),
            schedules: Arc::new(SqliteScheduleStore::new(pool)),
        }
    }
}

// =============================================================================
// Queue operations shared by the backends
// =============================================================================

fn out_of_range(position: usize, len: usize) -> StoreError {
    StoreError::OutOfRange { position, len }
}

pub(crate) fn pop_front(entries: &mut Vec<QueueEntry>) -> Result<QueueEntry, StoreError> {
    if entries.is_empty() {
        return Err(StoreError::Empty);
    }
    Ok(entries.remove(0))
}

pub(crate) fn peek_front(entries: &[QueueEntry]) -> Result<QueueEntry, StoreError> {
    entries.first().cloned().ok_or(StoreError::Empty)
}

pub(crate) fn get_at(entries: &[QueueEntry], position: usize) -> Result<QueueEntry, StoreError> {
    entries
        .get(position)
        .cloned()
        .ok_or_else(|| out_of_range(position, entries.len()))
}

pub(crate) fn delete_at(
    entries: &mut Vec<QueueEntry>,
    position: usize,
) -> Result<QueueEntry, StoreError> {
    if position >= entries.len() {
        return Err(out_of_range(position, entries.len()));
    }
    Ok(entries.remove(position))
}

pub(crate) fn reposition(
    entries: &mut Vec<QueueEntry>,
    from: usize,
    to: usize,
) -> Result<(), StoreError> {
    let len = entries.len();
    let entry = delete_at(entries, from)?;

    if to >= len {
        entries.insert(from, entry);
        return Err(out_of_range(to, len));
    }

    entries.insert(to, entry);
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use berth_core::domain::job::GpuSpec;
    use berth_core::domain::spec::ContainerSpec;

    pub fn entry(job_id: &str) -> QueueEntry {
        QueueEntry::new(
            job_id,
            ContainerSpec::new("alpine"),
            Default::default(),
            GpuSpec::default(),
        )
    }

    pub fn record(job_id: &str) -> JobRecord {
        JobRecord::from(entry(job_id))
    }

    fn ids(entries: &[QueueEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.job_id.as_str()).collect()
    }

    /// Behavior every queue backend must share
    pub async fn exercise_queue(queue: &dyn QueueStore) {
        assert!(matches!(queue.pop_front().await, Err(StoreError::Empty)));
        assert!(matches!(queue.peek_front().await, Err(StoreError::Empty)));

        assert_eq!(queue.append(entry("a")).await.unwrap(), 0);
        assert_eq!(queue.append(entry("b")).await.unwrap(), 1);
        assert_eq!(queue.append(entry("c")).await.unwrap(), 2);
        assert_eq!(queue.len().await.unwrap(), 3);

        // Peek is non-destructive
        assert_eq!(queue.peek_front().await.unwrap().job_id, "a");
        assert_eq!(queue.len().await.unwrap(), 3);

        queue.reposition(2, 0).await.unwrap();
        assert_eq!(ids(&queue.entries().await.unwrap()), vec!["c", "a", "b"]);

        // Out-of-range target leaves the queue untouched
        let result = queue.reposition(1, 3).await;
        assert!(matches!(result, Err(StoreError::OutOfRange { position: 3, len: 3 })));
        assert_eq!(ids(&queue.entries().await.unwrap()), vec!["c", "a", "b"]);

        let result = queue.reposition(5, 0).await;
        assert!(matches!(result, Err(StoreError::OutOfRange { position: 5, .. })));

        assert_eq!(queue.get(1).await.unwrap().job_id, "a");
        assert_eq!(queue.delete_at(1).await.unwrap().job_id, "a");
        assert!(matches!(
            queue.delete_at(7).await,
            Err(StoreError::OutOfRange { .. })
        ));

        queue.insert_front(entry("d")).await.unwrap();
        assert_eq!(queue.pop_front().await.unwrap().job_id, "d");
        assert_eq!(queue.pop_front().await.unwrap().job_id, "c");
        assert_eq!(queue.pop_front().await.unwrap().job_id, "b");
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    /// Behavior every job store backend must share
    pub async fn exercise_job_store(store: &dyn JobStore) {
        assert!(store.get("a").await.unwrap().is_none());
        assert!(!store.contains("a").await.unwrap());

        store.set(record("a")).await.unwrap();
        store.set(record("b")).await.unwrap();
        assert!(store.contains("a").await.unwrap());

        let mut updated = record("a");
        updated.return_code = Some(0);
        store.set(updated).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().unwrap().return_code, Some(0));
        assert_eq!(store.items().await.unwrap().len(), 2);

        assert_eq!(store.delete("a").await.unwrap().unwrap().job_id, "a");
        assert!(store.delete("a").await.unwrap().is_none());
        assert_eq!(store.items().await.unwrap().len(), 1);
    }

    #[test]
    fn test_reposition_restores_on_out_of_range() {
        let mut entries = vec![entry("a"), entry("b")];

        assert!(reposition(&mut entries, 0, 2).is_err());
        assert_eq!(ids(&entries), vec!["a", "b"]);

        reposition(&mut entries, 0, 1).unwrap();
        assert_eq!(ids(&entries), vec!["b", "a"]);
    }
}
