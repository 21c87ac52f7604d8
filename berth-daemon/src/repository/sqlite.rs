//! SQLite stores
//!
//! Records are stored as JSON. The queue is kept as a single ordered list
//! so that positional operations stay atomic: each mutation reads the list,
//! applies the change and writes it back inside one transaction.

use async_trait::async_trait;
use berth_core::domain::job::{JobRecord, QueueEntry};
use berth_core::domain::schedule::CronRecord;
use chrono::Utc;
use sqlx::types::Json;
use sqlx::{SqliteConnection, SqlitePool};
use tokio::sync::Mutex;

use super::{JobStore, QueueStore, ScheduleStore, StoreError};

/// Job records of one lifecycle state
pub struct SqliteJobStore {
    pool: SqlitePool,
    store: &'static str,
}

impl SqliteJobStore {
    /// # Arguments
    /// * `pool` - Shared connection pool
    /// * `store` - Name of the state this store holds (e.g. "running")
    pub fn new(pool: SqlitePool, store: &'static str) -> Self {
        Self { pool, store }
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn get(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError> {
        let record = sqlx::query_scalar::<_, Json<JobRecord>>(
            "SELECT record FROM job_records WHERE store = ? AND job_id = ?",
        )
        .bind(self.store)
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(|Json(record)| record))
    }

    async fn set(&self, record: JobRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO job_records (store, job_id, queued_time, record)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (store, job_id)
            DO UPDATE SET queued_time = excluded.queued_time, record = excluded.record
            "#,
        )
        .bind(self.store)
        .bind(&record.job_id)
        .bind(record.queued_time)
        .bind(Json(&record))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError> {
        let record = sqlx::query_scalar::<_, Json<JobRecord>>(
            "DELETE FROM job_records WHERE store = ? AND job_id = ? RETURNING record",
        )
        .bind(self.store)
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(|Json(record)| record))
    }

    async fn contains(&self, job_id: &str) -> Result<bool, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM job_records WHERE store = ? AND job_id = ?",
        )
        .bind(self.store)
        .bind(job_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    async fn items(&self) -> Result<Vec<JobRecord>, StoreError> {
        let records = sqlx::query_scalar::<_, Json<JobRecord>>(
            "SELECT record FROM job_records WHERE store = ? ORDER BY queued_time, job_id",
        )
        .bind(self.store)
        .fetch_all(&self.pool)
        .await?;

        Ok(records.into_iter().map(|Json(record)| record).collect())
    }
}

/// Job queue persisted as one JSON list
pub struct SqliteQueueStore {
    pool: SqlitePool,
    /// Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl SqliteQueueStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Mutex::new(()),
        }
    }

    async fn read(&self) -> Result<Vec<QueueEntry>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        load_entries(&mut conn).await
    }

    /// Applies `apply` to the stored list inside a transaction
    ///
    /// Nothing is written if `apply` fails.
    async fn mutate<T, F>(&self, apply: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Vec<QueueEntry>) -> Result<T, StoreError> + Send,
        T: Send,
    {
        let _guard = self.write_lock.lock().await;

        let mut tx = self.pool.begin().await?;
        let mut entries = load_entries(&mut tx).await?;
        let result = apply(&mut entries)?;
        save_entries(&mut tx, &entries).await?;
        tx.commit().await?;

        Ok(result)
    }
}

async fn load_entries(conn: &mut SqliteConnection) -> Result<Vec<QueueEntry>, StoreError> {
    let stored = sqlx::query_scalar::<_, String>("SELECT entries FROM job_queue WHERE id = 1")
        .fetch_optional(&mut *conn)
        .await?;

    match stored {
        Some(text) => Ok(serde_json::from_str(&text)?),
        None => Ok(Vec::new()),
    }
}

async fn save_entries(conn: &mut SqliteConnection, entries: &[QueueEntry]) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO job_queue (id, entries) VALUES (1, ?)
        ON CONFLICT (id) DO UPDATE SET entries = excluded.entries
        "#,
    )
    .bind(serde_json::to_string(entries)?)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn append(&self, entry: QueueEntry) -> Result<usize, StoreError> {
        self.mutate(move |entries| {
            entries.push(entry);
            Ok(entries.len() - 1)
        })
        .await
    }

    async fn insert_front(&self, entry: QueueEntry) -> Result<(), StoreError> {
        self.mutate(move |entries| {
            entries.insert(0, entry);
            Ok(())
        })
        .await
    }

    async fn pop_front(&self) -> Result<QueueEntry, StoreError> {
        self.mutate(super::pop_front).await
    }

    async fn peek_front(&self) -> Result<QueueEntry, StoreError> {
        super::peek_front(&self.read().await?)
    }

    async fn get(&self, position: usize) -> Result<QueueEntry, StoreError> {
        super::get_at(&self.read().await?, position)
    }

    async fn delete_at(&self, position: usize) -> Result<QueueEntry, StoreError> {
        self.mutate(move |entries| super::delete_at(entries, position))
            .await
    }

    async fn reposition(&self, from: usize, to: usize) -> Result<(), StoreError> {
        self.mutate(move |entries| super::reposition(entries, from, to))
            .await
    }

    async fn entries(&self) -> Result<Vec<QueueEntry>, StoreError> {
        self.read().await
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.read().await?.len())
    }
}

/// Cron records keyed by worker id
pub struct SqliteScheduleStore {
    pool: SqlitePool,
}

impl SqliteScheduleStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScheduleStore for SqliteScheduleStore {
    async fn save(&self, record: &CronRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO cron_schedules (worker_id, record, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT (worker_id)
            DO UPDATE SET record = excluded.record, updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.worker_id)
        .bind(Json(record))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove(&self, worker_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM cron_schedules WHERE worker_id = ?")
            .bind(worker_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<CronRecord>, StoreError> {
        let records = sqlx::query_scalar::<_, Json<CronRecord>>(
            "SELECT record FROM cron_schedules ORDER BY worker_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records.into_iter().map(|Json(record)| record).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::repository::tests::{entry, exercise_job_store, exercise_queue};
    use berth_core::domain::job::GpuSpec;
    use berth_core::domain::schedule::{CronSchedule, FieldValue, ScheduledJob};
    use berth_core::domain::spec::ContainerSpec;

    async fn pool() -> SqlitePool {
        let pool = db::create_pool("sqlite::memory:").await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_sqlite_queue() {
        exercise_queue(&SqliteQueueStore::new(pool().await)).await;
    }

    #[tokio::test]
    async fn test_sqlite_job_store() {
        exercise_job_store(&SqliteJobStore::new(pool().await, "completed")).await;
    }

    #[tokio::test]
    async fn test_job_stores_are_isolated_by_name() {
        let pool = pool().await;
        let running = SqliteJobStore::new(pool.clone(), "running");
        let failed = SqliteJobStore::new(pool, "failed");

        running.set(JobRecord::from(entry("a"))).await.unwrap();

        assert!(running.contains("a").await.unwrap());
        assert!(!failed.contains("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_queue_survives_store_recreation() {
        let pool = pool().await;

        SqliteQueueStore::new(pool.clone())
            .append(entry("a"))
            .await
            .unwrap();

        let queue = SqliteQueueStore::new(pool);
        assert_eq!(queue.peek_front().await.unwrap().job_id, "a");
    }

    #[tokio::test]
    async fn test_schedule_store_round_trip() {
        let store = SqliteScheduleStore::new(pool().await);

        let record = CronRecord {
            worker_id: "cron_0".to_string(),
            job: ScheduledJob {
                job_id: "nightly".to_string(),
                spec: ContainerSpec::new("alpine"),
                schedule: CronSchedule {
                    hour: Some(FieldValue::Number(3)),
                    ..Default::default()
                },
                metadata: Default::default(),
                gpu_spec: GpuSpec::default(),
            },
            next_fire_time: None,
        };

        store.save(&record).await.unwrap();
        store.save(&record).await.unwrap();
        assert_eq!(store.load_all().await.unwrap(), vec![record]);

        store.remove("cron_0").await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
    }
}
