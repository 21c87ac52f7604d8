//! Job Service
//!
//! Queue, running and finished job operations, including the unified job
//! lookup and sorting of finished jobs.

use berth_core::domain::job::{JobRecord, JobStatus, QueueEntry};
use berth_core::dto::job::{
    ContainerInfo, JobLogsView, JobSubmitted, JobView, QueuedJob, SubmitJob,
};
use berth_core::dto::worker::WorkerState;
use std::cmp::Ordering;

use super::AppState;
use crate::error::{Result, SchedulerError};
use crate::repository::JobStore;

// =============================================================================
// Queue
// =============================================================================

pub async fn submit_job(state: &AppState, req: SubmitJob) -> Result<JobSubmitted> {
    state
        .scheduler
        .submit(req.job_id, req.spec, req.metadata, req.gpu_spec)
        .await
}

pub async fn list_queued(state: &AppState) -> Result<Vec<QueuedJob>> {
    state.scheduler.queued_jobs().await
}

pub async fn get_queued(state: &AppState, position: usize) -> Result<QueuedJob> {
    let entry = state.scheduler.queued_job(position).await?;
    Ok(QueuedJob { position, entry })
}

pub async fn delete_queued(state: &AppState, position: usize) -> Result<QueueEntry> {
    state.scheduler.delete_queued(position).await
}

pub async fn reposition(state: &AppState, from: usize, to: usize) -> Result<()> {
    state.scheduler.reposition(from, to).await
}

// =============================================================================
// Running jobs
// =============================================================================

pub async fn list_running(state: &AppState) -> Result<Vec<JobRecord>> {
    Ok(state.scheduler.stores().running.items().await?)
}

/// Live output of a running job, whether a worker or a cron worker runs it
pub async fn running_logs(state: &AppState, job_id: &str) -> Result<JobLogsView> {
    if let Some(worker) = state.workers.worker_by_job_id(job_id).await {
        return Ok(JobLogsView {
            job_id: job_id.to_string(),
            logs: worker.logs().await?,
        });
    }

    let run = state
        .cron
        .running_job(job_id)
        .await
        .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?;
    let logs = match run.handle() {
        Some(handle) => String::from_utf8_lossy(&handle.logs().await?).into_owned(),
        None => String::new(),
    };

    Ok(JobLogsView {
        job_id: job_id.to_string(),
        logs,
    })
}

pub async fn container_id(state: &AppState, job_id: &str) -> Result<ContainerInfo> {
    let container_id = match state.workers.worker_by_job_id(job_id).await {
        Some(worker) => worker.container_id()?,
        None => state
            .cron
            .running_job(job_id)
            .await
            .and_then(|run| run.handle())
            .map(|handle| handle.id().to_string()),
    };

    // Also not found while the job is still starting
    let container_id =
        container_id.ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?;

    Ok(ContainerInfo {
        job_id: job_id.to_string(),
        container_id,
    })
}

/// Stops a running job
///
/// Jobs run by a cron worker cannot be rescheduled; they are always
/// recorded as failed.
pub async fn stop_running(state: &AppState, job_id: &str, reschedule: bool) -> Result<()> {
    match state.workers.stop_job(job_id, reschedule).await {
        Err(SchedulerError::JobNotFound(_)) => {
            if reschedule && state.cron.running_job(job_id).await.is_some() {
                return Err(SchedulerError::InvalidRequest(format!(
                    "job {} was started by a schedule and cannot be rescheduled",
                    job_id
                )));
            }
            state.cron.stop_run(job_id).await
        }
        other => other,
    }
}

// =============================================================================
// Finished jobs
// =============================================================================

pub async fn list_completed(state: &AppState, sort: Option<&str>) -> Result<Vec<JobRecord>> {
    list_sorted(state.scheduler.stores().completed.as_ref(), sort).await
}

pub async fn list_failed(state: &AppState, sort: Option<&str>) -> Result<Vec<JobRecord>> {
    list_sorted(state.scheduler.stores().failed.as_ref(), sort).await
}

async fn list_sorted(store: &dyn JobStore, sort: Option<&str>) -> Result<Vec<JobRecord>> {
    let keys = match sort {
        Some(sort) => parse_sort(sort)?,
        None => Vec::new(),
    };

    let mut records = store.items().await?;
    sort_records(&mut records, &keys);
    Ok(records)
}

/// Logs of a completed (or failed) job
pub async fn finished_logs(state: &AppState, job_id: &str, status: JobStatus) -> Result<JobLogsView> {
    let stores = state.scheduler.stores();
    let store = match status {
        JobStatus::Completed => &stores.completed,
        _ => &stores.failed,
    };

    let record = store
        .get(job_id)
        .await?
        .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?;

    Ok(JobLogsView {
        job_id: job_id.to_string(),
        logs: record
            .logs
            .map(|logs| logs.to_text_lossy().into_owned())
            .unwrap_or_default(),
    })
}

pub async fn delete_finished(state: &AppState, job_id: &str) -> Result<JobRecord> {
    state.scheduler.delete_finished(job_id).await
}

// =============================================================================
// Unified lookup
// =============================================================================

/// Finds a job wherever it is
///
/// Searched in lifecycle order: queue, running (with live logs), completed,
/// failed. The queue and the running store are read under the dispatch lock,
/// so a job being dispatched or requeued is found in one of them; a running
/// job is written to its final store before it leaves the running one.
pub async fn get_job(state: &AppState, job_id: &str) -> Result<JobView> {
    let stores = state.scheduler.stores();

    let (queued, running) = {
        let _guard = state.scheduler.lock_dispatch().await;
        let queued = stores
            .queue
            .entries()
            .await?
            .into_iter()
            .find(|entry| entry.job_id == job_id);
        let running = match queued {
            Some(_) => None,
            None => stores.running.get(job_id).await?,
        };
        (queued, running)
    };

    if let Some(queued) = queued {
        return Ok(JobView {
            job_id: queued.job_id,
            status: JobStatus::Queued,
            logs: None,
            spec: queued.spec,
        });
    }

    if let Some(record) = running {
        return Ok(running_view(state, record).await);
    }

    if let Some(record) = stores.completed.get(job_id).await? {
        return Ok(finished_view(record, JobStatus::Completed));
    }
    if let Some(record) = stores.failed.get(job_id).await? {
        return Ok(finished_view(record, JobStatus::Failed));
    }

    Err(SchedulerError::JobNotFound(job_id.to_string()))
}

/// Pending until the backend run has started
async fn running_view(state: &AppState, record: JobRecord) -> JobView {
    if let Some(worker) = state.workers.worker_by_job_id(&record.job_id).await {
        let status = match worker.status() {
            WorkerState::Running => JobStatus::Running,
            _ => JobStatus::Pending,
        };
        let logs = match status {
            JobStatus::Running => worker.logs().await.ok(),
            _ => None,
        };
        return JobView {
            job_id: record.job_id,
            status,
            logs,
            spec: record.spec,
        };
    }

    let handle = state
        .cron
        .running_job(&record.job_id)
        .await
        .and_then(|run| run.handle());
    let logs = match &handle {
        Some(handle) => handle
            .logs()
            .await
            .ok()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()),
        None => None,
    };
    JobView {
        job_id: record.job_id,
        status: if handle.is_some() {
            JobStatus::Running
        } else {
            JobStatus::Pending
        },
        logs,
        spec: record.spec,
    }
}

fn finished_view(record: JobRecord, status: JobStatus) -> JobView {
    JobView {
        job_id: record.job_id,
        status,
        logs: record.logs.map(|logs| logs.to_text_lossy().into_owned()),
        spec: record.spec,
    }
}

// =============================================================================
// Sorting
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SortField {
    JobId,
    QueuedTime,
    StartTime,
    EndTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SortKey {
    field: SortField,
    descending: bool,
}

/// Parses `field[:asc|desc][,field[:asc|desc]...]`
fn parse_sort(sort: &str) -> Result<Vec<SortKey>> {
    sort.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (name, direction) = match part.split_once(':') {
                Some((name, direction)) => (name.trim(), direction.trim()),
                None => (part, "asc"),
            };

            let field = match name {
                "job_id" => SortField::JobId,
                "queued_time" => SortField::QueuedTime,
                "start_time" => SortField::StartTime,
                "end_time" => SortField::EndTime,
                other => {
                    return Err(SchedulerError::InvalidSort(format!(
                        "unknown field '{}'",
                        other
                    )));
                }
            };
            let descending = match direction.to_lowercase().as_str() {
                "asc" => false,
                "desc" => true,
                other => {
                    return Err(SchedulerError::InvalidSort(format!(
                        "unknown direction '{}'",
                        other
                    )));
                }
            };

            Ok(SortKey { field, descending })
        })
        .collect()
}

/// Applies each key as a stable sort in turn, so the last key dominates
fn sort_records(records: &mut [JobRecord], keys: &[SortKey]) {
    for key in keys {
        records.sort_by(|a, b| {
            let ordering = compare(a, b, key.field);
            if key.descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
    }
}

fn compare(a: &JobRecord, b: &JobRecord, field: SortField) -> Ordering {
    match field {
        SortField::JobId => a.job_id.cmp(&b.job_id),
        SortField::QueuedTime => a.queued_time.cmp(&b.queued_time),
        SortField::StartTime => a.start_time.cmp(&b.start_time),
        SortField::EndTime => a.end_time.cmp(&b.end_time),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBehavior, TestContext, eventually, submit};
    use berth_core::domain::job::GpuSpec;
    use chrono::DateTime;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

    fn record(job_id: &str, end_secs: i64) -> JobRecord {
        let entry = QueueEntry::new(
            job_id,
            berth_core::domain::spec::ContainerSpec::new("alpine"),
            Default::default(),
            GpuSpec::default(),
        );
        let mut record = JobRecord::from(entry);
        record.end_time = DateTime::from_timestamp(1_700_000_000 + end_secs, 0);
        record
    }

    fn ids(records: &[JobRecord]) -> Vec<&str> {
        records.iter().map(|r| r.job_id.as_str()).collect()
    }

    #[test]
    fn test_parse_sort() {
        assert_eq!(
            parse_sort("end_time:desc, job_id").unwrap(),
            vec![
                SortKey { field: SortField::EndTime, descending: true },
                SortKey { field: SortField::JobId, descending: false },
            ]
        );
        assert!(matches!(parse_sort("size"), Err(SchedulerError::InvalidSort(_))));
        assert!(matches!(
            parse_sort("job_id:sideways"),
            Err(SchedulerError::InvalidSort(_))
        ));
    }

    #[test]
    fn test_last_sort_key_dominates() {
        let mut records = vec![record("b", 10), record("a", 20), record("c", 10)];

        sort_records(&mut records, &parse_sort("job_id,end_time:desc").unwrap());
        assert_eq!(ids(&records), vec!["a", "b", "c"]);

        sort_records(&mut records, &parse_sort("job_id:desc,end_time").unwrap());
        assert_eq!(ids(&records), vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_get_job_searches_every_state() {
        let ctx = TestContext::new(&[]);
        let state = AppState::new(ctx.scheduler.clone());
        ctx.backend.script("long", FakeBehavior::Block);

        submit(&ctx.scheduler, "long", GpuSpec::default()).await;
        submit(&ctx.scheduler, "waiting", GpuSpec::default()).await;

        let view = get_job(&state, "waiting").await.unwrap();
        assert_eq!(view.status, JobStatus::Queued);

        state.workers.add().await;
        eventually(|| async {
            matches!(get_job(&state, "long").await, Ok(view) if view.status == JobStatus::Running)
        })
        .await;
        let view = get_job(&state, "long").await.unwrap();
        assert_eq!(view.logs.as_deref(), Some("output of long\n"));
        assert_eq!(
            container_id(&state, "long").await.unwrap().container_id,
            "fake-long"
        );

        stop_running(&state, "long", false).await.unwrap();
        let view = get_job(&state, "long").await.unwrap();
        assert_eq!(view.status, JobStatus::Failed);

        eventually(|| async {
            matches!(get_job(&state, "waiting").await, Ok(view) if view.status == JobStatus::Completed)
        })
        .await;

        assert!(matches!(
            get_job(&state, "nope").await,
            Err(SchedulerError::JobNotFound(_))
        ));
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_get_job_finds_a_job_being_requeued() {
        let ctx = TestContext::new(&["0"]);
        let state = AppState::new(ctx.scheduler.clone());
        ctx.backend.script("bouncing", FakeBehavior::Block);
        submit(&ctx.scheduler, "bouncing", GpuSpec::with_gpus(1)).await;
        state.workers.add().await;

        let done = Arc::new(AtomicBool::new(false));
        let reader = {
            let state = state.clone();
            let done = Arc::clone(&done);
            tokio::spawn(async move {
                while !done.load(AtomicOrdering::SeqCst) {
                    get_job(&state, "bouncing").await?;
                    tokio::task::yield_now().await;
                }
                Ok::<_, SchedulerError>(())
            })
        };

        for _ in 0..5 {
            eventually(|| async {
                matches!(get_job(&state, "bouncing").await, Ok(view) if view.status == JobStatus::Running)
            })
            .await;
            stop_running(&state, "bouncing", true).await.unwrap();
        }

        done.store(true, AtomicOrdering::SeqCst);
        reader.await.unwrap().unwrap();
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_finished_logs_and_delete() {
        let ctx = TestContext::new(&[]);
        let state = AppState::new(ctx.scheduler.clone());
        ctx.backend.script("bad", FakeBehavior::Exit(2));
        submit(&ctx.scheduler, "ok", GpuSpec::default()).await;
        submit(&ctx.scheduler, "bad", GpuSpec::default()).await;

        state.workers.add().await;
        let stores = ctx.scheduler.stores().clone();
        eventually(|| async { stores.failed.contains("bad").await.unwrap() }).await;

        let logs = finished_logs(&state, "ok", JobStatus::Completed).await.unwrap();
        assert_eq!(logs.logs, "output of ok\n");
        assert!(matches!(
            finished_logs(&state, "ok", JobStatus::Failed).await,
            Err(SchedulerError::JobNotFound(_))
        ));

        let archive = ctx.scheduler.workspace().archive_path("bad").unwrap();
        std::fs::create_dir_all(&archive).unwrap();

        delete_finished(&state, "bad").await.unwrap();
        assert!(!archive.exists());
        assert!(list_failed(&state, None).await.unwrap().is_empty());
        assert!(matches!(
            delete_finished(&state, "bad").await,
            Err(SchedulerError::JobNotFound(_))
        ));
        assert_eq!(ctx.observer.events_for("bad").last().map(String::as_str), Some("deleted"));
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_queue_operations() {
        let ctx = TestContext::new(&[]);
        let state = AppState::new(ctx.scheduler.clone());

        let submitted = submit_job(
            &state,
            SubmitJob {
                job_id: None,
                spec: berth_core::domain::spec::ContainerSpec::new("alpine"),
                metadata: Default::default(),
                gpu_spec: GpuSpec::default(),
            },
        )
        .await
        .unwrap();
        assert_eq!(submitted.position, 0);
        assert_eq!(submitted.job_id.len(), 36);

        submit(&ctx.scheduler, "second", GpuSpec::default()).await;
        reposition(&state, 1, 0).await.unwrap();
        assert_eq!(get_queued(&state, 0).await.unwrap().entry.job_id, "second");

        assert!(reposition(&state, 0, 5).await.is_err());
        let queued = list_queued(&state).await.unwrap();
        assert_eq!(queued[0].entry.job_id, "second");
        assert_eq!(queued[1].position, 1);

        assert!(matches!(
            submit_job(
                &state,
                SubmitJob {
                    job_id: Some("second".to_string()),
                    spec: berth_core::domain::spec::ContainerSpec::new("alpine"),
                    metadata: Default::default(),
                    gpu_spec: GpuSpec::default(),
                },
            )
            .await,
            Err(SchedulerError::DuplicateJob(_))
        ));

        let removed = delete_queued(&state, 0).await.unwrap();
        assert_eq!(removed.job_id, "second");
        assert_eq!(list_queued(&state).await.unwrap().len(), 1);
    }
}
