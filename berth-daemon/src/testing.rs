//! Test doubles shared by the daemon's unit tests

use async_trait::async_trait;
use berth_core::domain::job::{GpuSpec, JobRecord, QueueEntry};
use berth_core::domain::spec::ContainerSpec;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

use crate::backend::{BackendError, ExecutionBackend, ExecutionHandle};
use crate::config::Config;
use crate::observer::{JobObserver, ObserverSet};
use crate::repository::Stores;
use crate::scheduler::Scheduler;

/// How a fake run behaves
#[derive(Debug, Clone)]
pub enum FakeBehavior {
    /// Exits right away with the code
    Exit(i64),
    /// Fails to start
    FailStart(String),
    /// Runs until stopped or released
    Block,
    /// Loses track of the run while waiting
    LoseConnection(String),
}

#[derive(Default)]
struct FakeState {
    scripts: Vec<(String, FakeBehavior)>,
    started: Vec<(String, ContainerSpec)>,
    stopped: Vec<String>,
    removed: Vec<String>,
}

/// Backend that runs nothing and records every call
pub struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
    release: watch::Sender<Option<i64>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        let (release, _) = watch::channel(None);
        Self {
            state: Arc::new(Mutex::new(FakeState::default())),
            release,
        }
    }

    /// Applies `behavior` to every job id starting with `prefix`
    pub fn script(&self, prefix: &str, behavior: FakeBehavior) {
        self.state
            .lock()
            .unwrap()
            .scripts
            .push((prefix.to_string(), behavior));
    }

    /// Lets every blocked run, present and future, exit with `code`
    pub fn release(&self, code: i64) {
        self.release.send_replace(Some(code));
    }

    pub fn started(&self) -> Vec<(String, ContainerSpec)> {
        self.state.lock().unwrap().started.clone()
    }

    pub fn started_spec(&self, job_id: &str) -> Option<ContainerSpec> {
        self.started()
            .into_iter()
            .find(|(id, _)| id == job_id)
            .map(|(_, spec)| spec)
    }

    pub fn was_stopped(&self, job_id: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .stopped
            .iter()
            .any(|id| id == job_id)
    }

    /// Ids of removed handles
    pub fn removed(&self) -> Vec<String> {
        self.state.lock().unwrap().removed.clone()
    }

    fn behavior_for(&self, job_id: &str) -> FakeBehavior {
        self.state
            .lock()
            .unwrap()
            .scripts
            .iter()
            .find(|(prefix, _)| job_id.starts_with(prefix.as_str()))
            .map(|(_, behavior)| behavior.clone())
            .unwrap_or(FakeBehavior::Exit(0))
    }
}

#[async_trait]
impl ExecutionBackend for FakeBackend {
    async fn run(
        &self,
        job_id: &str,
        spec: &ContainerSpec,
    ) -> Result<Arc<dyn ExecutionHandle>, BackendError> {
        let behavior = self.behavior_for(job_id);
        if let FakeBehavior::FailStart(message) = &behavior {
            return Err(BackendError::Start(message.clone()));
        }

        self.state
            .lock()
            .unwrap()
            .started
            .push((job_id.to_string(), spec.clone()));

        let (stopped, _) = watch::channel(false);
        Ok(Arc::new(FakeHandle {
            id: format!("fake-{}", job_id),
            job_id: job_id.to_string(),
            behavior,
            stopped,
            release: self.release.subscribe(),
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeHandle {
    id: String,
    job_id: String,
    behavior: FakeBehavior,
    stopped: watch::Sender<bool>,
    release: watch::Receiver<Option<i64>>,
    state: Arc<Mutex<FakeState>>,
}

#[async_trait]
impl ExecutionHandle for FakeHandle {
    fn id(&self) -> &str {
        &self.id
    }

    async fn wait(&self) -> Result<i64, BackendError> {
        match &self.behavior {
            FakeBehavior::Exit(code) => Ok(*code),
            FakeBehavior::LoseConnection(message) => {
                Err(BackendError::ConnectionLost(message.clone()))
            }
            FakeBehavior::FailStart(message) => Err(BackendError::Start(message.clone())),
            FakeBehavior::Block => {
                let mut stopped = self.stopped.subscribe();
                let mut release = self.release.clone();
                tokio::select! {
                    _ = stopped.wait_for(|stopped| *stopped) => Ok(137),
                    code = async { release.wait_for(Option::is_some).await.map(|code| (*code).unwrap_or(0)) } => {
                        code.map_err(|e| BackendError::ConnectionLost(e.to_string()))
                    }
                }
            }
        }
    }

    async fn logs(&self) -> Result<Vec<u8>, BackendError> {
        Ok(format!("output of {}\n", self.job_id).into_bytes())
    }

    async fn stop(&self, _timeout: Duration) -> Result<(), BackendError> {
        self.state.lock().unwrap().stopped.push(self.job_id.clone());
        self.stopped.send_replace(true);
        Ok(())
    }

    async fn remove(&self) -> Result<(), BackendError> {
        self.state.lock().unwrap().removed.push(self.id.clone());
        Ok(())
    }
}

/// Observer remembering every event as `(event, job_id)`
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<(String, String)>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<(String, String)> {
        self.events.lock().unwrap().clone()
    }

    /// Events of one job, in order
    pub fn events_for(&self, job_id: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|(_, id)| id == job_id)
            .map(|(event, _)| event)
            .collect()
    }

    fn push(&self, event: &str, job_id: &str) -> anyhow::Result<()> {
        self.events
            .lock()
            .unwrap()
            .push((event.to_string(), job_id.to_string()));
        Ok(())
    }
}

impl JobObserver for RecordingObserver {
    fn name(&self) -> &str {
        "recording"
    }

    fn queued(&self, entry: &QueueEntry) -> anyhow::Result<()> {
        self.push("queued", &entry.job_id)
    }

    fn running(&self, record: &JobRecord) -> anyhow::Result<()> {
        self.push("running", &record.job_id)
    }

    fn completed(&self, record: &JobRecord) -> anyhow::Result<()> {
        self.push("completed", &record.job_id)
    }

    fn failed(&self, record: &JobRecord) -> anyhow::Result<()> {
        self.push("failed", &record.job_id)
    }

    fn deleted(&self, job_id: &str) -> anyhow::Result<()> {
        self.push("deleted", job_id)
    }
}

/// A scheduler over in-memory stores, a fake backend and temp directories
pub struct TestContext {
    pub scheduler: Arc<Scheduler>,
    pub backend: Arc<FakeBackend>,
    pub observer: Arc<RecordingObserver>,
    pub root: TempDir,
}

impl TestContext {
    pub fn new(gpus: &[&str]) -> Self {
        let root = TempDir::new().unwrap();

        let mut config = Config::new();
        config.poll_interval = Duration::from_millis(20);
        config.stop_timeout = Duration::from_secs(1);
        config.gpu_ids = gpus.iter().map(|id| id.to_string()).collect();
        config.working_dir = root.path().join("working");
        config.archive_dir = root.path().join("archives");

        let backend = Arc::new(FakeBackend::new());
        let observer = Arc::new(RecordingObserver::default());
        let scheduler = Scheduler::new(
            config,
            Stores::memory(),
            backend.clone(),
            ObserverSet::new().with(observer.clone()),
        );

        Self {
            scheduler,
            backend,
            observer,
            root,
        }
    }
}

/// Queues an `alpine` job under `job_id`
pub async fn submit(scheduler: &Scheduler, job_id: &str, gpu_spec: GpuSpec) {
    scheduler
        .submit(
            Some(job_id.to_string()),
            ContainerSpec::new("alpine"),
            Default::default(),
            gpu_spec,
        )
        .await
        .unwrap();
}

/// Polls `condition` until it holds, failing the test after five seconds
pub async fn eventually<F, Fut>(condition: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5s"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
