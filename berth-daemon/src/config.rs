//! Daemon configuration
//!
//! Defines all configurable parameters for the daemon including the worker
//! pool size, the GPU pool, filesystem locations and the store backend.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Where job and schedule state is kept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Sqlite,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "sqlite" => Ok(StoreBackend::Sqlite),
            other => anyhow::bail!("unknown store backend '{}' (expected memory or sqlite)", other),
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Workers created at startup
    pub num_workers: usize,

    /// How often each worker polls the queue
    pub poll_interval: Duration,

    /// GPU ids making up the pool
    pub gpu_ids: Vec<String>,

    /// Maximum number of cron workers
    pub max_scheduled_jobs: usize,

    /// Grace period given to a container being stopped
    pub stop_timeout: Duration,

    /// Parent of the per-job working directories
    pub working_dir: PathBuf,

    /// Parent of the per-job archives
    pub archive_dir: PathBuf,

    /// Container-side mount point of a job's source directory
    pub job_source_mount: String,

    /// Keep working directories after a job finishes
    pub retain_working_dirs: bool,

    /// Container CLI used by the execution backend (docker or podman)
    pub container_runtime: String,

    /// Max size of a run's json-file log
    pub log_max_size: String,

    pub store_backend: StoreBackend,

    /// SQLite location, used by the sqlite store backend
    pub database_url: String,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new() -> Self {
        Self {
            num_workers: 1,
            poll_interval: Duration::from_secs(2),
            gpu_ids: Vec::new(),
            max_scheduled_jobs: 10,
            stop_timeout: Duration::from_secs(5),
            working_dir: PathBuf::from("/working_dir"),
            archive_dir: PathBuf::from("/archives/archive"),
            job_source_mount: "/job/job_source".to_string(),
            retain_working_dirs: false,
            container_runtime: "docker".to_string(),
            log_max_size: "1g".to_string(),
            store_backend: StoreBackend::Memory,
            database_url: "sqlite://berth.db?mode=rwc".to_string(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Every variable is optional:
    /// - NUM_WORKERS (default: 1)
    /// - POLL_INTERVAL (seconds, default: 2)
    /// - CUDA_VISIBLE_DEVICES (comma-separated GPU ids, default: none)
    /// - MAX_SCHEDULED_JOBS (default: 10)
    /// - STOP_TIMEOUT (seconds, default: 5)
    /// - WORKING_DIR (default: /working_dir)
    /// - ARCHIVE_DIR (default: /archives/archive)
    /// - JOB_SOURCE_MOUNT (default: /job/job_source)
    /// - RETAIN_WORKING_DIRS (default: false)
    /// - CONTAINER_RUNTIME (default: docker)
    /// - LOG_MAX_SIZE (default: 1g)
    /// - STORE_BACKEND (memory or sqlite, default: memory)
    /// - DATABASE_URL (default: sqlite://berth.db?mode=rwc)
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::new();

        let num_workers = std::env::var("NUM_WORKERS")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.num_workers);

        let poll_interval = std::env::var("POLL_INTERVAL")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.poll_interval);

        let gpu_ids = std::env::var("CUDA_VISIBLE_DEVICES")
            .map(|s| parse_gpu_ids(&s))
            .unwrap_or_default();

        let max_scheduled_jobs = std::env::var("MAX_SCHEDULED_JOBS")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.max_scheduled_jobs);

        let stop_timeout = std::env::var("STOP_TIMEOUT")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.stop_timeout);

        let retain_working_dirs = std::env::var("RETAIN_WORKING_DIRS")
            .ok()
            .map(|s| matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(defaults.retain_working_dirs);

        let store_backend = match std::env::var("STORE_BACKEND") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.store_backend,
        };

        Ok(Self {
            num_workers,
            poll_interval,
            gpu_ids,
            max_scheduled_jobs,
            stop_timeout,
            working_dir: std::env::var("WORKING_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.working_dir),
            archive_dir: std::env::var("ARCHIVE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.archive_dir),
            job_source_mount: std::env::var("JOB_SOURCE_MOUNT")
                .unwrap_or(defaults.job_source_mount),
            retain_working_dirs,
            container_runtime: std::env::var("CONTAINER_RUNTIME")
                .unwrap_or(defaults.container_runtime),
            log_max_size: std::env::var("LOG_MAX_SIZE").unwrap_or(defaults.log_max_size),
            store_backend,
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval.as_secs() == 0 {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.container_runtime.trim().is_empty() {
            anyhow::bail!("container_runtime cannot be empty");
        }

        if !self.job_source_mount.starts_with('/') {
            anyhow::bail!("job_source_mount must be an absolute path");
        }

        if self.log_max_size.trim().is_empty() {
            anyhow::bail!("log_max_size cannot be empty");
        }

        if self.store_backend == StoreBackend::Sqlite && !self.database_url.starts_with("sqlite:") {
            anyhow::bail!("database_url must be a sqlite: URL");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses a comma-separated GPU id list, dropping blanks and duplicates
pub fn parse_gpu_ids(value: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for id in value.split(',').map(str::trim).filter(|id| !id.is_empty()) {
        if !ids.iter().any(|existing| existing == id) {
            ids.push(id.to_string());
        }
    }
    ids
}
