//! Scheduled job DTOs

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::domain::job::{GpuSpec, Metadata};
use crate::domain::schedule::{CronState, ScheduledJob};
use crate::domain::spec::ContainerSpec;

/// Request to schedule a recurring job
///
/// `schedule` stays untyped here so a malformed schedule is reported as an
/// invalid schedule rather than a malformed body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateScheduledJob {
    pub job_id: String,
    pub spec: ContainerSpec,
    pub schedule: Value,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub gpu_spec: GpuSpec,
}

/// Request to pause or resume a scheduled job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateScheduleStatus {
    pub status: CronState,
}

/// Request to replace the schedule of a scheduled job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleJob {
    pub schedule: Value,
}

/// Status of one cron worker
///
/// Run times are unix timestamps in whole seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronStatus {
    pub worker_id: String,
    pub job_id: String,
    pub status: CronState,
    pub next_run_time: Option<i64>,
    #[serde(default)]
    pub next_run_times: Vec<i64>,
    /// Resolved expression of every cron field
    pub schedule: BTreeMap<String, String>,
    /// Payload exactly as scheduled
    pub properties: ScheduledJob,
}
