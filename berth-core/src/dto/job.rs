//! Job DTOs

use serde::{Deserialize, Serialize};

use crate::domain::job::{GpuSpec, JobRecord, JobStatus, Metadata, QueueEntry};
use crate::domain::spec::ContainerSpec;

/// Request to enqueue a job
///
/// `job_id` is generated when omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJob {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub spec: ContainerSpec,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub gpu_spec: GpuSpec,
}

/// Response to a successful submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmitted {
    pub job_id: String,
    pub position: usize,
}

/// Queue entry together with its current position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedJob {
    pub position: usize,
    #[serde(flatten)]
    pub entry: QueueEntry,
}

/// Request to move a queued job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositionJob {
    pub position: usize,
}

/// Query string of the stop endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StopQuery {
    #[serde(default)]
    pub reschedule: bool,
}

/// Query string of the completed-jobs listing
///
/// `sort` is a comma-separated list of `field[:asc|desc]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SortQuery {
    #[serde(default)]
    pub sort: Option<String>,
}

/// Unified view of a job wherever it currently is
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    pub job_id: String,
    pub status: JobStatus,
    pub logs: Option<String>,
    pub spec: ContainerSpec,
}

/// Job record tagged with the store it was read from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecordView {
    pub status: JobStatus,
    #[serde(flatten)]
    pub record: JobRecord,
}

/// Logs of a single job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLogsView {
    pub job_id: String,
    pub logs: String,
}

/// Backend handle id of a running job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub job_id: String,
    pub container_id: String,
}
