//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use thiserror::Error;

use crate::domain::spec::ContainerSpec;

/// Opaque submitter metadata carried along with a job
pub type Metadata = serde_json::Map<String, Value>;

/// GPU requirement of a job
///
/// `num_gpus` is kept exactly as submitted; [`GpuSpec::requested`] decides
/// whether it is usable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GpuSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_gpus: Option<Value>,
}

/// `num_gpus` could not be read as a non-negative integer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("num_gpus must be a non-negative integer, got {0}")]
pub struct InvalidGpuSpec(pub String);

impl GpuSpec {
    /// Spec requesting `count` GPUs
    pub fn with_gpus(count: u64) -> Self {
        Self {
            num_gpus: Some(Value::from(count)),
        }
    }

    /// Number of GPUs requested
    ///
    /// Missing or null means zero. Integers, integral floats and numeric
    /// strings are accepted as long as they are non-negative.
    pub fn requested(&self) -> Result<usize, InvalidGpuSpec> {
        let value = match &self.num_gpus {
            None | Some(Value::Null) => return Ok(0),
            Some(value) => value,
        };

        let invalid = || InvalidGpuSpec(value.to_string());

        match value {
            Value::Number(number) => {
                if let Some(n) = number.as_u64() {
                    return usize::try_from(n).map_err(|_| invalid());
                }
                match number.as_f64() {
                    Some(f) if f >= 0.0 && f.fract() == 0.0 && f <= u32::MAX as f64 => {
                        Ok(f as usize)
                    }
                    _ => Err(invalid()),
                }
            }
            Value::String(text) => text.trim().parse::<usize>().map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}

/// Entry in the job queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub queued_time: DateTime<Utc>,
    pub job_id: String,
    pub spec: ContainerSpec,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub gpu_spec: GpuSpec,
}

impl QueueEntry {
    /// Creates an entry queued now
    pub fn new(
        job_id: impl Into<String>,
        spec: ContainerSpec,
        metadata: Metadata,
        gpu_spec: GpuSpec,
    ) -> Self {
        Self {
            queued_time: Utc::now(),
            job_id: job_id.into(),
            spec,
            metadata,
            gpu_spec,
        }
    }
}

/// Output captured from a run
///
/// Text when the backend output is valid UTF-8, raw bytes otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobLogs {
    Text(String),
    Raw(Vec<u8>),
}

impl JobLogs {
    /// Decodes backend output, keeping the raw bytes if it is not UTF-8
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        match String::from_utf8(bytes) {
            Ok(text) => JobLogs::Text(text),
            Err(err) => JobLogs::Raw(err.into_bytes()),
        }
    }

    /// Renders the logs as text, replacing invalid sequences
    pub fn to_text_lossy(&self) -> Cow<'_, str> {
        match self {
            JobLogs::Text(text) => Cow::Borrowed(text),
            JobLogs::Raw(bytes) => String::from_utf8_lossy(bytes),
        }
    }
}

impl From<String> for JobLogs {
    fn from(text: String) -> Self {
        JobLogs::Text(text)
    }
}

/// Job record as held by the running, completed and failed stores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub spec: ContainerSpec,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub gpu_spec: GpuSpec,
    pub queued_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub return_code: Option<i64>,
    pub logs: Option<JobLogs>,
    /// GPU ids reserved for the run
    #[serde(default)]
    pub gpu_ids: Vec<String>,
    /// Worker (or cron worker) that ran the job
    pub worker_id: Option<String>,
}

impl JobRecord {
    /// Queue entry this record was created from
    pub fn queue_entry(&self) -> QueueEntry {
        QueueEntry {
            queued_time: self.queued_time,
            job_id: self.job_id.clone(),
            spec: self.spec.clone(),
            metadata: self.metadata.clone(),
            gpu_spec: self.gpu_spec.clone(),
        }
    }

    /// Wall-clock run time, if the job both started and ended
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        Some(self.end_time? - self.start_time?)
    }
}

impl From<QueueEntry> for JobRecord {
    fn from(entry: QueueEntry) -> Self {
        Self {
            job_id: entry.job_id,
            spec: entry.spec,
            metadata: entry.metadata,
            gpu_spec: entry.gpu_spec,
            queued_time: entry.queued_time,
            start_time: None,
            end_time: None,
            return_code: None,
            logs: None,
            gpu_ids: Vec::new(),
            worker_id: None,
        }
    }
}

/// Where a job currently is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    /// Held by a worker that has not started its container yet
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gpu_spec(value: Value) -> GpuSpec {
        GpuSpec {
            num_gpus: Some(value),
        }
    }

    #[test]
    fn test_requested_gpus_accepts_integers() {
        assert_eq!(GpuSpec::default().requested(), Ok(0));
        assert_eq!(gpu_spec(Value::Null).requested(), Ok(0));
        assert_eq!(gpu_spec(json!(2)).requested(), Ok(2));
        assert_eq!(gpu_spec(json!("3")).requested(), Ok(3));
        assert_eq!(gpu_spec(json!(1.0)).requested(), Ok(1));
    }

    #[test]
    fn test_requested_gpus_rejects_malformed_values() {
        assert!(gpu_spec(json!(-1)).requested().is_err());
        assert!(gpu_spec(json!(1.5)).requested().is_err());
        assert!(gpu_spec(json!("two")).requested().is_err());
        assert!(gpu_spec(json!([1])).requested().is_err());
        assert!(gpu_spec(json!(true)).requested().is_err());
    }

    #[test]
    fn test_logs_keep_raw_bytes_when_not_utf8() {
        assert_eq!(
            JobLogs::from_bytes(b"hello".to_vec()),
            JobLogs::Text("hello".to_string())
        );

        let raw = vec![0xff, 0xfe, b'a'];
        let logs = JobLogs::from_bytes(raw.clone());
        assert_eq!(logs, JobLogs::Raw(raw));
        assert!(logs.to_text_lossy().ends_with('a'));
    }

    #[test]
    fn test_record_from_entry_keeps_payload() {
        let mut metadata = Metadata::new();
        metadata.insert("project_name".to_string(), json!("demo"));
        let entry = QueueEntry::new(
            "job-1",
            ContainerSpec::new("alpine"),
            metadata,
            GpuSpec::with_gpus(1),
        );

        let record = JobRecord::from(entry.clone());
        assert_eq!(record.job_id, "job-1");
        assert!(record.start_time.is_none());
        assert_eq!(record.queue_entry(), entry);
    }
}
