//! Scheduled (recurring) job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::job::{GpuSpec, Metadata};
use crate::domain::spec::ContainerSpec;
use crate::trigger::TriggerError;

/// One cron field as submitted: a bare number or an expression string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(i64),
    Text(String),
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Text(text) => write!(f, "{}", text),
        }
    }
}

/// Cron schedule exactly as requested
///
/// Kept verbatim so a trigger can always be rebuilt from the original
/// request, including its start and end dates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CronSchedule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub week: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hour: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minute: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub second: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
}

impl CronSchedule {
    /// Parses a schedule from a JSON object, reporting bad input as invalid
    pub fn from_value(value: &Value) -> Result<Self, TriggerError> {
        if !value.is_object() {
            return Err(TriggerError::Invalid(
                "schedule must be an object".to_string(),
            ));
        }
        serde_json::from_value(value.clone()).map_err(|e| TriggerError::Invalid(e.to_string()))
    }

    /// Cron fields in order of decreasing significance
    pub fn fields(&self) -> [(&'static str, Option<&FieldValue>); 8] {
        [
            ("year", self.year.as_ref()),
            ("month", self.month.as_ref()),
            ("day", self.day.as_ref()),
            ("week", self.week.as_ref()),
            ("day_of_week", self.day_of_week.as_ref()),
            ("hour", self.hour.as_ref()),
            ("minute", self.minute.as_ref()),
            ("second", self.second.as_ref()),
        ]
    }

    /// Returns true if no cron field is set
    pub fn is_empty(&self) -> bool {
        self.fields().iter().all(|(_, value)| value.is_none())
    }
}

/// A job registered to run on a cron schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub job_id: String,
    pub spec: ContainerSpec,
    pub schedule: CronSchedule,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub gpu_spec: GpuSpec,
}

/// Whether a cron worker fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CronState {
    Active,
    Paused,
}

impl std::fmt::Display for CronState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CronState::Active => write!(f, "active"),
            CronState::Paused => write!(f, "paused"),
        }
    }
}

/// Persisted form of a cron worker
///
/// `next_fire_time` is `None` while the worker is paused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronRecord {
    pub worker_id: String,
    pub job: ScheduledJob,
    pub next_fire_time: Option<DateTime<Utc>>,
}

impl CronRecord {
    pub fn state(&self) -> CronState {
        if self.next_fire_time.is_some() {
            CronState::Active
        } else {
            CronState::Paused
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schedule_accepts_numbers_and_expressions() {
        let schedule = CronSchedule::from_value(&json!({
            "minute": "*/5",
            "hour": 3,
            "end_date": "2030-01-01"
        }))
        .unwrap();

        assert_eq!(schedule.minute, Some(FieldValue::Text("*/5".to_string())));
        assert_eq!(schedule.hour, Some(FieldValue::Number(3)));
        assert_eq!(schedule.end_date.as_deref(), Some("2030-01-01"));
        assert!(!schedule.is_empty());
    }

    #[test]
    fn test_schedule_rejects_unknown_fields() {
        let result = CronSchedule::from_value(&json!({ "minutes": "5" }));
        assert!(matches!(result, Err(TriggerError::Invalid(_))));

        let result = CronSchedule::from_value(&json!("*/5 * * * *"));
        assert!(matches!(result, Err(TriggerError::Invalid(_))));
    }

    #[test]
    fn test_empty_schedule() {
        let schedule = CronSchedule::from_value(&json!({})).unwrap();
        assert!(schedule.is_empty());
    }
}
