//! Container execution specs
//!
//! A [`ContainerSpec`] describes one container run: image, command,
//! environment and volume bindings. Submitters send it as JSON; the daemon
//! normalizes it before handing it to the execution backend and rewrites it
//! when a scheduled job is materialized into a fresh run.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// Environment entry carrying the job id inside the container
pub const JOB_ID_ENV: &str = "JOB_ID";

/// Environment entry restricting the devices a GPU job may see
pub const GPU_DEVICES_ENV: &str = "NVIDIA_VISIBLE_DEVICES";

/// Log driver attached to every run
pub const JSON_LOG_DRIVER: &str = "json-file";

/// Label attached to every run's log config
pub const LOG_LABEL: &str = "berth_logging";

/// A command or entrypoint, given either as one string or as an argument list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandLine {
    Shell(String),
    Args(Vec<String>),
}

impl CommandLine {
    /// Splits the command into arguments
    ///
    /// String commands are split on whitespace; quoting is not interpreted.
    pub fn to_args(&self) -> Vec<String> {
        match self {
            CommandLine::Shell(line) => line.split_whitespace().map(String::from).collect(),
            CommandLine::Args(args) => args.clone(),
        }
    }
}

/// Host-side volume binding: where the host path is mounted in the container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeBinding {
    pub bind: String,
    #[serde(default = "default_mode")]
    pub mode: String,
}

fn default_mode() -> String {
    "rw".to_string()
}

/// Log driver configuration for a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(rename = "type")]
    pub driver: String,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

/// Container execution spec
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandLine>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<CommandLine>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,

    /// Host path -> binding
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, VolumeBinding>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub detach: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_config: Option<LogConfig>,

    /// Backend options this crate does not interpret, preserved verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContainerSpec {
    /// Creates a spec for an image with no command or bindings
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            command: None,
            entrypoint: None,
            environment: BTreeMap::new(),
            volumes: BTreeMap::new(),
            working_dir: None,
            runtime: None,
            name: None,
            detach: false,
            log_config: None,
            extra: Map::new(),
        }
    }

    /// Returns true if the image reference carries a tag or digest
    pub fn image_is_tagged(&self) -> bool {
        if self.image.contains('@') {
            return true;
        }
        // A colon before the last slash belongs to a registry port
        let last_segment = self.image.rsplit('/').next().unwrap_or(&self.image);
        last_segment.contains(':')
    }

    /// Returns the spec as it is handed to the execution backend
    ///
    /// Forces detached execution, attaches a size-bounded JSON log driver,
    /// defaults an untagged image to `:latest` and exposes the reserved
    /// GPU ids (if any) through [`GPU_DEVICES_ENV`].
    pub fn normalized(&self, gpu_ids: &[String], log_max_size: &str) -> ContainerSpec {
        let mut spec = self.clone();
        spec.detach = true;

        let mut log_options = BTreeMap::new();
        log_options.insert("max-size".to_string(), log_max_size.to_string());
        log_options.insert("labels".to_string(), LOG_LABEL.to_string());
        spec.log_config = Some(LogConfig {
            driver: JSON_LOG_DRIVER.to_string(),
            config: log_options,
        });

        if !spec.image_is_tagged() {
            spec.image = format!("{}:latest", spec.image);
        }

        if !gpu_ids.is_empty() {
            spec.environment
                .insert(GPU_DEVICES_ENV.to_string(), gpu_ids.join(","));
        }

        spec
    }

    /// Returns a copy of the spec rewritten for a materialized run
    ///
    /// The `JOB_ID` environment entry is set to `job_id`, and every volume
    /// mounted at `source_mount` has the last segment of its host path
    /// replaced by `job_id`.
    pub fn materialized(&self, job_id: &str, source_mount: &str) -> ContainerSpec {
        let mut spec = self.clone();
        spec.environment
            .insert(JOB_ID_ENV.to_string(), job_id.to_string());

        spec.volumes = self
            .volumes
            .iter()
            .map(|(host, binding)| {
                if binding.bind == source_mount {
                    (replace_last_segment(host, job_id), binding.clone())
                } else {
                    (host.clone(), binding.clone())
                }
            })
            .collect();

        spec
    }
}

fn replace_last_segment(host_path: &str, segment: &str) -> String {
    let trimmed = host_path.trim_end_matches('/');
    match Path::new(trimmed).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            parent.join(segment).to_string_lossy().to_string()
        }
        _ => segment.to_string(),
    }
}
