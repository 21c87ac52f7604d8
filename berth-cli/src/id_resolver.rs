//! ID resolver module
//!
//! Lets users name jobs by an unambiguous prefix of their id.
//! Generated ids are UUIDs, which are tedious to type in full.

use anyhow::{Context, Result, anyhow};
use berth_core::domain::job::JobStatus;

use crate::api::ApiClient;

/// Resolve a job id or prefix to a full job id
///
/// An exact match wins. Otherwise every queued, running, completed and
/// failed job is searched for ids starting with the prefix.
///
/// # Errors
/// Returns an error if:
/// - No job matches the prefix
/// - Multiple jobs match the prefix (ambiguous)
/// - API call fails
pub async fn resolve_job_id(client: &ApiClient, id_or_prefix: &str) -> Result<String> {
    let mut ids: Vec<String> = client
        .list_queued_jobs()
        .await
        .context("Failed to fetch queued jobs for ID resolution")?
        .into_iter()
        .map(|job| job.entry.job_id)
        .collect();

    ids.extend(
        client
            .list_running_jobs()
            .await
            .context("Failed to fetch running jobs for ID resolution")?
            .into_iter()
            .map(|record| record.job_id),
    );

    for status in [JobStatus::Completed, JobStatus::Failed] {
        ids.extend(
            client
                .list_finished_jobs(status, None)
                .await
                .with_context(|| format!("Failed to fetch {} jobs for ID resolution", status))?
                .into_iter()
                .map(|record| record.job_id),
        );
    }

    match_prefix(&ids, id_or_prefix)
}

/// Pick the one id matching `id_or_prefix`
pub fn match_prefix(ids: &[String], id_or_prefix: &str) -> Result<String> {
    if ids.iter().any(|id| id == id_or_prefix) {
        return Ok(id_or_prefix.to_string());
    }

    let prefix = id_or_prefix.to_lowercase();
    let mut matches: Vec<&String> = ids
        .iter()
        .filter(|id| id.to_lowercase().starts_with(&prefix))
        .collect();
    matches.dedup();

    match matches.len() {
        0 => Err(anyhow!("No job found with ID starting with '{}'", id_or_prefix)),
        1 => Ok(matches[0].clone()),
        _ => {
            let ids: Vec<&str> = matches.iter().map(|id| id.as_str()).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple jobs: {}",
                id_or_prefix,
                ids.join(", ")
            ))
        }
    }
}
