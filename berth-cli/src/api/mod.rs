//! API client module
//!
//! HTTP client for communicating with the berth daemon API.

use anyhow::{Context, Result};
use berth_core::domain::job::{JobRecord, JobStatus, QueueEntry};
use berth_core::domain::schedule::CronState;
use berth_core::dto::job::{
    ContainerInfo, JobLogsView, JobSubmitted, JobView, QueuedJob, RepositionJob, SubmitJob,
};
use berth_core::dto::schedule::{CreateScheduledJob, CronStatus, RescheduleJob, UpdateScheduleStatus};
use berth_core::dto::worker::{WorkerCreated, WorkerSummary};
use reqwest::Client;
use serde_json::Value;

/// HTTP client for the berth daemon API
pub struct ApiClient {
    base_url: String,
    client: Client,
}

impl ApiClient {
    /// Create a new API client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the daemon API
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    pub async fn health(&self) -> Result<Value> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send health request")?;

        self.handle_response(response).await
    }

    // =========================================================================
    // Queue
    // =========================================================================

    /// Submit a job to the queue
    ///
    /// # Returns
    /// The job id and its position in the queue
    pub async fn submit_job(&self, req: &SubmitJob) -> Result<JobSubmitted> {
        let url = format!("{}/queued_jobs", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(req)
            .send()
            .await
            .context("Failed to send submit job request")?;

        self.handle_response(response).await
    }

    pub async fn list_queued_jobs(&self) -> Result<Vec<QueuedJob>> {
        let url = format!("{}/queued_jobs", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send list queued jobs request")?;

        self.handle_response(response).await
    }

    pub async fn get_queued_job(&self, position: usize) -> Result<QueuedJob> {
        let url = format!("{}/queued_jobs/{}", self.base_url, position);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send get queued job request")?;

        self.handle_response(response).await
    }

    /// Move the job at `from` to position `to`
    pub async fn reposition_job(&self, from: usize, to: usize) -> Result<()> {
        let url = format!("{}/queued_jobs/{}", self.base_url, from);
        let response = self
            .client
            .patch(&url)
            .json(&RepositionJob { position: to })
            .send()
            .await
            .context("Failed to send reposition request")?;

        self.expect_success(response).await
    }

    /// Remove the job at `position` from the queue
    ///
    /// # Returns
    /// The removed entry
    pub async fn delete_queued_job(&self, position: usize) -> Result<QueueEntry> {
        let url = format!("{}/queued_jobs/{}", self.base_url, position);
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .context("Failed to send delete queued job request")?;

        self.handle_response(response).await
    }

    // =========================================================================
    // Running jobs
    // =========================================================================

    pub async fn list_running_jobs(&self) -> Result<Vec<JobRecord>> {
        let url = format!("{}/running_jobs", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send list running jobs request")?;

        self.handle_response(response).await
    }

    /// Stop a running job
    ///
    /// # Arguments
    /// * `job_id` - The running job
    /// * `reschedule` - Put the job back at the head of the queue instead of failing it
    pub async fn stop_job(&self, job_id: &str, reschedule: bool) -> Result<()> {
        let url = format!("{}/running_jobs/{}", self.base_url, job_id);
        let response = self
            .client
            .delete(&url)
            .query(&[("reschedule", reschedule)])
            .send()
            .await
            .context("Failed to send stop job request")?;

        self.expect_success(response).await
    }

    pub async fn get_running_logs(&self, job_id: &str) -> Result<JobLogsView> {
        let url = format!("{}/running_jobs/{}/logs", self.base_url, job_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send get running logs request")?;

        self.handle_response(response).await
    }

    pub async fn get_container_id(&self, job_id: &str) -> Result<ContainerInfo> {
        let url = format!("{}/running_jobs/{}/container_id", self.base_url, job_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send get container id request")?;

        self.handle_response(response).await
    }

    // =========================================================================
    // Finished jobs
    // =========================================================================

    /// List completed or failed jobs
    ///
    /// # Arguments
    /// * `status` - `Completed` or `Failed`
    /// * `sort` - Optional `field[:asc|desc],...` ordering
    pub async fn list_finished_jobs(
        &self,
        status: JobStatus,
        sort: Option<&str>,
    ) -> Result<Vec<JobRecord>> {
        let url = format!("{}/{}", self.base_url, finished_collection(status));
        let mut request = self.client.get(&url);
        if let Some(sort) = sort {
            request = request.query(&[("sort", sort)]);
        }
        let response = request
            .send()
            .await
            .context("Failed to send list finished jobs request")?;

        self.handle_response(response).await
    }

    pub async fn get_finished_logs(&self, status: JobStatus, job_id: &str) -> Result<JobLogsView> {
        let url = format!(
            "{}/{}/{}/logs",
            self.base_url,
            finished_collection(status),
            job_id
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send get finished logs request")?;

        self.handle_response(response).await
    }

    pub async fn delete_finished_job(&self, status: JobStatus, job_id: &str) -> Result<()> {
        let url = format!(
            "{}/{}/{}",
            self.base_url,
            finished_collection(status),
            job_id
        );
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .context("Failed to send delete finished job request")?;

        self.expect_success(response).await
    }

    /// Look a job up in every state
    pub async fn get_job(&self, job_id: &str) -> Result<JobView> {
        let url = format!("{}/jobs/{}", self.base_url, job_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send get job request")?;

        self.handle_response(response).await
    }

    // =========================================================================
    // Workers
    // =========================================================================

    pub async fn list_workers(&self) -> Result<Vec<WorkerSummary>> {
        let url = format!("{}/workers", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send list workers request")?;

        self.handle_response(response).await
    }

    pub async fn add_worker(&self) -> Result<WorkerCreated> {
        let url = format!("{}/workers", self.base_url);
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .context("Failed to send add worker request")?;

        self.handle_response(response).await
    }

    pub async fn delete_worker(&self, worker_id: u32, reschedule: bool) -> Result<()> {
        let url = format!("{}/workers/{}", self.base_url, worker_id);
        let response = self
            .client
            .delete(&url)
            .query(&[("reschedule", reschedule)])
            .send()
            .await
            .context("Failed to send delete worker request")?;

        self.expect_success(response).await
    }

    // =========================================================================
    // Scheduled jobs
    // =========================================================================

    pub async fn create_scheduled_job(&self, req: &CreateScheduledJob) -> Result<CronStatus> {
        let url = format!("{}/scheduled_jobs", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(req)
            .send()
            .await
            .context("Failed to send create scheduled job request")?;

        self.handle_response(response).await
    }

    pub async fn list_scheduled_jobs(&self) -> Result<Vec<CronStatus>> {
        let url = format!("{}/scheduled_jobs", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send list scheduled jobs request")?;

        self.handle_response(response).await
    }

    pub async fn get_scheduled_job(&self, job_id: &str) -> Result<CronStatus> {
        let url = format!("{}/scheduled_jobs/{}", self.base_url, job_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send get scheduled job request")?;

        self.handle_response(response).await
    }

    /// Pause or resume a scheduled job
    pub async fn set_schedule_status(&self, job_id: &str, status: CronState) -> Result<CronStatus> {
        let url = format!("{}/scheduled_jobs/{}/status", self.base_url, job_id);
        let response = self
            .client
            .put(&url)
            .json(&UpdateScheduleStatus { status })
            .send()
            .await
            .context("Failed to send update schedule status request")?;

        self.handle_response(response).await
    }

    pub async fn reschedule_job(&self, job_id: &str, schedule: Value) -> Result<CronStatus> {
        let url = format!("{}/scheduled_jobs/{}", self.base_url, job_id);
        let response = self
            .client
            .patch(&url)
            .json(&RescheduleJob { schedule })
            .send()
            .await
            .context("Failed to send reschedule request")?;

        self.handle_response(response).await
    }

    pub async fn delete_scheduled_job(&self, job_id: &str) -> Result<()> {
        let url = format!("{}/scheduled_jobs/{}", self.base_url, job_id);
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .context("Failed to send delete scheduled job request")?;

        self.expect_success(response).await
    }

    /// Handle API response and deserialize JSON
    ///
    /// # Arguments
    /// * `response` - The HTTP response
    ///
    /// # Returns
    /// The deserialized response body
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Request failed with status {}: {}", status, error_text);
        }

        response
            .json()
            .await
            .context("Failed to parse response JSON")
    }

    /// Handle an API response that carries no body
    async fn expect_success(&self, response: reqwest::Response) -> Result<()> {
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Request failed with status {}: {}", status, error_text);
        }

        Ok(())
    }
}

fn finished_collection(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Failed => "failed_jobs",
        _ => "completed_jobs",
    }
}
