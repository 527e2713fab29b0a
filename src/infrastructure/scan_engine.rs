//! Scan engine API client
//!
//! All normalization of the engine's loosely-shaped responses happens here,
//! at the poller boundary: fields arrive under inconsistent names and are
//! optional almost everywhere, so they are folded into one strict internal
//! shape before anything else touches the data. Missing fields fall back to
//! the previous record's values, never to zero/empty, to avoid visually
//! erasing known-good information.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::application::errors::{ApiError, TrackError};
use crate::domain::job::entities::{JobDelta, JobRecord, JobStatus, RecordSource};

/// Job submission request body.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitScanRequest {
    pub target: String,
    pub requester_id: String,
    pub metadata: serde_json::Value,
}

/// Scan engine acceptance response.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitScanResponse {
    #[serde(alias = "jobId", alias = "id")]
    pub job_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, alias = "etaSeconds", alias = "eta")]
    pub eta_seconds: Option<u64>,
}

impl SubmitScanResponse {
    /// Status the record starts in. An acceptance without a recognizable
    /// status is treated as queued.
    pub fn initial_status(&self) -> JobStatus {
        self.status
            .as_deref()
            .and_then(JobStatus::from_raw)
            .unwrap_or(JobStatus::Queued)
    }
}

/// Raw, loosely-shaped status payload as the engine actually emits it.
/// Also the element shape of the list endpoint, which additionally
/// carries `job_id` and `target`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJobStatus {
    #[serde(default, alias = "jobId", alias = "id")]
    pub job_id: Option<String>,
    #[serde(default, alias = "url")]
    pub target: Option<String>,
    #[serde(default, alias = "state")]
    pub status: Option<String>,
    #[serde(default, alias = "progressPercent", alias = "progress", alias = "percent")]
    pub progress_percent: Option<u64>,
    #[serde(default, alias = "phase")]
    pub stage: Option<String>,
    #[serde(
        default,
        alias = "stageDescription",
        alias = "stage_detail",
        alias = "detail"
    )]
    pub stage_description: Option<String>,
    #[serde(default, alias = "etaSeconds", alias = "eta")]
    pub eta_seconds: Option<u64>,
    #[serde(default, alias = "findingsCount", alias = "findings")]
    pub findings_count: Option<u32>,
}

impl RawJobStatus {
    /// Normalize into a candidate delta against the previous record.
    pub fn into_delta(self, previous: &JobRecord) -> JobDelta {
        JobDelta {
            status: self
                .status
                .as_deref()
                .and_then(JobStatus::from_raw)
                .unwrap_or(previous.status),
            progress_percent: self
                .progress_percent
                .map(JobDelta::clamp_progress)
                .unwrap_or(previous.progress_percent),
            stage: self.stage.unwrap_or_else(|| previous.stage.clone()),
            stage_description: self
                .stage_description
                .unwrap_or_else(|| previous.stage_description.clone()),
            eta_seconds: self.eta_seconds.or(previous.eta_seconds),
            findings_count: self.findings_count.or(previous.findings_count),
            observed_at: chrono::Utc::now(),
        }
    }

    /// Build a standalone record from a list entry. Entries without a job
    /// id cannot be tracked and yield `None`.
    pub fn into_fetched_record(self) -> Option<JobRecord> {
        let job_id = self.job_id.clone()?;
        Some(JobRecord {
            job_id,
            target: self.target.clone().unwrap_or_default(),
            status: self
                .status
                .as_deref()
                .and_then(JobStatus::from_raw)
                .unwrap_or(JobStatus::Queued),
            progress_percent: self
                .progress_percent
                .map(JobDelta::clamp_progress)
                .unwrap_or(0),
            stage: self.stage.unwrap_or_default(),
            stage_description: self.stage_description.unwrap_or_default(),
            stale_count: 0,
            eta_seconds: self.eta_seconds,
            findings_count: self.findings_count,
            last_checked_at: chrono::Utc::now(),
            source: RecordSource::Fetched,
        })
    }
}

/// Scan engine surface the tracking engine depends on.
#[async_trait]
pub trait ScanEngineApi: Send + Sync {
    /// Submit a new scan. Engine rejection is distinct from a client-side
    /// credit rejection, which happens before this call.
    async fn submit_scan(&self, request: &SubmitScanRequest)
        -> Result<SubmitScanResponse, TrackError>;

    /// Fetch the current status of one job. A 404 signals
    /// [`TrackError::NotFound`], which is terminal.
    async fn poll_status(&self, job_id: &str) -> Result<RawJobStatus, TrackError>;

    /// Fetch all jobs owned by the requester.
    async fn list_jobs(&self, requester_id: &str) -> Result<Vec<RawJobStatus>, TrackError>;

    /// Keep the caller's authenticated session alive.
    async fn heartbeat(&self) -> Result<(), TrackError>;
}

/// HTTP client for the scan engine.
pub struct ScanEngineClient {
    client: Client,
    base_url: String,
}

impl ScanEngineClient {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, TrackError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("scanwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(TrackError::from)?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn error_from_response(response: reqwest::Response) -> TrackError {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        TrackError::Api(ApiError::Http { status, message })
    }
}

#[async_trait]
impl ScanEngineApi for ScanEngineClient {
    async fn submit_scan(
        &self,
        request: &SubmitScanRequest,
    ) -> Result<SubmitScanResponse, TrackError> {
        let url = format!("{}/scans", self.base_url);
        let response = self.client.post(&url).json(request).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            // 4xx means the engine looked at the submission and said no
            if status < 500 {
                return Err(TrackError::Rejected(message));
            }
            return Err(TrackError::Api(ApiError::Http { status, message }));
        }

        let accepted: SubmitScanResponse = response.json().await?;
        debug!(job_id = %accepted.job_id, "Scan engine accepted submission");
        Ok(accepted)
    }

    async fn poll_status(&self, job_id: &str) -> Result<RawJobStatus, TrackError> {
        let url = format!("{}/scans/{}", self.base_url, job_id);
        let response = self.client.get(&url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(TrackError::NotFound {
                job_id: job_id.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        Ok(response.json().await?)
    }

    async fn list_jobs(&self, requester_id: &str) -> Result<Vec<RawJobStatus>, TrackError> {
        let url = format!("{}/scans", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("requester_id", requester_id)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        Ok(response.json().await?)
    }

    async fn heartbeat(&self) -> Result<(), TrackError> {
        let url = format!("{}/session/heartbeat", self.base_url);
        let response = self.client.post(&url).send().await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }
        Ok(())
    }
}
