//! Job record entities and the status state machine
//!
//! A [`JobRecord`] is the observed state of one scan submission. Its
//! progress fields are only ever mutated by the reconciler in
//! `application::reconciler`; everything else treats records as values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::JobError;

/// Lifecycle status of a scan job.
///
/// `Stalled` is a transient diagnostic state: it always resolves to
/// `Failed` and is never the final word on a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    TimedOut,
    Stalled,
}

impl JobStatus {
    /// Whether no further transition can occur from this status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::TimedOut
        )
    }

    /// Status transition table.
    ///
    /// Transitions not listed here are rejected by the reconciler (the
    /// existing status is kept). A status may always "transition" to itself.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if *self == next {
            return true;
        }
        match self {
            JobStatus::Queued => matches!(
                next,
                JobStatus::Processing
                    | JobStatus::Stalled
                    | JobStatus::Completed
                    | JobStatus::Failed
                    | JobStatus::TimedOut
            ),
            JobStatus::Processing => matches!(
                next,
                JobStatus::Stalled
                    | JobStatus::Completed
                    | JobStatus::Failed
                    | JobStatus::TimedOut
            ),
            JobStatus::Stalled => matches!(next, JobStatus::Failed),
            // Terminal states never leave.
            JobStatus::Completed | JobStatus::Failed | JobStatus::TimedOut => false,
        }
    }

    /// Validated transition, for call sites that want the rejection reason.
    pub fn transition_to(&self, next: JobStatus) -> Result<JobStatus, JobError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(JobError::InvalidTransition {
                from: *self,
                to: next,
            })
        }
    }

    /// Normalize one of the loosely-shaped status strings the scan engine
    /// emits. Matching is case-insensitive and covers the aliases observed
    /// in the wild; unknown strings yield `None` so the previous status is
    /// retained instead of being erased.
    pub fn from_raw(raw: &str) -> Option<JobStatus> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "queued" | "pending" | "accepted" | "created" => Some(JobStatus::Queued),
            "processing" | "running" | "in_progress" | "in-progress" | "scanning" => {
                Some(JobStatus::Processing)
            }
            "completed" | "complete" | "done" | "finished" | "success" => {
                Some(JobStatus::Completed)
            }
            "failed" | "failure" | "error" => Some(JobStatus::Failed),
            "timed_out" | "timedout" | "timeout" => Some(JobStatus::TimedOut),
            "stalled" | "stuck" => Some(JobStatus::Stalled),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::TimedOut => "timed_out",
            JobStatus::Stalled => "stalled",
        };
        write!(f, "{}", s)
    }
}

/// Provenance of a job record. Used only for merge precedence in the
/// registry, never shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordSource {
    Fetched,
    Handoff,
    LivePoll,
}

/// Observed state of one scan submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Opaque identity assigned by the scan engine on acceptance.
    pub job_id: String,
    /// URL under scan. Immutable after creation.
    pub target: String,
    pub status: JobStatus,
    /// 0-100. Never decreases once observed by the reconciler.
    pub progress_percent: u8,
    /// Free-text classification of current work.
    pub stage: String,
    /// Once non-empty, never overwritten by an empty fallback.
    pub stage_description: String,
    /// Consecutive polls with no forward progress.
    pub stale_count: u32,
    /// Estimated remaining seconds. Never increases once set; cleared on
    /// terminal status.
    pub eta_seconds: Option<u64>,
    pub findings_count: Option<u32>,
    pub last_checked_at: DateTime<Utc>,
    pub source: RecordSource,
}

impl JobRecord {
    /// Create a record for a submission the scan engine just accepted.
    pub fn accepted(
        job_id: impl Into<String>,
        target: impl Into<String>,
        status: JobStatus,
        eta_seconds: Option<u64>,
    ) -> Result<Self, JobError> {
        let job_id = job_id.into();
        if job_id.is_empty() {
            return Err(JobError::EmptyJobId);
        }
        Ok(Self {
            job_id,
            target: target.into(),
            status,
            progress_percent: 0,
            stage: String::new(),
            stage_description: String::new(),
            stale_count: 0,
            eta_seconds,
            findings_count: None,
            last_checked_at: Utc::now(),
            source: RecordSource::LivePoll,
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Candidate update for one record, produced by normalizing a raw status
/// response at the poller boundary. Missing raw fields have already been
/// filled from the previous record, never from zero/empty defaults.
#[derive(Debug, Clone)]
pub struct JobDelta {
    pub status: JobStatus,
    pub progress_percent: u8,
    pub stage: String,
    pub stage_description: String,
    pub eta_seconds: Option<u64>,
    pub findings_count: Option<u32>,
    pub observed_at: DateTime<Utc>,
}

impl JobDelta {
    /// A delta that changes nothing, as a base for synthetic updates
    /// (not-found escalation, local watch timeout).
    pub fn carry_forward(record: &JobRecord) -> Self {
        Self {
            status: record.status,
            progress_percent: record.progress_percent,
            stage: record.stage.clone(),
            stage_description: record.stage_description.clone(),
            eta_seconds: record.eta_seconds,
            findings_count: record.findings_count,
            observed_at: Utc::now(),
        }
    }

    /// Delta view of a full record fetched from the list endpoint.
    pub fn from_record(record: &JobRecord) -> Self {
        Self {
            observed_at: record.last_checked_at,
            ..Self::carry_forward(record)
        }
    }

    /// Clamp a raw percentage into the 0-100 range the record holds.
    pub fn clamp_progress(raw: u64) -> u8 {
        raw.min(100) as u8
    }
}

/// Serialized subset of a job record that survives a full navigation
/// between a watching view and a background view. Persisted under a
/// well-known key and consumed at most once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffSnapshot {
    pub job_id: String,
    pub target: String,
    pub status: JobStatus,
    pub progress_percent: u8,
    pub stage: String,
    pub stage_description: String,
    pub eta_seconds: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl HandoffSnapshot {
    pub fn from_record(record: &JobRecord, created_at: DateTime<Utc>) -> Self {
        Self {
            job_id: record.job_id.clone(),
            target: record.target.clone(),
            status: record.status,
            progress_percent: record.progress_percent,
            stage: record.stage.clone(),
            stage_description: record.stage_description.clone(),
            eta_seconds: record.eta_seconds,
            created_at,
        }
    }

    /// Rebuild a registry record from the snapshot, tagged as `Handoff`.
    pub fn into_record(self) -> JobRecord {
        JobRecord {
            job_id: self.job_id,
            target: self.target,
            status: self.status,
            progress_percent: self.progress_percent,
            stage: self.stage,
            stage_description: self.stage_description,
            stale_count: 0,
            eta_seconds: self.eta_seconds,
            findings_count: None,
            last_checked_at: self.created_at,
            source: RecordSource::Handoff,
        }
    }
}
