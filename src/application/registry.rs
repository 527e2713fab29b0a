//! Job registry
//!
//! The merged, de-duplicated, view-facing collection of all known job
//! records. Records arrive from three provenances (live polls, full-list
//! fetches, handoff snapshots) and every write passes through the
//! reconciler or the merge precedence rule, so the registry is the single
//! place where conflicting observations are resolved.

use std::collections::HashMap;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::application::reconciler::{reconcile, reconcile_fetched};
use crate::domain::job::entities::{
    HandoffSnapshot, JobDelta, JobRecord, JobStatus, RecordSource,
};

/// Merged view of all known jobs, keyed by `job_id`.
///
/// Callers share it behind a single lock; no method blocks.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: HashMap<String, JobRecord>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a record the scan engine just accepted.
    pub fn insert_accepted(&mut self, record: JobRecord) {
        info!(job_id = %record.job_id, target = %record.target, "Registered accepted scan job");
        self.jobs.insert(record.job_id.clone(), record);
    }

    /// Apply a normalized poll delta through the reconciler. The updated
    /// record is tracked as `LivePoll` from then on.
    pub fn apply_poll(&mut self, job_id: &str, delta: &JobDelta) -> Option<JobRecord> {
        let existing = match self.jobs.get(job_id) {
            Some(r) => r,
            None => {
                warn!(job_id, "Poll result for a job the registry does not know, dropping");
                return None;
            }
        };

        let mut updated = reconcile(existing, delta);
        updated.source = RecordSource::LivePoll;
        self.jobs.insert(job_id.to_string(), updated.clone());
        Some(updated)
    }

    /// Apply a locally synthesized delta. Unlike a poll result this does
    /// not retag the record: the synthetic update is a local decision, not
    /// new live data.
    fn apply_synthetic(&mut self, job_id: &str, delta: &JobDelta) -> Option<JobRecord> {
        let existing = self.jobs.get(job_id)?;
        let updated = reconcile(existing, delta);
        self.jobs.insert(job_id.to_string(), updated.clone());
        Some(updated)
    }

    /// Escalate a not-found poll response: the backend never durably
    /// created the job, so this is a terminal failure distinct from other
    /// failures. Progress fields are untouched.
    pub fn mark_not_found(&mut self, job_id: &str) -> Option<JobRecord> {
        let existing = self.jobs.get(job_id)?;
        let mut delta = JobDelta::carry_forward(existing);
        delta.status = JobStatus::Failed;
        delta.stage = "not-found".to_string();
        delta.stage_description =
            "The scan engine has no record of this job; it was never started".to_string();
        warn!(job_id, "Job not found on the scan engine, marking as failed");
        self.apply_synthetic(job_id, &delta)
    }

    /// Surface a job as locally timed out once the bounded watch window
    /// expires, even if the backend has not confirmed that status yet.
    pub fn mark_timed_out(&mut self, job_id: &str) -> Option<JobRecord> {
        let existing = self.jobs.get(job_id)?;
        if existing.is_terminal() {
            return Some(existing.clone());
        }
        let mut delta = JobDelta::carry_forward(existing);
        delta.status = JobStatus::TimedOut;
        delta.stage_description =
            "The watch window expired before the scan engine reported a terminal status"
                .to_string();
        warn!(job_id, "Watch window expired, surfacing job as timed out");
        self.apply_synthetic(job_id, &delta)
    }

    /// Merge records from a full-list fetch.
    ///
    /// Precedence: a record already tracked as `LivePoll` is never
    /// overwritten by fetched data unless the fetched record is terminal
    /// and the live record is not. Fetched data is periodically-refreshed
    /// ground truth and must eventually win, but must not regress a more
    /// current live view. A list refresh is not a poll, so merging never
    /// touches the stale counter.
    pub fn merge_fetched(&mut self, fetched: Vec<JobRecord>) {
        for incoming in fetched {
            match self.jobs.get(&incoming.job_id) {
                None => {
                    let mut record = incoming;
                    record.source = RecordSource::Fetched;
                    debug!(job_id = %record.job_id, "Adopted job from list fetch");
                    self.jobs.insert(record.job_id.clone(), record);
                }
                Some(existing) => {
                    // Terminal records are immutable; nothing to merge and
                    // no reason to retag them.
                    if existing.is_terminal() {
                        continue;
                    }
                    if existing.source == RecordSource::LivePoll
                        && !incoming.status.is_terminal()
                    {
                        // The live view is fresher; skip this pass.
                        continue;
                    }
                    let delta = JobDelta::from_record(&incoming);
                    let mut updated = reconcile_fetched(existing, &delta);
                    updated.source = RecordSource::Fetched;
                    self.jobs.insert(incoming.job_id.clone(), updated);
                }
            }
        }
    }

    /// Adopt a handoff snapshot, but only when no record with that id is
    /// already tracked. Returns whether the snapshot was adopted. The
    /// caller consumed the snapshot from the store either way; this keeps
    /// a reload from duplicating history.
    pub fn adopt_handoff(&mut self, snapshot: HandoffSnapshot) -> bool {
        if self.jobs.contains_key(&snapshot.job_id) {
            debug!(job_id = %snapshot.job_id, "Handoff snapshot ignored, job already tracked");
            return false;
        }
        let record = snapshot.into_record();
        info!(job_id = %record.job_id, "Adopted job from handoff snapshot");
        self.jobs.insert(record.job_id.clone(), record);
        true
    }

    /// Snapshot a tracked job for handoff to another view.
    pub fn snapshot_for_handoff(&self, job_id: &str) -> Option<HandoffSnapshot> {
        self.jobs
            .get(job_id)
            .map(|record| HandoffSnapshot::from_record(record, Utc::now()))
    }

    /// Ids of all jobs still in a non-terminal state, in stable order.
    pub fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .jobs
            .values()
            .filter(|r| !r.is_terminal())
            .map(|r| r.job_id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn get(&self, job_id: &str) -> Option<&JobRecord> {
        self.jobs.get(job_id)
    }

    /// All records, most recently checked first. Terminal records stay
    /// listed for historical display.
    pub fn all(&self) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> = self.jobs.values().cloned().collect();
        records.sort_by(|a, b| b.last_checked_at.cmp(&a.last_checked_at));
        records
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accepted(job_id: &str, status: JobStatus, progress: u8) -> JobRecord {
        let mut r = JobRecord::accepted(job_id, "https://example.com", status, None).unwrap();
        r.progress_percent = progress;
        r
    }

    fn delta(progress: u8, status: JobStatus) -> JobDelta {
        JobDelta {
            status,
            progress_percent: progress,
            stage: String::new(),
            stage_description: String::new(),
            eta_seconds: None,
            findings_count: None,
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn test_apply_poll_updates_and_tags_live() {
        let mut registry = JobRegistry::new();
        registry.insert_accepted(accepted("J1", JobStatus::Queued, 0));

        let updated = registry
            .apply_poll("J1", &delta(25, JobStatus::Processing))
            .unwrap();
        assert_eq!(updated.progress_percent, 25);
        assert_eq!(updated.source, RecordSource::LivePoll);
        assert_eq!(registry.get("J1").unwrap().progress_percent, 25);
    }

    #[test]
    fn test_apply_poll_unknown_job_is_dropped() {
        let mut registry = JobRegistry::new();
        assert!(registry
            .apply_poll("ghost", &delta(10, JobStatus::Processing))
            .is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_mark_not_found_is_terminal_with_specific_message() {
        let mut registry = JobRegistry::new();
        registry.insert_accepted(accepted("J4", JobStatus::Queued, 0));

        let updated = registry.mark_not_found("J4").unwrap();
        assert_eq!(updated.status, JobStatus::Failed);
        assert!(updated.stage_description.contains("never started"));
        // Progress fields untouched
        assert_eq!(updated.progress_percent, 0);
        assert!(registry.active_ids().is_empty());
    }

    #[test]
    fn test_mark_timed_out_only_touches_non_terminal() {
        let mut registry = JobRegistry::new();
        registry.insert_accepted(accepted("J1", JobStatus::Processing, 80));
        registry.insert_accepted(accepted("J2", JobStatus::Completed, 100));

        let timed_out = registry.mark_timed_out("J1").unwrap();
        assert_eq!(timed_out.status, JobStatus::TimedOut);

        let untouched = registry.mark_timed_out("J2").unwrap();
        assert_eq!(untouched.status, JobStatus::Completed);
    }

    #[test]
    fn test_fetched_never_overwrites_fresher_live_view() {
        let mut registry = JobRegistry::new();
        registry.insert_accepted(accepted("J1", JobStatus::Processing, 60));

        let stale_fetch = accepted("J1", JobStatus::Processing, 20);
        registry.merge_fetched(vec![stale_fetch]);

        let record = registry.get("J1").unwrap();
        assert_eq!(record.progress_percent, 60);
        assert_eq!(record.source, RecordSource::LivePoll);
    }

    #[test]
    fn test_fetched_terminal_wins_over_live_non_terminal() {
        let mut registry = JobRegistry::new();
        registry.insert_accepted(accepted("J1", JobStatus::Processing, 60));

        let mut done = accepted("J1", JobStatus::Completed, 100);
        done.source = RecordSource::Fetched;
        registry.merge_fetched(vec![done]);

        let record = registry.get("J1").unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.progress_percent, 100);
        assert_eq!(record.source, RecordSource::Fetched);
    }

    #[test]
    fn test_fetched_cannot_regress_progress_even_when_it_applies() {
        let mut registry = JobRegistry::new();
        let mut existing = accepted("J1", JobStatus::Processing, 60);
        existing.source = RecordSource::Fetched;
        registry.merge_fetched(vec![existing]);

        let behind = accepted("J1", JobStatus::Processing, 30);
        registry.merge_fetched(vec![behind]);

        assert_eq!(registry.get("J1").unwrap().progress_percent, 60);
    }

    #[test]
    fn test_merge_fetched_adopts_unknown_jobs() {
        let mut registry = JobRegistry::new();
        registry.merge_fetched(vec![accepted("J9", JobStatus::Processing, 45)]);

        let record = registry.get("J9").unwrap();
        assert_eq!(record.source, RecordSource::Fetched);
        assert_eq!(record.progress_percent, 45);
    }

    #[test]
    fn test_repeated_unchanged_list_merges_never_stall_a_job() {
        use crate::application::reconciler::STALE_POLL_THRESHOLD;

        let mut registry = JobRegistry::new();

        // Known only from the list endpoint, never status-polled
        for _ in 0..=STALE_POLL_THRESHOLD {
            registry.merge_fetched(vec![accepted("J1", JobStatus::Processing, 45)]);
        }
        let record = registry.get("J1").unwrap();
        assert_eq!(record.status, JobStatus::Processing);
        assert_eq!(record.stale_count, 0);
        assert!(!record.is_terminal());

        // Fetched ground truth still wins in the end
        registry.merge_fetched(vec![accepted("J1", JobStatus::Completed, 100)]);
        let record = registry.get("J1").unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.progress_percent, 100);
    }

    #[test]
    fn test_merge_fetched_does_not_retag_terminal_live_record() {
        let mut registry = JobRegistry::new();
        registry.insert_accepted(accepted("J1", JobStatus::Completed, 100));

        registry.merge_fetched(vec![accepted("J1", JobStatus::Processing, 50)]);

        let record = registry.get("J1").unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.source, RecordSource::LivePoll);
    }

    #[test]
    fn test_synthetic_updates_keep_the_record_source() {
        let mut registry = JobRegistry::new();
        registry.merge_fetched(vec![accepted("J1", JobStatus::Processing, 30)]);
        registry.merge_fetched(vec![accepted("J2", JobStatus::Queued, 0)]);

        let timed_out = registry.mark_timed_out("J1").unwrap();
        assert_eq!(timed_out.status, JobStatus::TimedOut);
        assert_eq!(timed_out.source, RecordSource::Fetched);

        let not_found = registry.mark_not_found("J2").unwrap();
        assert_eq!(not_found.status, JobStatus::Failed);
        assert_eq!(not_found.source, RecordSource::Fetched);
    }

    #[test]
    fn test_handoff_adopted_only_when_absent() {
        let mut registry = JobRegistry::new();
        let record = accepted("J1", JobStatus::Processing, 50);
        let snapshot = HandoffSnapshot::from_record(&record, Utc::now());

        assert!(registry.adopt_handoff(snapshot.clone()));
        assert_eq!(registry.get("J1").unwrap().source, RecordSource::Handoff);

        // Same id again: ignored, no duplicate history
        assert!(!registry.adopt_handoff(snapshot));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_active_ids_excludes_terminal() {
        let mut registry = JobRegistry::new();
        registry.insert_accepted(accepted("b", JobStatus::Processing, 10));
        registry.insert_accepted(accepted("a", JobStatus::Queued, 0));
        registry.insert_accepted(accepted("c", JobStatus::Completed, 100));

        assert_eq!(registry.active_ids(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(registry.len(), 3);
    }
}
