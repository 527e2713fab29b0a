//! Progress reconciler
//!
//! [`reconcile`] is the only place progress, ETA, or stage text are allowed
//! to mutate. Every poll result, list-fetch merge, and synthetic update
//! (not-found, local watch timeout) passes through here, which is what makes
//! the monotonicity invariants enforceable:
//!
//! - `progress_percent` never decreases for the lifetime of a record
//! - `eta_seconds` never increases prior to a terminal status
//! - a record that reached a terminal status is never mutated again

use tracing::{debug, warn};

use crate::domain::job::entities::{JobDelta, JobRecord, JobStatus};

/// Consecutive no-movement polls after which a non-terminal job is
/// escalated to `Failed` with the `stalled` stage marker. Client-side
/// safety net against backends that silently stop emitting updates.
pub const STALE_POLL_THRESHOLD: u32 = 10;

/// Stage marker set on records that were escalated for lack of movement.
pub const STALLED_STAGE: &str = "stalled";

/// Apply a poll delta to an existing record under the monotonicity and
/// staleness rules.
pub fn reconcile(existing: &JobRecord, delta: &JobDelta) -> JobRecord {
    apply(existing, delta, true)
}

/// Apply a delta from a full-list fetch. Same monotonicity rules as
/// [`reconcile`], but a list refresh is not a poll: the stale counter only
/// counts consecutive status polls, so it is left untouched here and the
/// local stall escalation never fires on this path.
pub fn reconcile_fetched(existing: &JobRecord, delta: &JobDelta) -> JobRecord {
    apply(existing, delta, false)
}

fn apply(existing: &JobRecord, delta: &JobDelta, is_poll: bool) -> JobRecord {
    // Terminal records are immutable.
    if existing.is_terminal() {
        return existing.clone();
    }

    let mut updated = existing.clone();
    updated.last_checked_at = delta.observed_at;

    // A terminal signal short-circuits all monotonicity bookkeeping.
    if delta.status.is_terminal() {
        updated.status = delta.status;
        updated.progress_percent = if delta.status == JobStatus::Completed {
            100
        } else {
            existing.progress_percent.max(delta.progress_percent)
        };
        updated.eta_seconds = None;
        apply_stage_text(&mut updated, delta);
        updated.findings_count = delta.findings_count.or(existing.findings_count);
        return updated;
    }

    // Step 1: progress only moves forward.
    let progress = existing.progress_percent.max(delta.progress_percent);
    if delta.progress_percent < existing.progress_percent {
        debug!(
            job_id = %existing.job_id,
            existing = existing.progress_percent,
            reported = delta.progress_percent,
            "Ignoring progress regression"
        );
    }

    // Step 2: staleness bookkeeping, polls only.
    if is_poll {
        if progress == existing.progress_percent {
            updated.stale_count = existing.stale_count + 1;
        } else {
            updated.stale_count = 0;
        }
    } else if progress > existing.progress_percent {
        // Forward movement seen through a fetch still clears the counter.
        updated.stale_count = 0;
    }
    updated.progress_percent = progress;

    // A backend-reported stall is diagnostic only and always resolves to
    // Failed, same as the local escalation below.
    if delta.status == JobStatus::Stalled {
        return stall(updated);
    }

    // Step 3: escalate after too many no-movement polls.
    if is_poll && updated.stale_count >= STALE_POLL_THRESHOLD {
        warn!(
            job_id = %existing.job_id,
            stale_count = updated.stale_count,
            "Job made no progress across consecutive polls, marking as stalled"
        );
        return stall(updated);
    }

    // Status moves only along the transition table; anything else keeps the
    // existing status rather than trusting a regressed report.
    match existing.status.transition_to(delta.status) {
        Ok(next) => updated.status = next,
        Err(e) => {
            debug!(job_id = %existing.job_id, error = %e, "Rejected status transition from poll");
        }
    }

    // Step 4: ETA only shrinks or holds once set.
    updated.eta_seconds = match (existing.eta_seconds, delta.eta_seconds) {
        (Some(current), Some(reported)) => Some(current.min(reported)),
        (Some(current), None) => Some(current),
        (None, reported) => reported,
    };

    // Step 5: stage text is never erased by an empty fallback.
    apply_stage_text(&mut updated, delta);
    updated.findings_count = delta.findings_count.or(existing.findings_count);

    updated
}

/// Force a record into the stalled-failure shape.
fn stall(mut record: JobRecord) -> JobRecord {
    record.status = JobStatus::Failed;
    record.stage = STALLED_STAGE.to_string();
    record.stage_description = format!(
        "Scan made no progress across {} consecutive status checks and was marked as stalled",
        record.stale_count.max(1)
    );
    record.eta_seconds = None;
    record
}

fn apply_stage_text(record: &mut JobRecord, delta: &JobDelta) {
    if !delta.stage.is_empty() {
        record.stage = delta.stage.clone();
    }
    if !delta.stage_description.is_empty() {
        record.stage_description = delta.stage_description.clone();
    }
}
