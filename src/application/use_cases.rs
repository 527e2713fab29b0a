//! Tracking use cases: submission, detach, and handoff adoption

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::application::errors::TrackError;
use crate::application::registry::JobRegistry;
use crate::domain::job::entities::JobRecord;
use crate::infrastructure::credit::{CreditGate, Debit};
use crate::infrastructure::handoff::HandoffStore;
use crate::infrastructure::scan_engine::{ScanEngineApi, SubmitScanRequest};

/// Use case for submitting a new scan job.
///
/// Order matters: the credit gate is consulted strictly before the
/// submission request is sent, and a successful debit is never refunded,
/// even when the scan engine subsequently rejects the submission.
pub struct SubmitScanUseCase {
    engine: Arc<dyn ScanEngineApi>,
    gate: Arc<CreditGate>,
    registry: Arc<RwLock<JobRegistry>>,
    requester_id: String,
}

impl SubmitScanUseCase {
    pub fn new(
        engine: Arc<dyn ScanEngineApi>,
        gate: Arc<CreditGate>,
        registry: Arc<RwLock<JobRegistry>>,
        requester_id: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            gate,
            registry,
            requester_id: requester_id.into(),
        }
    }

    #[instrument(skip(self), fields(scan_target = %target))]
    pub async fn execute(&self, target: &str) -> Result<JobRecord, TrackError> {
        // Credit gate first. A transient persistence failure after the
        // balance was confirmed sufficient does not block submission; the
        // backend is the accounting authority.
        match self.gate.try_debit().await {
            Ok(Debit::Accepted) => {}
            Ok(Debit::InsufficientBalance) => {
                info!("Submission blocked: insufficient scan credits");
                return Err(TrackError::InsufficientCredits);
            }
            Err(e) => {
                warn!("Credit debit failed, proceeding with submission anyway: {:#}", e);
            }
        }

        let request = SubmitScanRequest {
            target: target.to_string(),
            requester_id: self.requester_id.clone(),
            metadata: serde_json::json!({
                "client_submission_id": Uuid::new_v4().to_string(),
            }),
        };

        // No refund on rejection: the debit already happened and stands.
        let accepted = self.engine.submit_scan(&request).await?;

        let record = JobRecord::accepted(
            accepted.job_id.clone(),
            target,
            accepted.initial_status(),
            accepted.eta_seconds,
        )
        .map_err(|e| TrackError::InvalidResponse(e.to_string()))?;

        if let Err(e) = self.gate.record_entry(&accepted.job_id).await {
            warn!(job_id = %accepted.job_id, "Failed to persist credit ledger entry: {:#}", e);
        }

        self.registry.write().await.insert_accepted(record.clone());
        info!(job_id = %record.job_id, "Scan job submitted and registered");
        Ok(record)
    }
}

/// Detach a watched job to the background: persist a handoff snapshot so
/// the next view can adopt it. Purely a registry/store operation, no
/// network call, and the job keeps running server-side.
pub async fn detach_to_background(
    registry: &RwLock<JobRegistry>,
    store: &HandoffStore,
    job_id: &str,
) -> Result<bool, TrackError> {
    let snapshot = registry.read().await.snapshot_for_handoff(job_id);
    match snapshot {
        Some(snapshot) => {
            store
                .put(&snapshot)
                .map_err(|e| TrackError::Persistence(e.to_string()))?;
            info!(job_id, "Detached job to background");
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Adopt a pending handoff snapshot into the registry, if one exists.
/// The snapshot is consumed from the store regardless of whether the
/// registry accepted it (single-consumption semantics).
pub async fn adopt_from_handoff(
    registry: &RwLock<JobRegistry>,
    store: &HandoffStore,
) -> Result<Option<JobRecord>, TrackError> {
    let snapshot = store
        .take()
        .map_err(|e| TrackError::Persistence(e.to_string()))?;

    let Some(snapshot) = snapshot else {
        return Ok(None);
    };

    let job_id = snapshot.job_id.clone();
    let mut registry = registry.write().await;
    if registry.adopt_handoff(snapshot) {
        Ok(registry.get(&job_id).cloned())
    } else {
        Ok(None)
    }
}
