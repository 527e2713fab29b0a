//! Background workers for job tracking
//!
//! The polling scheduler fans out one status poll per active job on a
//! fixed cadence, the list refresh periodically reconciles the whole
//! registry against the backend's job list, and the session heartbeat
//! keeps the caller's authentication alive while a job is watched. All
//! three are independent tokio tasks shut down through a
//! `CancellationToken`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::errors::TrackError;
use crate::application::registry::JobRegistry;
use crate::infrastructure::resilience::{retry_with_backoff, RetryConfig};
use crate::infrastructure::scan_engine::ScanEngineApi;

/// Runtime settings for one watch session.
///
/// Config carries these as seconds; tests construct them directly with
/// compressed durations.
#[derive(Debug, Clone)]
pub struct WatchSettings {
    /// Delay between poll fan-outs (5s in the reference behavior).
    pub poll_cadence: Duration,
    /// Bound on the whole watch session (1h in the reference behavior);
    /// jobs still in flight afterwards are surfaced as timed out locally.
    pub watch_timeout: Duration,
    /// Per-poll retry policy for transient failures.
    pub retry: RetryConfig,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            poll_cadence: Duration::from_secs(5),
            watch_timeout: Duration::from_secs(3600),
            retry: RetryConfig::default(),
        }
    }
}

/// Spawn the polling scheduler for the currently active jobs.
///
/// Every cadence tick issues one concurrent poll per non-terminal job in
/// the registry; polls for different jobs are independent and may complete
/// out of order. Each result goes through the reconciler (via the
/// registry) before anything is visible to a view. Jobs reaching a
/// terminal status simply stop appearing in the active set.
pub fn spawn_poll_scheduler(
    engine: Arc<dyn ScanEngineApi>,
    registry: Arc<RwLock<JobRegistry>>,
    settings: WatchSettings,
    shutdown_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            cadence_ms = settings.poll_cadence.as_millis() as u64,
            "Polling scheduler started"
        );
        let deadline = tokio::time::Instant::now() + settings.watch_timeout;
        let mut interval = tokio::time::interval(settings.poll_cadence);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if tokio::time::Instant::now() >= deadline {
                        let ids = registry.read().await.active_ids();
                        if !ids.is_empty() {
                            warn!(jobs = ids.len(), "Watch window expired with jobs still in flight");
                            let mut registry = registry.write().await;
                            for id in &ids {
                                registry.mark_timed_out(id);
                            }
                        }
                        break;
                    }

                    let ids = registry.read().await.active_ids();
                    if ids.is_empty() {
                        continue;
                    }

                    poll_round(&engine, &registry, &settings.retry, ids).await;
                }
                _ = shutdown_token.cancelled() => {
                    info!("Polling scheduler shutting down");
                    break;
                }
            }
        }
    })
}

/// One fan-out of concurrent polls, fed through the reconciler.
async fn poll_round(
    engine: &Arc<dyn ScanEngineApi>,
    registry: &Arc<RwLock<JobRegistry>>,
    retry: &RetryConfig,
    ids: Vec<String>,
) {
    let polls = ids.into_iter().map(|id| {
        let engine = Arc::clone(engine);
        let retry = retry.clone();
        async move {
            let result = retry_with_backoff(&retry, || {
                let engine = Arc::clone(&engine);
                let id = id.clone();
                async move { engine.poll_status(&id).await }
            })
            .await;
            (id, result)
        }
    });

    let results = futures::future::join_all(polls).await;

    let mut registry = registry.write().await;
    for (id, result) in results {
        match result {
            Ok(raw) => {
                let delta = match registry.get(&id) {
                    Some(previous) => raw.into_delta(previous),
                    None => continue,
                };
                registry.apply_poll(&id, &delta);
            }
            Err(TrackError::NotFound { .. }) => {
                registry.mark_not_found(&id);
            }
            Err(e) => {
                // Invisible retry: the job is simply not updated this round
                debug!(job_id = %id, error = %e, "Transient poll failure, skipping this cycle");
            }
        }
    }
}

/// Spawn the periodic full-list refresh.
///
/// Fetched records merge into the registry under the source precedence
/// rule, so a fresher live view is never regressed but fetched terminal
/// states eventually win.
pub fn spawn_list_refresh(
    engine: Arc<dyn ScanEngineApi>,
    registry: Arc<RwLock<JobRegistry>>,
    requester_id: String,
    cadence: Duration,
    shutdown_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(cadence_secs = cadence.as_secs(), "List refresh worker started");
        let mut interval = tokio::time::interval(cadence);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match engine.list_jobs(&requester_id).await {
                        Ok(raw_jobs) => {
                            let records = raw_jobs
                                .into_iter()
                                .filter_map(|raw| raw.into_fetched_record())
                                .collect();
                            registry.write().await.merge_fetched(records);
                        }
                        Err(e) => {
                            warn!(error = %e, "List refresh failed, keeping current registry");
                        }
                    }
                }
                _ = shutdown_token.cancelled() => {
                    info!("List refresh worker shutting down");
                    break;
                }
            }
        }
    })
}

/// Spawn the session heartbeat.
///
/// Runs on its own longer cadence (5 minutes in the reference behavior)
/// purely to keep the caller's session alive while a job is watched; it is
/// deliberately decoupled from polling success or failure.
pub fn spawn_session_heartbeat(
    engine: Arc<dyn ScanEngineApi>,
    cadence: Duration,
    shutdown_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(cadence_secs = cadence.as_secs(), "Session heartbeat started");
        let mut interval = tokio::time::interval(cadence);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = engine.heartbeat().await {
                        warn!(error = %e, "Session heartbeat failed");
                    }
                }
                _ = shutdown_token.cancelled() => {
                    info!("Session heartbeat shutting down");
                    break;
                }
            }
        }
    })
}
