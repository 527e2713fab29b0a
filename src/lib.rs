//! Scanwatch - Job progress tracking and reconciliation engine
//!
//! This crate tracks the lifecycle of long-running, server-executed security
//! scan jobs from the client's point of view: submit a job, watch it in real
//! time, detach it to run unattended, and reconcile whatever state is
//! observed against the authoritative scan engine.
//!
//! # Modules
//!
//! - [`config`] - Strongly-typed configuration with file and environment variable support
//! - [`domain`] - Job records, statuses, and the status transition table
//! - [`application`] - The progress reconciler, the job registry, and use cases
//! - [`infrastructure`] - Scan engine client, credit gate, handoff store, retry helpers
//! - [`workers`] - Polling scheduler, list refresh, and session heartbeat loops
//! - [`logging`] - Structured logging with tracing

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod logging;
pub mod workers;

pub use application::errors::{ApiError, TrackError};
pub use application::reconciler::{reconcile, reconcile_fetched, STALE_POLL_THRESHOLD};
pub use application::registry::JobRegistry;
pub use application::use_cases::{adopt_from_handoff, detach_to_background, SubmitScanUseCase};
pub use config::Config;
pub use domain::job::entities::{HandoffSnapshot, JobDelta, JobRecord, JobStatus, RecordSource};
pub use infrastructure::credit::{CreditGate, Debit};
pub use infrastructure::handoff::HandoffStore;
pub use infrastructure::scan_engine::{ScanEngineApi, ScanEngineClient};
pub use logging::init_tracing;
pub use workers::{
    spawn_list_refresh, spawn_poll_scheduler, spawn_session_heartbeat, WatchSettings,
};
