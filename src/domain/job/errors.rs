//! Job domain errors

use thiserror::Error;

use super::entities::JobStatus;

/// Job-specific domain errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobError {
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Job id must not be empty")]
    EmptyJobId,
}
