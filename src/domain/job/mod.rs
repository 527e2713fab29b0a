//! Job domain: records, statuses, and the status transition table

pub mod entities;
pub mod errors;

pub use entities::{HandoffSnapshot, JobDelta, JobRecord, JobStatus, RecordSource};
pub use errors::JobError;
