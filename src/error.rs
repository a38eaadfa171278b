//! Error types for the compute engines and the background job layer.
//!
//! The numeric primitives in [`crate::stats`] never fail; they return `None`
//! or zero-filled sentinels instead. Errors only appear once a computation is
//! monitored (it can be interrupted) or once it crosses into a background
//! context (payloads can be malformed, jobs can be cancelled).

use crate::jobs::{JobId, JobKind};
use thiserror::Error;

/// Failure of a monitored engine run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ComputeError {
    /// The monitor asked the engine to stop between two algorithm steps.
    #[error("computation interrupted")]
    Interrupted,

    /// Options or input the engine refuses to run on.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Failure reasons surfaced by the job layer.
///
/// `UnknownKind`, `KindMismatch`, `ContextUnavailable` and `ShutDown` are
/// returned synchronously by `submit`. All other variants arrive through the
/// job's outcome.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum JobError {
    /// The requested job kind has no background context.
    #[error("unknown job kind: {0:?}")]
    UnknownKind(String),

    /// The payload variant belongs to a different kind than the one requested.
    #[error("{payload} payload submitted as a {kind} job")]
    KindMismatch { kind: JobKind, payload: JobKind },

    /// The background context for a kind could not be started.
    #[error("failed to start {kind} context: {reason}")]
    ContextUnavailable { kind: JobKind, reason: String },

    /// The runner was shut down before the job was submitted.
    #[error("job runner has been shut down")]
    ShutDown,

    /// The caller detached from the job before its outcome arrived.
    #[error("job cancelled")]
    Cancelled,

    /// The payload reached the background context but cannot be computed.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The computation itself failed, usually a caught panic; carries its message.
    #[error("{0}")]
    Failed(String),

    /// The background context went away without producing an outcome.
    #[error("background context dropped job {0} without an outcome")]
    Disconnected(JobId),
}

impl JobError {
    /// True for the caller-side cancellation outcome.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, JobError::Cancelled)
    }
}

impl From<ComputeError> for JobError {
    fn from(err: ComputeError) -> Self {
        match err {
            ComputeError::Interrupted => JobError::Cancelled,
            ComputeError::InvalidInput(msg) => JobError::InvalidPayload(msg),
        }
    }
}
