//! Error severities for the grading pipeline
//!
//! Three severities drive the batch orchestrator's control flow:
//! - `Local`: confined to one submission, the batch continues
//! - `Config`: the grading setup itself is wrong (not the student's
//!   fault); the batch continues but the error is logged distinctly
//! - `Fatal`: environment-corrupting (e.g. an unkillable subprocess);
//!   the remaining batch is aborted

use thiserror::Error;

/// A classified grading failure
#[derive(Debug, Error)]
pub enum GradeError {
    /// Failure confined to the current submission
    #[error("{0}")]
    Local(String),
    /// The grading setup is misconfigured
    #[error("configuration error: {0}")]
    Config(String),
    /// Shared state may be corrupted; the batch must halt
    #[error("fatal: {0}")]
    Fatal(String),
}

/// Severity of a failure, recovered at the orchestrator boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Local,
    Config,
    Fatal,
}

impl GradeError {
    pub fn severity(&self) -> Severity {
        match self {
            GradeError::Local(_) => Severity::Local,
            GradeError::Config(_) => Severity::Config,
            GradeError::Fatal(_) => Severity::Fatal,
        }
    }
}

/// Classify an error chain. Errors that are not a [`GradeError`]
/// (plain I/O failures, malformed archives, ...) are local: one broken
/// submission must never take the rest of the class with it.
pub fn severity_of(err: &anyhow::Error) -> Severity {
    err.downcast_ref::<GradeError>()
        .map(GradeError::severity)
        .unwrap_or(Severity::Local)
}
