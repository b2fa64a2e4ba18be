//! Core error type.

/// Errors produced by the domain layer.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A request parameter failed validation. The message names the
    /// offending field.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An operation referenced a job the tracker or queue does not know.
    /// Progress updates for an untracked job are a programmer error, not
    /// a condition to default away.
    #[error("Unknown job: {0}")]
    UnknownJob(String),

    /// A job status transition that the lifecycle state machine forbids.
    #[error("Invalid status transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: crate::job::JobStatus,
        to: crate::job::JobStatus,
    },
}
