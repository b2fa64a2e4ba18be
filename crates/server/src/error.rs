//! Server error type.

use spriteforge_comfyui::{BackendError, WorkflowError};
use spriteforge_protocol::ProtocolError;

/// Errors surfaced by the server's socket loops and startup path.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    /// The generation backend could not be reached at startup. Fatal.
    #[error("generation backend unreachable at {url}: {source}")]
    BackendUnavailable {
        url: String,
        source: BackendError,
    },
}
