//! The generation backend seam.
//!
//! The server's executor and batch scheduler only ever see this trait, so
//! tests can drive them with a scripted backend and the production path
//! plugs in [`crate::ComfyUIBackend`].

use std::path::Path;

use async_trait::async_trait;
use spriteforge_core::BackendSignal;

/// Errors from the generation backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend returned a non-2xx status code.
    #[error("backend API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// A submission was accepted but no execution id came back.
    #[error("no execution id returned for submitted workflow")]
    MissingExecutionId,

    /// Writing a downloaded artifact to disk failed.
    #[error("failed to persist artifact: {0}")]
    Io(#[from] std::io::Error),

    /// The execution finished but produced no artifacts.
    #[error("execution {0} produced no artifacts")]
    NoArtifacts(String),
}

/// An external service that executes parameterized generation workflows.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Verify the backend is reachable. Checked once at startup;
    /// failure there is fatal for the server.
    async fn health_check(&self) -> Result<(), BackendError>;

    /// Submit a workflow for execution, returning the backend-assigned
    /// execution id.
    async fn submit(&self, workflow: &serde_json::Value) -> Result<String, BackendError>;

    /// One status round-trip for a submitted execution.
    async fn poll(&self, execution_id: &str) -> Result<BackendSignal, BackendError>;

    /// URLs of the artifacts a succeeded execution produced.
    async fn fetch_artifacts(&self, execution_id: &str) -> Result<Vec<String>, BackendError>;

    /// Download one artifact to a local path.
    async fn download_artifact(&self, url: &str, dest: &Path) -> Result<(), BackendError>;

    /// Best-effort interrupt of the currently running execution.
    async fn interrupt(&self) -> Result<(), BackendError>;
}
