//! Server configuration loaded from environment variables.

use std::path::PathBuf;

use spriteforge_protocol::{DEFAULT_COMMAND_ADDR, DEFAULT_EVENT_ADDR};

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Command (request-reply) bind address.
    pub command_addr: String,
    /// Event (publish-subscribe) bind address.
    pub event_addr: String,
    /// Base URL of the ComfyUI instance.
    pub comfyui_url: String,
    /// Directory holding workflow template JSON files.
    pub workflow_dir: PathBuf,
    /// Directory generated images are written to.
    pub output_dir: PathBuf,
    /// ComfyUI model directory (`checkpoints/`, `loras/`, `vae/` live
    /// underneath).
    pub model_dir: PathBuf,
    /// Hard per-job backend timeout in seconds.
    pub request_timeout_secs: u64,
    /// Backend poll interval in milliseconds. Bounds cancellation
    /// latency.
    pub poll_interval_ms: u64,
    /// Single-job worker slots.
    pub max_concurrent_jobs: usize,
    /// Batch worker slots.
    pub max_concurrent_batches: usize,
    /// How long terminal jobs are kept before pruning, in seconds.
    pub job_retention_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default                 |
    /// |--------------------------|-------------------------|
    /// | `COMMAND_ADDR`           | `127.0.0.1:5555`        |
    /// | `EVENT_ADDR`             | `127.0.0.1:5556`        |
    /// | `COMFYUI_URL`            | `http://localhost:8188` |
    /// | `WORKFLOW_DIR`           | `workflows`             |
    /// | `OUTPUT_DIR`             | `outputs`               |
    /// | `MODEL_DIR`              | `~/ComfyUI/models`      |
    /// | `REQUEST_TIMEOUT_SECS`   | `300`                   |
    /// | `POLL_INTERVAL_MS`       | `100`                   |
    /// | `MAX_CONCURRENT_JOBS`    | `1`                     |
    /// | `MAX_CONCURRENT_BATCHES` | `1`                     |
    /// | `JOB_RETENTION_SECS`     | `3600`                  |
    pub fn from_env() -> Self {
        let command_addr =
            std::env::var("COMMAND_ADDR").unwrap_or_else(|_| DEFAULT_COMMAND_ADDR.into());
        let event_addr =
            std::env::var("EVENT_ADDR").unwrap_or_else(|_| DEFAULT_EVENT_ADDR.into());
        let comfyui_url =
            std::env::var("COMFYUI_URL").unwrap_or_else(|_| "http://localhost:8188".into());

        let workflow_dir: PathBuf = std::env::var("WORKFLOW_DIR")
            .unwrap_or_else(|_| "workflows".into())
            .into();
        let output_dir: PathBuf = std::env::var("OUTPUT_DIR")
            .unwrap_or_else(|_| "outputs".into())
            .into();
        let model_dir: PathBuf = std::env::var("MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_model_dir());

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "300".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let poll_interval_ms: u64 = std::env::var("POLL_INTERVAL_MS")
            .unwrap_or_else(|_| "100".into())
            .parse()
            .expect("POLL_INTERVAL_MS must be a valid u64");

        let max_concurrent_jobs: usize = std::env::var("MAX_CONCURRENT_JOBS")
            .unwrap_or_else(|_| "1".into())
            .parse()
            .expect("MAX_CONCURRENT_JOBS must be a valid usize");

        let max_concurrent_batches: usize = std::env::var("MAX_CONCURRENT_BATCHES")
            .unwrap_or_else(|_| "1".into())
            .parse()
            .expect("MAX_CONCURRENT_BATCHES must be a valid usize");

        let job_retention_secs: u64 = std::env::var("JOB_RETENTION_SECS")
            .unwrap_or_else(|_| "3600".into())
            .parse()
            .expect("JOB_RETENTION_SECS must be a valid u64");

        Self {
            command_addr,
            event_addr,
            comfyui_url,
            workflow_dir,
            output_dir,
            model_dir,
            request_timeout_secs,
            poll_interval_ms,
            max_concurrent_jobs,
            max_concurrent_batches,
            job_retention_secs,
        }
    }
}

fn default_model_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("ComfyUI")
        .join("models")
}
