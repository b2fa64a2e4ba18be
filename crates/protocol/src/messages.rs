//! Typed message catalogue for the two IPC channels.
//!
//! Three closed families, each an internally-tagged serde enum so every
//! encoded message is a self-describing map with a `type` discriminator:
//!
//! - [`Request`]  — caller → server, command channel.
//! - [`Response`] — server → caller, command channel.
//! - [`Update`]   — server → subscribers, event channel only.
//!
//! Large payloads (images) are never embedded; messages carry paths or
//! URLs only, keeping every variant to a few hundred bytes.

use serde::{Deserialize, Serialize};

use crate::stage::GenerationStage;

/// Command-channel request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Submit one generation job.
    Generate {
        id: String,
        prompt: String,
        model: String,
        /// (width, height) in pixels.
        size: (u32, u32),
        steps: u32,
        cfg_scale: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        lora: Option<String>,
    },

    /// Cancel a queued or running job. Cooperative — takes effect at the
    /// running job's next poll checkpoint.
    Cancel { job_id: String },

    /// List models known to the filesystem registry.
    ListModels,

    /// Report queue depth, active jobs, and uptime.
    Status,

    /// Health check.
    Ping,
}

/// Command-channel response. Exactly one per request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Job accepted and queued. Progress and outcome arrive on the
    /// event channel only.
    JobAccepted { job_id: String, estimated_time_s: f64 },

    /// Job completed successfully.
    JobComplete {
        job_id: String,
        image_path: String,
        duration_s: f64,
    },

    /// Job failed or the request could not be applied to the job.
    JobError { job_id: String, error: String },

    /// Job cancelled.
    JobCancelled { job_id: String },

    /// Registry scan result.
    ModelList { models: Vec<ModelInfo> },

    /// Server status snapshot.
    StatusInfo {
        version: String,
        queue_size: u32,
        active_jobs: u32,
        uptime_s: u64,
    },

    /// Reply to `Ping`.
    Pong,

    /// Generic protocol-level error (malformed or unknown request).
    Error { message: String },
}

/// Event-channel lifecycle broadcast. Best-effort delivery; subscribers
/// that connect after an event was published will not receive it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Update {
    /// The worker began executing a job.
    JobStarted { job_id: String, timestamp: u64 },

    /// Per-tick progress during execution.
    Progress {
        job_id: String,
        stage: GenerationStage,
        step: u32,
        total_steps: u32,
        percent: f64,
        eta_s: f64,
    },

    /// A preview image became available mid-generation.
    Preview {
        job_id: String,
        image_path: String,
        step: u32,
    },

    /// Terminal outcome. Published exactly once per started job, after
    /// all of that job's `Progress` updates.
    JobFinished {
        job_id: String,
        success: bool,
        duration_s: f64,
    },
}

/// Category of a registry model file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Checkpoint,
    Lora,
    Vae,
}

/// One entry from the filesystem model registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelInfo {
    pub name: String,
    pub path: String,
    pub model_type: ModelKind,
    pub size_mb: u64,
}
