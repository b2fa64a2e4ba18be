//! Production [`GenerationBackend`] over the ComfyUI HTTP API.
//!
//! ComfyUI has no single "status" endpoint, so [`ComfyUIBackend::poll`]
//! reconstructs one: a prompt id found in `queue_running` is Running, in
//! `queue_pending` is Pending, present in history with outputs is
//! Succeeded, present without outputs is Failed, and absent everywhere
//! means it has not been scheduled yet.

use std::path::Path;

use async_trait::async_trait;
use spriteforge_core::{BackendSignal, ExecutionPhase};
use tracing::warn;

use crate::api::ComfyUIApi;
use crate::backend::{BackendError, GenerationBackend};

/// ComfyUI-backed generation backend.
pub struct ComfyUIBackend {
    api: ComfyUIApi,
    /// Client id sent with every submission so ComfyUI can attribute
    /// executions to this process.
    client_id: String,
}

impl ComfyUIBackend {
    pub fn new(api_url: String) -> Self {
        Self {
            api: ComfyUIApi::new(api_url),
            client_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// Whether a `/queue` array (`queue_running` or `queue_pending`)
/// contains the prompt id. Entries are `[number, prompt_id, ...]`
/// tuples.
fn queue_contains(queue: &serde_json::Value, key: &str, prompt_id: &str) -> bool {
    queue
        .get(key)
        .and_then(|v| v.as_array())
        .map(|items| {
            items.iter().any(|item| {
                item.get(1).and_then(|id| id.as_str()) == Some(prompt_id)
            })
        })
        .unwrap_or(false)
}

/// Map a history entry to a terminal signal: outputs present means the
/// execution succeeded, otherwise it failed and the status messages are
/// the best error detail available.
fn signal_from_history(entry: &serde_json::Value) -> BackendSignal {
    let has_outputs = entry
        .get("outputs")
        .and_then(|o| o.as_object())
        .map(|o| !o.is_empty())
        .unwrap_or(false);

    if has_outputs {
        BackendSignal::phase(ExecutionPhase::Succeeded)
    } else {
        let mut signal = BackendSignal::phase(ExecutionPhase::Failed);
        signal.error = Some(
            entry
                .get("status")
                .and_then(|s| s.get("messages"))
                .map(|m| m.to_string())
                .unwrap_or_else(|| "execution failed without detail".to_string()),
        );
        signal
    }
}

/// Pull artifact URLs out of a history entry's output nodes.
fn artifact_urls(entry: &serde_json::Value, api_url: &str) -> Vec<String> {
    let Some(outputs) = entry.get("outputs").and_then(|o| o.as_object()) else {
        return Vec::new();
    };

    let mut urls = Vec::new();
    for node_output in outputs.values() {
        let Some(images) = node_output.get("images").and_then(|i| i.as_array()) else {
            continue;
        };
        for img in images {
            let Some(filename) = img.get("filename").and_then(|f| f.as_str()) else {
                continue;
            };
            let subfolder = img.get("subfolder").and_then(|s| s.as_str()).unwrap_or("");
            let img_type = img.get("type").and_then(|t| t.as_str()).unwrap_or("output");
            urls.push(format!(
                "{api_url}/view?filename={filename}&subfolder={subfolder}&type={img_type}"
            ));
        }
    }
    urls
}

#[async_trait]
impl GenerationBackend for ComfyUIBackend {
    async fn health_check(&self) -> Result<(), BackendError> {
        self.api.system_stats().await
    }

    async fn submit(&self, workflow: &serde_json::Value) -> Result<String, BackendError> {
        let response = self.api.submit_workflow(workflow, &self.client_id).await?;
        if response.prompt_id.is_empty() {
            return Err(BackendError::MissingExecutionId);
        }
        Ok(response.prompt_id)
    }

    async fn poll(&self, execution_id: &str) -> Result<BackendSignal, BackendError> {
        let queue = self.api.get_queue().await?;
        if queue_contains(&queue, "queue_running", execution_id) {
            return Ok(BackendSignal::phase(ExecutionPhase::Running));
        }
        if queue_contains(&queue, "queue_pending", execution_id) {
            return Ok(BackendSignal::phase(ExecutionPhase::Pending));
        }

        match self.api.get_history(execution_id).await? {
            Some(entry) => Ok(signal_from_history(&entry)),
            // Not queued and not in history: submission is still being
            // scheduled.
            None => Ok(BackendSignal::phase(ExecutionPhase::Pending)),
        }
    }

    async fn fetch_artifacts(&self, execution_id: &str) -> Result<Vec<String>, BackendError> {
        let entry = self
            .api
            .get_history(execution_id)
            .await?
            .ok_or_else(|| BackendError::NoArtifacts(execution_id.to_string()))?;

        let urls = artifact_urls(&entry, self.api.api_url());
        if urls.is_empty() {
            return Err(BackendError::NoArtifacts(execution_id.to_string()));
        }
        Ok(urls)
    }

    async fn download_artifact(&self, url: &str, dest: &Path) -> Result<(), BackendError> {
        let bytes = self.api.download(url).await?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, bytes).await?;
        Ok(())
    }

    async fn interrupt(&self) -> Result<(), BackendError> {
        if let Err(err) = self.api.interrupt().await {
            // Interruption is best-effort; the poll loop will still
            // observe whatever terminal state the execution reaches.
            warn!(error = %err, "failed to interrupt execution");
        }
        Ok(())
    }
}
