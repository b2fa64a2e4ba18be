//! Test support: a scripted [`GenerationBackend`].

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use spriteforge_comfyui::{workflow, BackendError, GenerationBackend};
use spriteforge_core::{BackendSignal, ExecutionPhase};

use crate::config::ServerConfig;

/// Config pointing every directory under `root`, with short timeouts
/// suitable for tests.
pub fn test_config(root: &Path) -> ServerConfig {
    ServerConfig {
        command_addr: "127.0.0.1:0".into(),
        event_addr: "127.0.0.1:0".into(),
        comfyui_url: "http://localhost:8188".into(),
        workflow_dir: root.join("workflows"),
        output_dir: root.join("outputs"),
        model_dir: root.join("models"),
        request_timeout_secs: 5,
        poll_interval_ms: 1,
        max_concurrent_jobs: 1,
        max_concurrent_batches: 1,
        job_retention_secs: 3600,
    }
}

/// Write a minimal default workflow template into `workflow_dir`.
pub fn write_default_template(workflow_dir: &Path) {
    std::fs::create_dir_all(workflow_dir).expect("create workflow dir");
    std::fs::write(
        workflow_dir.join(format!("{}.json", workflow::DEFAULT_TEMPLATE)),
        serde_json::json!({
            "2": {
                "class_type": "CLIPTextEncode",
                "_meta": {"title": "Positive Prompt"},
                "inputs": {"text": ""},
            },
            "5": {"class_type": "KSampler", "inputs": {"steps": 1, "cfg": 1.0, "seed": 0}},
        })
        .to_string(),
    )
    .expect("write template");
}

/// Backend that replays a scripted sequence of poll signals.
///
/// Once the script is exhausted, every further poll reports Running, so
/// timeout and cancellation paths have something to chew on.
pub struct MockBackend {
    signals: Mutex<VecDeque<BackendSignal>>,
    submissions: AtomicUsize,
    interrupted: AtomicBool,
}

impl MockBackend {
    pub fn with_signals(signals: Vec<BackendSignal>) -> Self {
        Self {
            signals: Mutex::new(signals.into()),
            submissions: AtomicUsize::new(0),
            interrupted: AtomicBool::new(false),
        }
    }

    /// How many workflows were submitted.
    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Whether `interrupt` was called.
    pub fn interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationBackend for MockBackend {
    async fn health_check(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn submit(&self, _workflow: &serde_json::Value) -> Result<String, BackendError> {
        let n = self.submissions.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("mock-exec-{n}"))
    }

    async fn poll(&self, _execution_id: &str) -> Result<BackendSignal, BackendError> {
        Ok(self
            .signals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| BackendSignal::phase(ExecutionPhase::Running)))
    }

    async fn fetch_artifacts(&self, execution_id: &str) -> Result<Vec<String>, BackendError> {
        Ok(vec![format!("mock://{execution_id}/out.png")])
    }

    async fn download_artifact(&self, _url: &str, dest: &Path) -> Result<(), BackendError> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(dest, b"png")?;
        Ok(())
    }

    async fn interrupt(&self) -> Result<(), BackendError> {
        self.interrupted.store(true, Ordering::SeqCst);
        Ok(())
    }
}
