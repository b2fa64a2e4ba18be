//! Background worker loop: drains the job queue and drives the
//! executor.
//!
//! One loop per concurrency slot; the command handlers never block on
//! job execution. All of a job's queue-state mutation after dequeue
//! happens here, so its events are published in order.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::executor::{ExecutionResult, JobExecutor};
use crate::state::ServerState;

/// Drain the queue until shutdown.
pub async fn run_worker(
    state: Arc<ServerState>,
    mut executor: JobExecutor,
    shutdown: CancellationToken,
) {
    let idle = Duration::from_millis(state.config.poll_interval_ms.max(10));
    let retention = chrono::Duration::seconds(state.config.job_retention_secs as i64);

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let next = {
            let mut queue = state.queue.lock().await;
            let pruned = queue.prune(retention);
            if pruned > 0 {
                debug!(pruned, "pruned expired jobs");
            }
            queue.next()
        };

        let Some(job) = next else {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(idle) => continue,
            }
        };

        let result = executor.execute(&job, &state).await;

        let mut queue = state.queue.lock().await;
        match result {
            ExecutionResult::Completed {
                output_path,
                duration_s,
            } => {
                info!(job_id = %job.id, %output_path, duration_s, "job completed");
                queue.complete(&job.id, &output_path);
            }
            ExecutionResult::Failed { error, duration_s } => {
                warn!(job_id = %job.id, %error, duration_s, "job failed");
                queue.fail(&job.id, &error);
            }
            ExecutionResult::Cancelled { duration_s } => {
                info!(job_id = %job.id, duration_s, "job cancelled");
                queue.cancel(&job.id);
            }
        }
        drop(queue);
        state.clear_cancel(&job.id);
    }

    info!("worker loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_config, write_default_template, MockBackend};
    use spriteforge_comfyui::WorkflowTemplates;
    use spriteforge_core::{BackendSignal, ExecutionPhase, JobSpec, JobStatus};
    use spriteforge_protocol::Update;

    fn spec(id: &str) -> JobSpec {
        JobSpec {
            id: Some(id.into()),
            prompt: "pixel art slime".into(),
            model: "sdxl.safetensors".into(),
            size: (512, 512),
            steps: 4,
            cfg_scale: 7.0,
            lora: None,
        }
    }

    fn setup(
        signals: Vec<BackendSignal>,
        dir: &std::path::Path,
    ) -> (Arc<ServerState>, JobExecutor) {
        write_default_template(&dir.join("workflows"));
        let state = Arc::new(ServerState::new(test_config(dir)));
        let executor = JobExecutor::new(
            Arc::new(MockBackend::with_signals(signals)),
            WorkflowTemplates::new(dir.join("workflows")),
            dir.join("outputs"),
            Duration::from_secs(5),
            Duration::from_millis(1),
        );
        (state, executor)
    }

    #[tokio::test]
    async fn worker_drains_a_queued_job_to_completed() {
        let dir = tempfile::tempdir().unwrap();
        let (state, executor) = setup(
            vec![
                BackendSignal::phase(ExecutionPhase::Running),
                BackendSignal::phase(ExecutionPhase::Succeeded),
            ],
            dir.path(),
        );
        let mut rx = state.bus.subscribe();
        state.queue.lock().await.add(spec("j1"));

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_worker(
            Arc::clone(&state),
            executor,
            shutdown.clone(),
        ));

        // Wait for the terminal event, then stop the loop.
        loop {
            match rx.recv().await.unwrap() {
                Update::JobFinished { job_id, success, .. } => {
                    assert_eq!(job_id, "j1");
                    assert!(success);
                    break;
                }
                _ => continue,
            }
        }
        shutdown.cancel();
        handle.await.unwrap();

        let queue = state.queue.lock().await;
        let job = queue.get("j1").unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.output_path.as_deref().unwrap().ends_with("j1.png"));
    }

    #[tokio::test]
    async fn failed_execution_marks_the_job_failed() {
        let dir = tempfile::tempdir().unwrap();
        let mut failed = BackendSignal::phase(ExecutionPhase::Failed);
        failed.error = Some("boom".into());
        let (state, executor) = setup(vec![failed], dir.path());
        let mut rx = state.bus.subscribe();
        state.queue.lock().await.add(spec("j1"));

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_worker(
            Arc::clone(&state),
            executor,
            shutdown.clone(),
        ));

        loop {
            if let Update::JobFinished { success, .. } = rx.recv().await.unwrap() {
                assert!(!success);
                break;
            }
        }
        shutdown.cancel();
        handle.await.unwrap();

        let queue = state.queue.lock().await;
        let job = queue.get("j1").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("boom"));
    }
}
