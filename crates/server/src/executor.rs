//! Single-job execution against the generation backend.
//!
//! [`run_prompt`] is the shared submit-poll-report primitive used by
//! both the job executor and the batch scheduler; [`JobExecutor`] wraps
//! it with progress tracking, event publication, and artifact download
//! for one queued job at a time.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use spriteforge_comfyui::{workflow, BackendError, GenerationBackend, WorkflowTemplates};
use spriteforge_core::{BackendSignal, ExecutionPhase, Job, ProgressTracker};
use spriteforge_protocol::Update;
use tracing::{debug, info, warn};

use crate::state::ServerState;

/// What the poll-loop caller wants after seeing a tick's signal.
pub enum TickAction {
    Continue,
    Cancel,
}

/// A prompt run that reached the backend's succeeded state.
pub struct PromptRun {
    pub execution_id: String,
    /// Artifact URLs, never empty.
    pub artifacts: Vec<String>,
    pub duration_s: f64,
}

/// Terminal state of one submitted prompt.
pub enum PromptEnd {
    Succeeded(PromptRun),
    Failed { error: String, duration_s: f64 },
    Cancelled { duration_s: f64 },
    TimedOut { duration_s: f64 },
}

/// Submit one workflow and poll it to a terminal state.
///
/// `on_tick` sees every polled signal and may request cancellation;
/// the request triggers a best-effort backend interrupt. A signal that
/// reports success is terminal regardless of any pending cancel — work
/// the backend already finished is never discarded. Exceeding `timeout`
/// interrupts the backend and ends the run.
pub async fn run_prompt<F>(
    backend: &dyn GenerationBackend,
    workflow: &serde_json::Value,
    timeout: Duration,
    poll_interval: Duration,
    mut on_tick: F,
) -> Result<PromptEnd, BackendError>
where
    F: FnMut(&str, &BackendSignal) -> TickAction,
{
    let execution_id = backend.submit(workflow).await?;
    debug!(execution_id, "workflow submitted");
    let started = Instant::now();

    loop {
        if started.elapsed() > timeout {
            backend.interrupt().await?;
            return Ok(PromptEnd::TimedOut {
                duration_s: started.elapsed().as_secs_f64(),
            });
        }

        let signal = backend.poll(&execution_id).await?;
        match signal.phase {
            ExecutionPhase::Succeeded => {
                let _ = on_tick(&execution_id, &signal);
                let artifacts = backend.fetch_artifacts(&execution_id).await?;
                return Ok(PromptEnd::Succeeded(PromptRun {
                    execution_id,
                    artifacts,
                    duration_s: started.elapsed().as_secs_f64(),
                }));
            }
            ExecutionPhase::Failed => {
                return Ok(PromptEnd::Failed {
                    error: signal
                        .error
                        .unwrap_or_else(|| "execution failed without detail".into()),
                    duration_s: started.elapsed().as_secs_f64(),
                });
            }
            ExecutionPhase::Pending | ExecutionPhase::Running => {
                if let TickAction::Cancel = on_tick(&execution_id, &signal) {
                    backend.interrupt().await?;
                    return Ok(PromptEnd::Cancelled {
                        duration_s: started.elapsed().as_secs_f64(),
                    });
                }
            }
        }

        tokio::time::sleep(poll_interval).await;
    }
}

/// Terminal outcome of one job, as seen by the worker loop.
#[derive(Debug)]
pub enum ExecutionResult {
    Completed { output_path: String, duration_s: f64 },
    Failed { error: String, duration_s: f64 },
    Cancelled { duration_s: f64 },
}

/// Executes queued jobs one at a time, owning the process-wide progress
/// tracker so stage timing history accumulates across jobs.
pub struct JobExecutor {
    backend: Arc<dyn GenerationBackend>,
    templates: WorkflowTemplates,
    output_dir: PathBuf,
    timeout: Duration,
    poll_interval: Duration,
    tracker: ProgressTracker,
}

impl JobExecutor {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        templates: WorkflowTemplates,
        output_dir: PathBuf,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            backend,
            templates,
            output_dir,
            timeout,
            poll_interval,
            tracker: ProgressTracker::new(),
        }
    }

    /// Run one job to a terminal outcome.
    ///
    /// Publishes `JobStarted` first, a `Progress` update on every poll
    /// tick, and exactly one `JobFinished` last, whatever the outcome.
    pub async fn execute(&mut self, job: &Job, state: &ServerState) -> ExecutionResult {
        info!(job_id = %job.id, prompt = %job.prompt, "executing job");
        state.bus.publish(Update::JobStarted {
            job_id: job.id.clone(),
            timestamp: chrono::Utc::now().timestamp() as u64,
        });

        let result = self.run(job, state).await;
        self.tracker.complete(&job.id);

        let (success, duration_s) = match &result {
            ExecutionResult::Completed { duration_s, .. } => (true, *duration_s),
            ExecutionResult::Failed { duration_s, .. } => (false, *duration_s),
            ExecutionResult::Cancelled { duration_s } => (false, *duration_s),
        };
        state.bus.publish(Update::JobFinished {
            job_id: job.id.clone(),
            success,
            duration_s,
        });
        result
    }

    async fn run(&mut self, job: &Job, state: &ServerState) -> ExecutionResult {
        let template = match self.templates.load(workflow::DEFAULT_TEMPLATE) {
            Ok(template) => template,
            Err(err) => {
                return ExecutionResult::Failed {
                    error: err.to_string(),
                    duration_s: 0.0,
                }
            }
        };
        let seed = chrono::Utc::now().timestamp_micros() as u64;
        let injected = workflow::inject_parameters(&template, job, seed);

        let backend = Arc::clone(&self.backend);
        let tracker = &mut self.tracker;
        let bus = &state.bus;
        let job_id = job.id.clone();
        let total_steps = job.steps;
        let mut tracking = false;

        let end = run_prompt(
            backend.as_ref(),
            &injected,
            self.timeout,
            self.poll_interval,
            |execution_id, signal| {
                if !tracking {
                    tracker.start(&job_id, execution_id, total_steps);
                    tracking = true;
                }
                match tracker.update(&job_id, signal) {
                    Ok(snapshot) => bus.publish(Update::Progress {
                        job_id: job_id.clone(),
                        stage: snapshot.stage,
                        step: snapshot.step,
                        total_steps: snapshot.total_steps,
                        percent: snapshot.percent,
                        eta_s: snapshot.eta_s,
                    }),
                    Err(err) => warn!(job_id = %job_id, error = %err, "progress update failed"),
                }

                if state.cancel_requested(&job_id) {
                    TickAction::Cancel
                } else {
                    TickAction::Continue
                }
            },
        )
        .await;

        match end {
            Ok(PromptEnd::Succeeded(run)) => {
                // fetch_artifacts never returns an empty list.
                let Some(first) = run.artifacts.first() else {
                    return ExecutionResult::Failed {
                        error: "no artifacts produced".into(),
                        duration_s: run.duration_s,
                    };
                };
                let dest = self.output_dir.join(format!("{}.png", job.id));
                match self.backend.download_artifact(first, &dest).await {
                    Ok(()) => ExecutionResult::Completed {
                        output_path: dest.display().to_string(),
                        duration_s: run.duration_s,
                    },
                    Err(err) => ExecutionResult::Failed {
                        error: format!("artifact download failed: {err}"),
                        duration_s: run.duration_s,
                    },
                }
            }
            Ok(PromptEnd::Failed { error, duration_s }) => {
                ExecutionResult::Failed { error, duration_s }
            }
            Ok(PromptEnd::Cancelled { duration_s }) => ExecutionResult::Cancelled { duration_s },
            Ok(PromptEnd::TimedOut { duration_s }) => ExecutionResult::Failed {
                error: format!(
                    "execution exceeded timeout ({}s)",
                    self.timeout.as_secs()
                ),
                duration_s,
            },
            Err(err) => ExecutionResult::Failed {
                error: err.to_string(),
                duration_s: 0.0,
            },
        }
    }
}
