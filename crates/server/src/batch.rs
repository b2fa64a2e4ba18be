//! Priority batch scheduler.
//!
//! Coarser sibling of the single-job worker: batches of prompts are
//! scheduled by priority class, prompts within a batch run sequentially
//! through the same [`run_prompt`] primitive the job executor uses, and
//! per-prompt failures never abort the rest of the batch. Every batch
//! keeps a status record the whole way through, so callers can observe
//! fractional progress while a prompt is still sampling.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};

use spriteforge_comfyui::{workflow, GenerationBackend, WorkflowTemplates};
use spriteforge_core::{BatchJob, BatchQueue, BatchStatus, Job, JobSpec, ThroughputWindow};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::executor::{run_prompt, PromptEnd, TickAction};

/// Point-in-time scheduler statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchStats {
    pub queued_batches: usize,
    pub total_processed: u64,
    pub total_failed: u64,
    pub avg_generation_time_s: f64,
    pub throughput_per_minute: f64,
    pub uptime_s: u64,
}

/// Schedules and executes multi-prompt batches against the backend.
pub struct BatchScheduler {
    backend: Arc<dyn GenerationBackend>,
    templates: WorkflowTemplates,
    output_dir: PathBuf,
    timeout: Duration,
    poll_interval: Duration,
    queue: Mutex<BatchQueue>,
    /// Status record per submitted batch, updated on every poll tick of
    /// the in-flight prompt and kept after the batch finishes.
    records: StdMutex<HashMap<String, BatchJob>>,
    /// Batches flagged for cancellation while running; checked between
    /// prompts, so the in-flight prompt always finishes.
    cancels: StdMutex<HashSet<String>>,
    window: StdMutex<ThroughputWindow>,
    total_processed: AtomicU64,
    total_failed: AtomicU64,
    started_at: Instant,
}

impl BatchScheduler {
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
            queue: Mutex::new(BatchQueue::new()),
            records: StdMutex::new(HashMap::new()),
            cancels: StdMutex::new(HashSet::new()),
            window: StdMutex::new(ThroughputWindow::new()),
            total_processed: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Enqueue a batch for execution.
    pub async fn submit(&self, batch: BatchJob) {
        info!(batch_id = %batch.id, prompts = batch.prompts.len(), priority = ?batch.priority, "batch submitted");
        self.store_record(&batch);
        self.queue.lock().await.push(batch);
    }

    /// Current status snapshot of a submitted batch, including
    /// fractional `completed_prompts` while it runs. `None` for ids
    /// that were never submitted.
    pub fn batch_status(&self, batch_id: &str) -> Option<BatchJob> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(batch_id)
            .cloned()
    }

    /// Cancel a batch. A queued batch is removed outright; a running one
    /// is flagged and stops after its in-flight prompt. Returns `false`
    /// when the id is neither queued nor running.
    pub async fn cancel(&self, batch_id: &str) -> bool {
        if self.queue.lock().await.cancel(batch_id) {
            let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(record) = records.get_mut(batch_id) {
                record.status = BatchStatus::Cancelled;
                record.completed_at = Some(chrono::Utc::now());
            }
            info!(batch_id, "queued batch cancelled");
            return true;
        }

        let running = self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(batch_id)
            .map(|record| record.status == BatchStatus::Running)
            .unwrap_or(false);
        if !running {
            return false;
        }
        self.cancels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(batch_id.to_string());
        info!(batch_id, "cancellation requested for running batch");
        true
    }

    /// Statistics snapshot.
    pub async fn stats(&self) -> BatchStats {
        let queued_batches = self.queue.lock().await.len();
        let window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        BatchStats {
            queued_batches,
            total_processed: self.total_processed.load(Ordering::SeqCst),
            total_failed: self.total_failed.load(Ordering::SeqCst),
            avg_generation_time_s: window.average_secs(),
            throughput_per_minute: window.per_minute(),
            uptime_s: self.started_at.elapsed().as_secs(),
        }
    }

    /// Worker loop: pop batches in priority order until shutdown.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let idle = Duration::from_millis(self.poll_interval.as_millis().max(10) as u64);
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            let next = self.queue.lock().await.pop();
            let Some(batch) = next else {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(idle) => continue,
                }
            };
            self.process_batch(batch).await;
        }
        info!("batch scheduler stopped");
    }

    fn cancel_requested(&self, batch_id: &str) -> bool {
        self.cancels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(batch_id)
    }

    fn store_record(&self, batch: &BatchJob) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(batch.id.clone(), batch.clone());
    }

    /// Fold a poll tick's step counter into the batch record:
    /// `completed_prompts` becomes prompt index plus the in-flight
    /// prompt's step fraction, and never moves backwards.
    fn record_prompt_progress(&self, batch_id: &str, index: usize, step: u32) {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(record) = records.get_mut(batch_id) else {
            return;
        };
        let fraction = if record.steps > 0 {
            (f64::from(step) / f64::from(record.steps)).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let progressed = index as f64 + fraction;
        if progressed > record.completed_prompts {
            record.completed_prompts = progressed;
        }
    }

    /// Run one batch's prompts sequentially. Per-prompt failures are
    /// logged and counted; the remaining prompts still run.
    async fn process_batch(&self, mut batch: BatchJob) {
        info!(batch_id = %batch.id, prompts = batch.prompts.len(), "processing batch");
        batch.status = BatchStatus::Running;
        batch.started_at.get_or_insert_with(chrono::Utc::now);
        self.store_record(&batch);

        let template = match self.templates.load(workflow::DEFAULT_TEMPLATE) {
            Ok(template) => template,
            Err(err) => {
                warn!(batch_id = %batch.id, error = %err, "batch template load failed");
                self.total_failed
                    .fetch_add(batch.prompts.len() as u64, Ordering::SeqCst);
                batch.status = BatchStatus::Completed;
                batch.completed_at = Some(chrono::Utc::now());
                self.store_record(&batch);
                return;
            }
        };

        for (index, prompt) in batch.prompts.clone().into_iter().enumerate() {
            if self.cancel_requested(&batch.id) {
                info!(batch_id = %batch.id, completed = batch.completed_prompts, "batch cancelled mid-run");
                batch.status = BatchStatus::Cancelled;
                break;
            }

            match self.run_one_prompt(&batch, index, &prompt, &template).await {
                Ok(output_path) => {
                    self.total_processed.fetch_add(1, Ordering::SeqCst);
                    batch.generated_outputs.push(output_path);
                }
                Err(error) => {
                    warn!(batch_id = %batch.id, index, %error, "prompt failed");
                    self.total_failed.fetch_add(1, Ordering::SeqCst);
                }
            }
            batch.completed_prompts = (index + 1) as f64;
            self.store_record(&batch);
        }

        if batch.status != BatchStatus::Cancelled {
            batch.status = BatchStatus::Completed;
        }
        batch.completed_at = Some(chrono::Utc::now());
        self.store_record(&batch);
        self.cancels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&batch.id);
        info!(
            batch_id = %batch.id,
            outputs = batch.generated_outputs.len(),
            status = ?batch.status,
            "batch finished"
        );
    }

    async fn run_one_prompt(
        &self,
        batch: &BatchJob,
        index: usize,
        prompt: &str,
        template: &serde_json::Value,
    ) -> Result<String, String> {
        let job = Job::from_spec(JobSpec {
            id: Some(format!("{}-{index}", batch.id)),
            prompt: prompt.to_string(),
            model: batch.model.clone(),
            size: batch.size,
            steps: batch.steps,
            cfg_scale: batch.cfg_scale,
            lora: None,
        });
        let seed = chrono::Utc::now().timestamp_micros() as u64;
        let injected = workflow::inject_parameters(template, &job, seed);

        let end = run_prompt(
            self.backend.as_ref(),
            &injected,
            self.timeout,
            self.poll_interval,
            |_, signal| {
                self.record_prompt_progress(&batch.id, index, signal.step);
                TickAction::Continue
            },
        )
        .await
        .map_err(|err| err.to_string())?;

        match end {
            PromptEnd::Succeeded(run) => {
                let first = run
                    .artifacts
                    .first()
                    .ok_or_else(|| "no artifacts produced".to_string())?;
                let dest = self.output_dir.join(format!("{}.png", job.id));
                self.backend
                    .download_artifact(first, &dest)
                    .await
                    .map_err(|err| err.to_string())?;
                self.window
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .record(run.duration_s);
                Ok(dest.display().to_string())
            }
            PromptEnd::Failed { error, .. } => Err(error),
            PromptEnd::Cancelled { .. } => Err("prompt cancelled".into()),
            PromptEnd::TimedOut { .. } => Err(format!(
                "prompt exceeded timeout ({}s)",
                self.timeout.as_secs()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{write_default_template, MockBackend};
    use spriteforge_core::{BackendSignal, BatchPriority, ExecutionPhase};

    fn scheduler(signals: Vec<BackendSignal>, dir: &std::path::Path) -> Arc<BatchScheduler> {
        write_default_template(&dir.join("workflows"));
        Arc::new(BatchScheduler::new(
            Arc::new(MockBackend::with_signals(signals)),
            WorkflowTemplates::new(dir.join("workflows")),
            dir.join("outputs"),
            Duration::from_secs(5),
            Duration::from_millis(1),
        ))
    }

    fn batch(id: &str, prompts: &[&str], priority: BatchPriority) -> BatchJob {
        BatchJob::new(
            id,
            prompts.iter().map(|p| p.to_string()).collect(),
            "sdxl.safetensors",
            (512, 512),
            4,
            7.0,
            priority,
        )
    }

    #[tokio::test]
    async fn batch_runs_every_prompt_and_records_throughput() {
        let dir = tempfile::tempdir().unwrap();
        // Each prompt succeeds immediately.
        let scheduler = scheduler(
            vec![BackendSignal::phase(ExecutionPhase::Succeeded); 3],
            dir.path(),
        );

        scheduler
            .process_batch(batch("b1", &["slime", "knight", "wizard"], BatchPriority::Normal))
            .await;

        let stats = scheduler.stats().await;
        assert_eq!(stats.total_processed, 3);
        assert_eq!(stats.total_failed, 0);
        assert!(stats.avg_generation_time_s >= 0.0);

        let record = scheduler.batch_status("b1").unwrap();
        assert_eq!(record.status, BatchStatus::Completed);
        assert!((record.completed_prompts - 3.0).abs() < f64::EPSILON);
        assert!(record.completed_at.is_some());
    }

    #[tokio::test]
    async fn one_failing_prompt_does_not_abort_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let mut failed = BackendSignal::phase(ExecutionPhase::Failed);
        failed.error = Some("boom".into());
        let scheduler = scheduler(
            vec![
                BackendSignal::phase(ExecutionPhase::Succeeded),
                failed,
                BackendSignal::phase(ExecutionPhase::Succeeded),
            ],
            dir.path(),
        );

        scheduler
            .process_batch(batch("b1", &["a", "b", "c"], BatchPriority::Normal))
            .await;

        let stats = scheduler.stats().await;
        assert_eq!(stats.total_processed, 2);
        assert_eq!(stats.total_failed, 1);
    }

    #[tokio::test]
    async fn in_flight_step_fraction_shows_in_batch_progress() {
        let dir = tempfile::tempdir().unwrap();
        // One mid-sampling tick (step 2 of 4), then the backend stays
        // running until the prompt times out.
        let mut mid = BackendSignal::phase(ExecutionPhase::Running);
        mid.step = 2;
        write_default_template(&dir.path().join("workflows"));
        let scheduler = Arc::new(BatchScheduler::new(
            Arc::new(MockBackend::with_signals(vec![mid])),
            WorkflowTemplates::new(dir.path().join("workflows")),
            dir.path().join("outputs"),
            Duration::from_millis(500),
            Duration::from_millis(1),
        ));

        let task = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            async move {
                scheduler
                    .process_batch(batch("b1", &["slime"], BatchPriority::Normal))
                    .await;
            }
        });

        let mut observed = 0.0;
        for _ in 0..500 {
            if let Some(record) = scheduler.batch_status("b1") {
                observed = record.completed_prompts;
                if observed > 0.0 {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!((observed - 0.5).abs() < f64::EPSILON, "observed {observed}");

        task.await.unwrap();
        let record = scheduler.batch_status("b1").unwrap();
        assert!((record.completed_prompts - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn cancel_removes_a_queued_batch() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler(vec![], dir.path());

        scheduler.submit(batch("b1", &["a"], BatchPriority::Normal)).await;
        assert!(scheduler.cancel("b1").await);
        assert_eq!(scheduler.stats().await.queued_batches, 0);
        assert_eq!(
            scheduler.batch_status("b1").unwrap().status,
            BatchStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn cancel_of_unknown_batch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler(vec![], dir.path());

        assert!(!scheduler.cancel("ghost").await);
        assert!(scheduler
            .cancels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty());
    }

    #[tokio::test]
    async fn cancel_flag_stops_remaining_prompts() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler(
            vec![BackendSignal::phase(ExecutionPhase::Succeeded); 3],
            dir.path(),
        );

        // The batch is already running when the cancel arrives; the flag
        // check runs before each prompt, so nothing at all executes.
        let mut b = batch("b1", &["a", "b", "c"], BatchPriority::Normal);
        b.status = BatchStatus::Running;
        scheduler.store_record(&b);
        assert!(scheduler.cancel("b1").await);

        scheduler.process_batch(b).await;

        assert_eq!(scheduler.stats().await.total_processed, 0);
        assert_eq!(
            scheduler.batch_status("b1").unwrap().status,
            BatchStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn run_loop_pops_in_priority_order() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler(
            vec![BackendSignal::phase(ExecutionPhase::Succeeded); 2],
            dir.path(),
        );

        scheduler.submit(batch("low", &["a"], BatchPriority::Low)).await;
        scheduler.submit(batch("urgent", &["b"], BatchPriority::Urgent)).await;

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&scheduler).run(shutdown.clone()));

        // Both batches drain; outputs land under the batch ids.
        for _ in 0..200 {
            if scheduler.stats().await.total_processed == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(scheduler.stats().await.total_processed, 2);
        assert!(dir.path().join("outputs/urgent-0.png").exists());
        assert!(dir.path().join("outputs/low-0.png").exists());
    }
}
