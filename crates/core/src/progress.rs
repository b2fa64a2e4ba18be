//! Heuristic progress and ETA tracking for running jobs.
//!
//! The backend does not report a clean "stage" on every poll, so the
//! tracker reconstructs one from whatever the signal carries: an
//! explicit stage hint when present, otherwise substrings of the
//! reported node name, otherwise how long the current stage has been
//! running. Stage durations feed the shared [`TimingTable`] so ETA
//! estimates improve as jobs complete.

use std::collections::HashMap;
use std::time::Instant;

use spriteforge_protocol::GenerationStage;

use crate::error::CoreError;
use crate::signal::{BackendSignal, ExecutionPhase};
use crate::timings::TimingTable;

/// Point-in-time progress for one job. Ephemeral: published and
/// discarded, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub stage: GenerationStage,
    pub step: u32,
    pub total_steps: u32,
    /// Overall completion, 0.0..=100.0.
    pub percent: f64,
    /// Estimated seconds remaining.
    pub eta_s: f64,
}

/// Map a raw backend signal to a stage.
///
/// Preference order: explicit hint, node-name substrings, elapsed-time
/// thresholds. The result never moves backward past `current` — a vague
/// signal degrades to the stage we already know rather than regressing.
pub fn classify_stage(
    signal: &BackendSignal,
    current: GenerationStage,
    elapsed_secs: f64,
) -> GenerationStage {
    let classified = if signal.phase == ExecutionPhase::Succeeded {
        GenerationStage::PostProcessing
    } else if let Some(hint) = signal.stage_hint {
        hint
    } else if let Some(stage) = signal.node_name.as_deref().and_then(stage_from_node_name) {
        stage
    } else if elapsed_secs < 1.0 {
        GenerationStage::Initializing
    } else if elapsed_secs < 3.0 {
        GenerationStage::LoadingModels
    } else if elapsed_secs < 4.0 {
        GenerationStage::Encoding
    } else {
        GenerationStage::Sampling
    };

    if classified.ordinal() >= current.ordinal() {
        classified
    } else {
        current
    }
}

fn stage_from_node_name(name: &str) -> Option<GenerationStage> {
    let name = name.to_ascii_lowercase();
    if name.contains("checkpoint") || name.contains("load") {
        Some(GenerationStage::LoadingModels)
    } else if name.contains("encode") || name.contains("clip") {
        Some(GenerationStage::Encoding)
    } else if name.contains("sampler") {
        Some(GenerationStage::Sampling)
    } else if name.contains("decode") || name.contains("vae") {
        Some(GenerationStage::Decoding)
    } else if name.contains("save") {
        Some(GenerationStage::PostProcessing)
    } else {
        None
    }
}

#[derive(Debug)]
struct JobProgress {
    execution_id: String,
    total_steps: u32,
    current_stage: GenerationStage,
    current_step: u32,
    stage_start: Instant,
    completed: Vec<GenerationStage>,
    /// High-water mark so a vague signal never makes percent regress.
    last_percent: f64,
}

/// Per-job progress state plus the process-wide timing table.
///
/// One tracker per worker process; jobs are registered with [`start`],
/// fed signals via [`update`], and dropped by [`complete`].
///
/// [`start`]: ProgressTracker::start
/// [`update`]: ProgressTracker::update
/// [`complete`]: ProgressTracker::complete
#[derive(Debug)]
pub struct ProgressTracker {
    jobs: HashMap<String, JobProgress>,
    timings: TimingTable,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            jobs: HashMap::new(),
            timings: TimingTable::new(),
        }
    }

    /// Begin tracking a job that was just submitted to the backend.
    pub fn start(&mut self, job_id: &str, execution_id: &str, total_steps: u32) {
        self.jobs.insert(
            job_id.to_string(),
            JobProgress {
                execution_id: execution_id.to_string(),
                total_steps,
                current_stage: GenerationStage::Initializing,
                current_step: 0,
                stage_start: Instant::now(),
                completed: Vec::new(),
                last_percent: 0.0,
            },
        );
    }

    /// Backend execution id recorded for a tracked job.
    pub fn execution_id(&self, job_id: &str) -> Option<&str> {
        self.jobs.get(job_id).map(|j| j.execution_id.as_str())
    }

    /// Fold one backend signal into the job's progress state.
    ///
    /// Updating a job that was never started is a typed error, not a
    /// condition to default away.
    pub fn update(
        &mut self,
        job_id: &str,
        signal: &BackendSignal,
    ) -> Result<ProgressSnapshot, CoreError> {
        let job = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| CoreError::UnknownJob(job_id.to_string()))?;

        let elapsed = job.stage_start.elapsed().as_secs_f64();
        let stage = classify_stage(signal, job.current_stage, elapsed);

        if stage != job.current_stage {
            // Record the previous stage's duration before switching.
            self.timings.record(job.current_stage, elapsed);
            job.completed.push(job.current_stage);
            job.current_stage = stage;
            job.stage_start = Instant::now();
        }
        if signal.step > job.current_step {
            job.current_step = signal.step;
        }

        let stage_elapsed = job.stage_start.elapsed().as_secs_f64();
        let fraction = stage_fraction(job, stage_elapsed, &self.timings);

        let completed_weight: f64 = job.completed.iter().map(|s| s.weight()).sum();
        let percent = (completed_weight + job.current_stage.weight() * fraction)
            .clamp(job.last_percent, 100.0);
        job.last_percent = percent;

        let eta_s = stage_remaining(job, stage_elapsed, fraction, &self.timings)
            + job
                .current_stage
                .remaining_after()
                .iter()
                .map(|s| self.timings.get(*s).estimate())
                .sum::<f64>();

        Ok(ProgressSnapshot {
            stage: job.current_stage,
            step: job.current_step,
            total_steps: job.total_steps,
            percent,
            eta_s,
        })
    }

    /// Stop tracking a job, flushing the final stage's timing sample.
    /// Unknown ids are ignored.
    pub fn complete(&mut self, job_id: &str) {
        if let Some(job) = self.jobs.remove(job_id) {
            self.timings
                .record(job.current_stage, job.stage_start.elapsed().as_secs_f64());
        }
    }

    pub fn timings(&self) -> &TimingTable {
        &self.timings
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Fractional completion of the current stage, 0.0..=1.0. Sampling is
/// step-driven; every other stage is elapsed-over-estimate.
fn stage_fraction(job: &JobProgress, stage_elapsed: f64, timings: &TimingTable) -> f64 {
    if job.current_stage == GenerationStage::Sampling {
        if job.total_steps == 0 {
            return 0.0;
        }
        (job.current_step as f64 / job.total_steps as f64).clamp(0.0, 1.0)
    } else {
        let estimate = timings.get(job.current_stage).estimate();
        if estimate <= 0.0 {
            return 1.0;
        }
        (stage_elapsed / estimate).clamp(0.0, 1.0)
    }
}

/// Seconds left in the current stage. Sampling projects from the
/// observed per-step rate once steps are flowing; everything else is
/// the timing estimate minus elapsed, floored at zero.
fn stage_remaining(
    job: &JobProgress,
    stage_elapsed: f64,
    fraction: f64,
    timings: &TimingTable,
) -> f64 {
    if job.current_stage == GenerationStage::Sampling && job.current_step > 0 {
        let per_step = stage_elapsed / job.current_step as f64;
        let remaining_steps = job.total_steps.saturating_sub(job.current_step);
        per_step * remaining_steps as f64
    } else {
        let estimate = timings.get(job.current_stage).estimate();
        (estimate * (1.0 - fraction)).max(0.0)
    }
}
