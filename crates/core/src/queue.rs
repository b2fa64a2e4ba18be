//! In-memory FIFO job store.
//!
//! [`JobQueue`] keeps every known job in a map plus a pending index of
//! queued ids in arrival order. It performs no locking itself — the
//! server wraps it in a mutex so the command handler and the worker loop
//! can share it (single-writer by convention, guarded by construction).

use std::collections::{HashMap, VecDeque};

use chrono::{Duration, Utc};

use crate::job::{Job, JobSpec, JobStatus};

/// Linear acceptance-time estimate: seconds per sampling step. Distinct
/// from the progress tracker's per-stage estimate, which is only
/// available once a job is executing.
pub const ESTIMATE_SECS_PER_STEP: f64 = 0.1;

/// FIFO job queue with explicit status transitions.
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: HashMap<String, Job>,
    pending: VecDeque<String>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new job. Always enters as `Queued` with `created_at`
    /// stamped.
    pub fn add(&mut self, spec: JobSpec) -> Job {
        let job = Job::from_spec(spec);
        self.pending.push_back(job.id.clone());
        self.jobs.insert(job.id.clone(), job.clone());
        job
    }

    /// Pop the oldest queued job, flipping it to `Running` and stamping
    /// `started_at`. Returns `None` when nothing is queued — never
    /// blocks. Ids whose jobs were cancelled while queued are skipped.
    pub fn next(&mut self) -> Option<Job> {
        while let Some(id) = self.pending.pop_front() {
            if let Some(job) = self.jobs.get_mut(&id) {
                if job.status == JobStatus::Queued {
                    job.status = JobStatus::Running;
                    job.started_at = Some(Utc::now());
                    return Some(job.clone());
                }
            }
        }
        None
    }

    /// Look up a job by id.
    pub fn get(&self, id: &str) -> Option<&Job> {
        self.jobs.get(id)
    }

    /// Mark a running job completed with its output path. Unknown or
    /// already-terminal ids are ignored.
    pub fn complete(&mut self, id: &str, output_path: &str) {
        if let Some(job) = self.jobs.get_mut(id) {
            if job.status.can_transition(JobStatus::Completed) {
                job.status = JobStatus::Completed;
                job.completed_at = Some(Utc::now());
                job.output_path = Some(output_path.to_string());
            }
        }
    }

    /// Mark a job failed with a reason. Unknown or already-terminal ids
    /// are ignored.
    pub fn fail(&mut self, id: &str, error: &str) {
        if let Some(job) = self.jobs.get_mut(id) {
            if job.status.can_transition(JobStatus::Failed) {
                job.status = JobStatus::Failed;
                job.completed_at = Some(Utc::now());
                job.error = Some(error.to_string());
            }
        }
    }

    /// Cancel a job. Returns `true` only if the job existed and was
    /// non-terminal. A still-queued job is also removed from the pending
    /// index so `next()` never returns it.
    pub fn cancel(&mut self, id: &str) -> bool {
        let Some(job) = self.jobs.get_mut(id) else {
            return false;
        };
        if !job.status.can_transition(JobStatus::Cancelled) {
            return false;
        }
        job.status = JobStatus::Cancelled;
        job.completed_at = Some(Utc::now());
        self.pending.retain(|pending_id| pending_id != id);
        true
    }

    /// Number of jobs currently queued.
    pub fn queue_size(&self) -> u32 {
        self.jobs
            .values()
            .filter(|j| j.status == JobStatus::Queued)
            .count() as u32
    }

    /// Number of jobs currently running.
    pub fn active_jobs(&self) -> u32 {
        self.jobs
            .values()
            .filter(|j| j.status == JobStatus::Running)
            .count() as u32
    }

    /// Acceptance-time ETA for a job of `steps` sampling steps.
    pub fn estimate_time(&self, steps: u32) -> f64 {
        steps as f64 * ESTIMATE_SECS_PER_STEP
    }

    /// Drop terminal jobs whose completion is older than `max_age`.
    /// Returns the number removed.
    pub fn prune(&mut self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let before = self.jobs.len();
        self.jobs.retain(|_, job| {
            !(job.status.is_terminal()
                && job.completed_at.map(|t| t < cutoff).unwrap_or(false))
        });
        before - self.jobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str) -> JobSpec {
        JobSpec {
            id: Some(id.into()),
            prompt: "pixel art slime".into(),
            model: "sdxl.safetensors".into(),
            size: (512, 512),
            steps: 10,
            cfg_scale: 7.0,
            lora: None,
        }
    }

    #[test]
    fn add_then_next_is_fifo() {
        let mut q = JobQueue::new();
        q.add(spec("a"));
        q.add(spec("b"));

        assert_eq!(q.next().unwrap().id, "a");
        assert_eq!(q.next().unwrap().id, "b");
        assert!(q.next().is_none());
    }

    #[test]
    fn next_flips_to_running_and_stamps_started_at() {
        let mut q = JobQueue::new();
        q.add(spec("a"));
        let job = q.next().unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.started_at.is_some());
        assert_eq!(q.get("a").unwrap().status, JobStatus::Running);
    }

    #[test]
    fn next_on_empty_queue_returns_none() {
        let mut q = JobQueue::new();
        assert!(q.next().is_none());
    }

    #[test]
    fn complete_stamps_output_and_timestamp() {
        let mut q = JobQueue::new();
        q.add(spec("a"));
        q.next();
        q.complete("a", "/out/a.png");

        let job = q.get("a").unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.output_path.as_deref(), Some("/out/a.png"));
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn fail_records_error() {
        let mut q = JobQueue::new();
        q.add(spec("a"));
        q.next();
        q.fail("a", "backend exploded");

        let job = q.get("a").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("backend exploded"));
    }

    #[test]
    fn complete_on_unknown_id_is_a_noop() {
        let mut q = JobQueue::new();
        q.complete("ghost", "/out/x.png");
        assert!(q.get("ghost").is_none());
    }

    #[test]
    fn complete_on_terminal_job_is_a_noop() {
        let mut q = JobQueue::new();
        q.add(spec("a"));
        q.next();
        q.fail("a", "boom");
        q.complete("a", "/out/a.png");

        let job = q.get("a").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.output_path.is_none());
    }

    #[test]
    fn cancel_queued_job_removes_it_from_dequeue() {
        let mut q = JobQueue::new();
        q.add(spec("a"));
        q.add(spec("b"));

        assert!(q.cancel("a"));
        assert_eq!(q.get("a").unwrap().status, JobStatus::Cancelled);

        // "a" must never come out of next() again.
        assert_eq!(q.next().unwrap().id, "b");
        assert!(q.next().is_none());
    }

    #[test]
    fn cancel_running_job_returns_true() {
        let mut q = JobQueue::new();
        q.add(spec("a"));
        q.next();
        assert!(q.cancel("a"));
        assert_eq!(q.get("a").unwrap().status, JobStatus::Cancelled);
    }

    #[test]
    fn cancel_unknown_or_terminal_returns_false() {
        let mut q = JobQueue::new();
        assert!(!q.cancel("ghost"));

        q.add(spec("a"));
        q.next();
        q.complete("a", "/out/a.png");
        assert!(!q.cancel("a"));
        assert_eq!(q.get("a").unwrap().status, JobStatus::Completed);
    }

    #[test]
    fn counts_track_statuses() {
        let mut q = JobQueue::new();
        q.add(spec("a"));
        q.add(spec("b"));
        assert_eq!(q.queue_size(), 2);
        assert_eq!(q.active_jobs(), 0);

        q.next();
        assert_eq!(q.queue_size(), 1);
        assert_eq!(q.active_jobs(), 1);
    }

    #[test]
    fn estimate_time_is_linear_in_steps() {
        let q = JobQueue::new();
        assert!((q.estimate_time(20) - 2.0).abs() < f64::EPSILON);
        assert!((q.estimate_time(0) - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn prune_drops_only_old_terminal_jobs() {
        let mut q = JobQueue::new();
        q.add(spec("done"));
        q.next();
        q.complete("done", "/out/done.png");
        // Backdate the completion beyond the retention window.
        q.jobs.get_mut("done").unwrap().completed_at =
            Some(Utc::now() - Duration::seconds(7200));

        q.add(spec("fresh"));

        let removed = q.prune(Duration::seconds(3600));
        assert_eq!(removed, 1);
        assert!(q.get("done").is_none());
        assert!(q.get("fresh").is_some());
    }
}
