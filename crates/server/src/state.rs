//! Shared server state.

use std::collections::HashSet;
use std::sync::{Mutex as StdMutex, PoisonError};
use std::time::Instant;

use spriteforge_core::JobQueue;
use spriteforge_events::EventBus;
use tokio::sync::Mutex;

use crate::config::ServerConfig;

/// State shared between the command handlers and the worker loops.
///
/// The job queue is mutex-guarded because the command path reads and
/// cancels jobs concurrently with worker mutation. The cancel registry
/// is a separate sync mutex so the executor's poll tick can check it
/// without awaiting.
pub struct ServerState {
    pub config: ServerConfig,
    pub queue: Mutex<JobQueue>,
    pub bus: EventBus,
    cancels: StdMutex<HashSet<String>>,
    started_at: Instant,
}

impl ServerState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            queue: Mutex::new(JobQueue::new()),
            bus: EventBus::default(),
            cancels: StdMutex::new(HashSet::new()),
            started_at: Instant::now(),
        }
    }

    /// Flag a running job for cooperative cancellation. The executor
    /// observes the flag at its next poll tick.
    pub fn request_cancel(&self, job_id: &str) {
        self.cancels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id.to_string());
    }

    /// Whether cancellation has been requested for this job.
    pub fn cancel_requested(&self, job_id: &str) -> bool {
        self.cancels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(job_id)
    }

    /// Drop a job's cancel flag once its outcome is settled.
    pub fn clear_cancel(&self, job_id: &str) {
        self.cancels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(job_id);
    }

    /// Seconds since the server started.
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
