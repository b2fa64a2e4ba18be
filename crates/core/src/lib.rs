//! Domain logic for the spriteforge generation backend.
//!
//! Pure, I/O-free building blocks shared by the IPC server and the batch
//! scheduler: job lifecycle and FIFO queue, progress/ETA estimation with
//! rolling historical timings, batch priority queueing, and throughput
//! statistics. Everything here is exercised by the `server` crate.

pub mod batch;
pub mod error;
pub mod job;
pub mod progress;
pub mod queue;
pub mod signal;
pub mod throughput;
pub mod timings;

pub use batch::{BatchJob, BatchPriority, BatchQueue, BatchStatus};
pub use error::CoreError;
pub use job::{Job, JobSpec, JobStatus};
pub use progress::{ProgressSnapshot, ProgressTracker};
pub use queue::JobQueue;
pub use signal::{BackendSignal, ExecutionPhase};
pub use throughput::ThroughputWindow;
pub use timings::{StageTimings, TimingTable};
