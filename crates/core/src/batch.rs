//! Priority scheduling for multi-prompt batches.
//!
//! Deliberately simpler than the single-job queue: batches carry an
//! explicit priority class, prompts run sequentially within a batch, and
//! cancellation of a queued batch removes it outright.

use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Priority class for a batch. Lower sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPriority {
    Urgent = 0,
    High = 1,
    Normal = 2,
    Low = 3,
}

/// Lifecycle status of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Queued,
    Running,
    Completed,
    Cancelled,
}

/// One multi-prompt generation batch.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub id: String,
    pub prompts: Vec<String>,
    pub model: String,
    pub size: (u32, u32),
    pub steps: u32,
    pub cfg_scale: f64,
    pub priority: BatchPriority,
    pub status: BatchStatus,
    /// Whole prompts finished so far (successful or not) plus the
    /// in-flight prompt's step fraction, so 1.5 means the second of
    /// three prompts is half sampled.
    pub completed_prompts: f64,
    /// Output paths for the prompts that succeeded.
    pub generated_outputs: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BatchJob {
    pub fn new(
        id: impl Into<String>,
        prompts: Vec<String>,
        model: impl Into<String>,
        size: (u32, u32),
        steps: u32,
        cfg_scale: f64,
        priority: BatchPriority,
    ) -> Self {
        Self {
            id: id.into(),
            prompts,
            model: model.into(),
            size,
            steps,
            cfg_scale,
            priority,
            status: BatchStatus::Queued,
            completed_prompts: 0.0,
            generated_outputs: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// Heap entry. `BinaryHeap` is a max-heap, so the ordering is reversed:
/// the smallest (priority, seq) pair must compare greatest.
#[derive(Debug)]
struct Entry {
    priority: BatchPriority,
    seq: u64,
    batch: BatchJob,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (other.priority, other.seq).cmp(&(self.priority, self.seq))
    }
}

/// Priority queue of batches with insertion order as the tiebreak
/// within a priority class.
#[derive(Debug, Default)]
pub struct BatchQueue {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
}

impl BatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, batch: BatchJob) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry {
            priority: batch.priority,
            seq,
            batch,
        });
    }

    /// Pop the highest-priority batch (oldest within its class), flipped
    /// to `Running` with `started_at` stamped. `None` when empty.
    pub fn pop(&mut self) -> Option<BatchJob> {
        let mut batch = self.heap.pop()?.batch;
        batch.status = BatchStatus::Running;
        batch.started_at = Some(Utc::now());
        Some(batch)
    }

    /// Remove a still-queued batch outright. Returns `false` when no
    /// queued batch has this id.
    pub fn cancel(&mut self, id: &str) -> bool {
        let before = self.heap.len();
        self.heap = self
            .heap
            .drain()
            .filter(|entry| entry.batch.id != id)
            .collect();
        self.heap.len() < before
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
