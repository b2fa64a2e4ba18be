//! Raw execution signal reported by the generation backend.
//!
//! Produced by the backend adapter on every poll round-trip and consumed
//! by the progress tracker. Deliberately loose: real backends report a
//! mix of queue position, node names, and step counters, and any of the
//! optional fields may be absent on a given tick.

use spriteforge_protocol::GenerationStage;

/// Coarse execution phase of a submitted workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPhase {
    /// Queued on the backend, not yet executing.
    Pending,
    /// Actively executing.
    Running,
    /// Finished with outputs available.
    Succeeded,
    /// Finished with an error.
    Failed,
}

/// One poll tick's worth of raw backend state.
#[derive(Debug, Clone)]
pub struct BackendSignal {
    pub phase: ExecutionPhase,
    /// Explicit stage metadata, when the backend provides it. Preferred
    /// over any heuristic.
    pub stage_hint: Option<GenerationStage>,
    /// Name of the node/operation currently executing, if reported.
    pub node_name: Option<String>,
    /// Current sampling step, when known.
    pub step: u32,
    /// Backend-reported total steps, when known (the tracker trusts the
    /// job's own step count instead).
    pub total_steps: u32,
    /// Error detail for `Failed` signals.
    pub error: Option<String>,
}

impl BackendSignal {
    /// A bare signal carrying only a phase.
    pub fn phase(phase: ExecutionPhase) -> Self {
        Self {
            phase,
            stage_hint: None,
            node_name: None,
            step: 0,
            total_steps: 0,
            error: None,
        }
    }
}
