//! Job entity, lifecycle state machine, and request validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Inclusive bounds for sampling steps.
pub const MIN_STEPS: u32 = 1;
pub const MAX_STEPS: u32 = 150;

/// Inclusive bounds for the CFG scale.
pub const MIN_CFG_SCALE: f64 = 0.0;
pub const MAX_CFG_SCALE: f64 = 30.0;

/// Inclusive bounds for each image dimension, in pixels.
pub const MIN_DIMENSION: u32 = 64;
pub const MAX_DIMENSION: u32 = 2048;

/// Lifecycle status of a job.
///
/// Transitions are monotone: `Queued -> Running -> {Completed, Failed}`,
/// or `{Queued, Running} -> Cancelled`. Nothing leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Whether this status admits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the lifecycle state machine allows `self -> to`.
    pub fn can_transition(self, to: JobStatus) -> bool {
        match self {
            Self::Queued => matches!(to, Self::Running | Self::Cancelled),
            Self::Running => matches!(to, Self::Completed | Self::Failed | Self::Cancelled),
            Self::Completed | Self::Failed | Self::Cancelled => false,
        }
    }
}

/// Caller-supplied parameters for one generation job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    /// Caller-supplied id; a UUID v4 is generated when empty.
    pub id: Option<String>,
    pub prompt: String,
    pub model: String,
    /// (width, height) in pixels.
    pub size: (u32, u32),
    pub steps: u32,
    pub cfg_scale: f64,
    pub lora: Option<String>,
}

impl JobSpec {
    /// Validate parameter ranges, naming the offending field.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.prompt.trim().is_empty() {
            return Err(CoreError::Validation("prompt must not be empty".into()));
        }
        if self.model.trim().is_empty() {
            return Err(CoreError::Validation("model must not be empty".into()));
        }
        if !(MIN_STEPS..=MAX_STEPS).contains(&self.steps) {
            return Err(CoreError::Validation(format!(
                "steps must be within {MIN_STEPS}..={MAX_STEPS}, got {}",
                self.steps
            )));
        }
        if !(MIN_CFG_SCALE..=MAX_CFG_SCALE).contains(&self.cfg_scale) {
            return Err(CoreError::Validation(format!(
                "cfg_scale must be within {MIN_CFG_SCALE}..={MAX_CFG_SCALE}, got {}",
                self.cfg_scale
            )));
        }
        let (width, height) = self.size;
        for (field, value) in [("width", width), ("height", height)] {
            if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&value) {
                return Err(CoreError::Validation(format!(
                    "{field} must be within {MIN_DIMENSION}..={MAX_DIMENSION}, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// One generation request tracked through its lifecycle.
///
/// Created by the command handler, mutated only by the worker loop
/// (Running/Completed/Failed) or a cancel request, and pruned after a
/// retention window once terminal.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub prompt: String,
    pub model: String,
    pub size: (u32, u32),
    pub steps: u32,
    pub cfg_scale: f64,
    pub lora: Option<String>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    /// Set when the job is dequeued into Running.
    pub started_at: Option<DateTime<Utc>>,
    /// Set when the job reaches a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    pub output_path: Option<String>,
    pub error: Option<String>,
}

impl Job {
    /// Build a fresh Queued job from a spec, generating an id if the
    /// caller did not supply one.
    pub fn from_spec(spec: JobSpec) -> Self {
        let id = match spec.id {
            Some(id) if !id.is_empty() => id,
            _ => uuid::Uuid::new_v4().to_string(),
        };
        Self {
            id,
            prompt: spec.prompt,
            model: spec.model,
            size: spec.size,
            steps: spec.steps,
            cfg_scale: spec.cfg_scale,
            lora: spec.lora,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            output_path: None,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> JobSpec {
        JobSpec {
            id: Some("j1".into()),
            prompt: "pixel art knight".into(),
            model: "sdxl.safetensors".into(),
            size: (1024, 1024),
            steps: 20,
            cfg_scale: 7.5,
            lora: None,
        }
    }

    // -- state machine --

    #[test]
    fn queued_can_run_or_cancel() {
        assert!(JobStatus::Queued.can_transition(JobStatus::Running));
        assert!(JobStatus::Queued.can_transition(JobStatus::Cancelled));
        assert!(!JobStatus::Queued.can_transition(JobStatus::Completed));
        assert!(!JobStatus::Queued.can_transition(JobStatus::Failed));
    }

    #[test]
    fn running_can_complete_fail_or_cancel() {
        assert!(JobStatus::Running.can_transition(JobStatus::Completed));
        assert!(JobStatus::Running.can_transition(JobStatus::Failed));
        assert!(JobStatus::Running.can_transition(JobStatus::Cancelled));
        assert!(!JobStatus::Running.can_transition(JobStatus::Queued));
    }

    #[test]
    fn terminal_states_admit_no_transitions() {
        for terminal in [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled] {
            assert!(terminal.is_terminal());
            for target in [
                JobStatus::Queued,
                JobStatus::Running,
                JobStatus::Completed,
                JobStatus::Failed,
                JobStatus::Cancelled,
            ] {
                assert!(!terminal.can_transition(target), "{terminal:?} -> {target:?}");
            }
        }
    }

    // -- validation --

    #[test]
    fn valid_spec_accepted() {
        assert!(spec().validate().is_ok());
    }

    #[test]
    fn empty_prompt_rejected() {
        let mut s = spec();
        s.prompt = "   ".into();
        assert!(s.validate().is_err());
    }

    #[test]
    fn zero_steps_rejected() {
        let mut s = spec();
        s.steps = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn oversized_steps_rejected() {
        let mut s = spec();
        s.steps = MAX_STEPS + 1;
        assert!(s.validate().is_err());
    }

    #[test]
    fn cfg_scale_out_of_range_rejected() {
        let mut s = spec();
        s.cfg_scale = 31.0;
        assert!(s.validate().is_err());
        s.cfg_scale = -0.1;
        assert!(s.validate().is_err());
    }

    #[test]
    fn tiny_dimension_rejected() {
        let mut s = spec();
        s.size = (32, 1024);
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("width"));
    }

    // -- construction --

    #[test]
    fn from_spec_starts_queued_without_timestamps() {
        let job = Job::from_spec(spec());
        assert_eq!(job.id, "j1");
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.started_at.is_none());
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn missing_id_generates_one() {
        let mut s = spec();
        s.id = None;
        let job = Job::from_spec(s);
        assert!(!job.id.is_empty());
    }
}
