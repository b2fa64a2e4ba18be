//! Rolling historical timing data per generation stage.
//!
//! [`StageTimings`] keeps a bounded window of observed durations for one
//! stage; [`TimingTable`] owns one window per stage. The table is
//! process-wide (held by the single progress tracker) so estimates keep
//! improving across jobs. Memory is bounded by the fixed window size.

use std::collections::VecDeque;

use spriteforge_protocol::GenerationStage;

/// Maximum samples retained per stage.
pub const MAX_SAMPLES: usize = 100;

/// Bounded ring of observed durations for a single stage.
#[derive(Debug, Clone)]
pub struct StageTimings {
    stage: GenerationStage,
    samples: VecDeque<f64>,
}

impl StageTimings {
    pub fn new(stage: GenerationStage) -> Self {
        Self {
            stage,
            samples: VecDeque::with_capacity(MAX_SAMPLES),
        }
    }

    /// Record one observed duration, evicting the oldest sample once the
    /// window is full.
    pub fn add_sample(&mut self, duration_secs: f64) {
        if self.samples.len() == MAX_SAMPLES {
            self.samples.pop_front();
        }
        self.samples.push_back(duration_secs);
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Mean of the retained samples, or 0.0 with none.
    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    /// Duration estimate for this stage: the rolling average, or the
    /// stage's documented default while no samples exist.
    pub fn estimate(&self) -> f64 {
        if self.samples.is_empty() {
            self.stage.default_estimate_secs()
        } else {
            self.average()
        }
    }
}

/// One [`StageTimings`] window per stage, indexed by stage ordinal.
#[derive(Debug, Clone)]
pub struct TimingTable {
    windows: [StageTimings; 6],
}

impl TimingTable {
    /// Empty windows for all six stages; `estimate()` falls back to the
    /// per-stage defaults until samples arrive.
    pub fn new() -> Self {
        Self {
            windows: GenerationStage::ALL.map(StageTimings::new),
        }
    }

    pub fn get(&self, stage: GenerationStage) -> &StageTimings {
        &self.windows[stage.ordinal()]
    }

    pub fn record(&mut self, stage: GenerationStage, duration_secs: f64) {
        self.windows[stage.ordinal()].add_sample(duration_secs);
    }
}

impl Default for TimingTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_with_zero_samples_is_the_stage_default() {
        for stage in GenerationStage::ALL {
            let timings = StageTimings::new(stage);
            assert_eq!(timings.estimate(), stage.default_estimate_secs(), "{stage:?}");
        }
    }

    #[test]
    fn estimate_after_one_sample_is_that_sample() {
        let mut timings = StageTimings::new(GenerationStage::Sampling);
        timings.add_sample(4.0);
        assert!((timings.estimate() - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn average_of_multiple_samples() {
        let mut timings = StageTimings::new(GenerationStage::Decoding);
        timings.add_sample(1.0);
        timings.add_sample(3.0);
        assert!((timings.average() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn window_is_bounded_and_evicts_oldest() {
        let mut timings = StageTimings::new(GenerationStage::Encoding);
        timings.add_sample(1000.0);
        for _ in 0..MAX_SAMPLES {
            timings.add_sample(2.0);
        }
        assert_eq!(timings.sample_count(), MAX_SAMPLES);
        // The 1000.0 outlier fell out of the window.
        assert!((timings.average() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn table_records_into_the_right_stage() {
        let mut table = TimingTable::new();
        table.record(GenerationStage::Sampling, 8.0);

        assert_eq!(table.get(GenerationStage::Sampling).sample_count(), 1);
        assert_eq!(table.get(GenerationStage::Decoding).sample_count(), 0);
    }
}
