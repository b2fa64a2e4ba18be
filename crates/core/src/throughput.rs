//! Rolling throughput window for batch generation.

use std::collections::VecDeque;

/// Maximum per-prompt durations retained.
pub const WINDOW_SIZE: usize = 100;

/// Bounded window of recent per-prompt generation durations, used to
/// report average generation time and images-per-minute throughput.
#[derive(Debug, Default)]
pub struct ThroughputWindow {
    durations: VecDeque<f64>,
}

impl ThroughputWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one prompt's generation time, evicting the oldest sample
    /// once the window is full.
    pub fn record(&mut self, duration_secs: f64) {
        if self.durations.len() == WINDOW_SIZE {
            self.durations.pop_front();
        }
        self.durations.push_back(duration_secs);
    }

    pub fn sample_count(&self) -> usize {
        self.durations.len()
    }

    /// Mean generation time over the window, or 0.0 with no samples.
    pub fn average_secs(&self) -> f64 {
        if self.durations.is_empty() {
            return 0.0;
        }
        self.durations.iter().sum::<f64>() / self.durations.len() as f64
    }

    /// Images per minute derived from the average, or 0.0 with no
    /// samples.
    pub fn per_minute(&self) -> f64 {
        let avg = self.average_secs();
        if avg <= 0.0 {
            return 0.0;
        }
        60.0 / avg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_window_reports_zero() {
        let w = ThroughputWindow::new();
        assert_eq!(w.average_secs(), 0.0);
        assert_eq!(w.per_minute(), 0.0);
    }

    #[test]
    fn per_minute_is_sixty_over_average() {
        let mut w = ThroughputWindow::new();
        w.record(5.0);
        w.record(7.0);
        assert!((w.average_secs() - 6.0).abs() < f64::EPSILON);
        assert!((w.per_minute() - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn window_evicts_oldest_sample() {
        let mut w = ThroughputWindow::new();
        w.record(600.0);
        for _ in 0..WINDOW_SIZE {
            w.record(6.0);
        }
        assert_eq!(w.sample_count(), WINDOW_SIZE);
        assert!((w.average_secs() - 6.0).abs() < f64::EPSILON);
    }
}
