// timer.rs — lap stopwatch and timing statistics.

use std::fmt;
use std::time::{Duration, Instant};

/// Stopwatch recording the time between consecutive `next_lap` calls.
///
/// The first lap is measured from construction (or the last `restart`).
#[derive(Debug, Clone)]
pub struct Timer {
    last: Instant,
    laps: Vec<Duration>,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    pub fn new() -> Self {
        Timer { last: Instant::now(), laps: Vec::new() }
    }

    /// Close the current lap and start the next one.
    pub fn next_lap(&mut self) -> Duration {
        let now = Instant::now();
        let lap = now - self.last;
        self.last = now;
        self.laps.push(lap);
        lap
    }

    /// Record an externally measured lap.
    pub fn push_lap(&mut self, lap: Duration) {
        self.laps.push(lap);
        self.last = Instant::now();
    }

    /// Drop all laps and restart the clock.
    pub fn restart(&mut self) {
        self.laps.clear();
        self.last = Instant::now();
    }

    pub fn laps(&self) -> &[Duration] {
        &self.laps
    }

    /// Mean lap in seconds (0 with no laps).
    pub fn lap_avg(&self) -> f64 {
        self.stats().mean
    }

    /// Population standard deviation of laps in seconds.
    pub fn lap_std(&self) -> f64 {
        self.stats().stddev
    }

    pub fn stats(&self) -> TimingStats {
        TimingStats::from_laps(&self.laps)
    }
}

/// Mean and standard deviation of a set of timing samples, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingStats {
    pub mean: f64,
    pub stddev: f64,
    pub samples: usize,
}

impl TimingStats {
    pub fn from_laps(laps: &[Duration]) -> Self {
        let secs: Vec<f64> = laps.iter().map(Duration::as_secs_f64).collect();
        Self::from_secs(&secs)
    }

    pub fn from_secs(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return TimingStats { mean: 0.0, stddev: 0.0, samples: 0 };
        }
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let var = samples.iter().map(|s| (s - mean) * (s - mean)).sum::<f64>() / n;
        TimingStats { mean, stddev: var.sqrt(), samples: samples.len() }
    }
}

impl fmt::Display for TimingStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}+-{:.6} s", self.mean, self.stddev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_of_constant_samples() {
        let s = TimingStats::from_secs(&[0.5, 0.5, 0.5]);
        assert_eq!(s.mean, 0.5);
        assert_eq!(s.stddev, 0.0);
        assert_eq!(s.samples, 3);
    }

    #[test]
    fn stats_population_stddev() {
        // mean 5, deviations -3 -1 -1 -1 0 0 2 4 → var 4, std 2
        let s = TimingStats::from_secs(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((s.mean - 5.0).abs() < 1e-12);
        assert!((s.stddev - 2.0).abs() < 1e-12);
    }

    #[test]
    fn empty_stats_are_zero() {
        let t = Timer::new();
        assert_eq!(t.lap_avg(), 0.0);
        assert_eq!(t.stats().samples, 0);
    }

    #[test]
    fn laps_accumulate_and_restart_clears() {
        let mut t = Timer::new();
        t.next_lap();
        t.push_lap(Duration::from_millis(10));
        assert_eq!(t.laps().len(), 2);
        assert_eq!(t.laps()[1], Duration::from_millis(10));
        t.restart();
        assert!(t.laps().is_empty());
    }
}
