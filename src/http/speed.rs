/*!
 * Exponentially-smoothed throughput estimation, sampled at short
 * intervals. Used only for reporting (§4.3).
 */

use std::time::Instant;

const SMOOTHING: f64 = 0.3;
const MIN_SAMPLE_INTERVAL_MS: u128 = 200;

pub struct SpeedEstimator {
    last_sample_at: Instant,
    last_total_bytes: u64,
    smoothed_bytes_per_sec: f64,
}

impl SpeedEstimator {
    pub fn new() -> Self {
        Self {
            last_sample_at: Instant::now(),
            last_total_bytes: 0,
            smoothed_bytes_per_sec: 0.0,
        }
    }

    /// Feed the current cumulative byte count (`uploaded + downloaded`).
    /// No-op if called more often than `MIN_SAMPLE_INTERVAL_MS`.
    pub fn sample(&mut self, cumulative_bytes: u64) {
        let elapsed = self.last_sample_at.elapsed();
        if elapsed.as_millis() < MIN_SAMPLE_INTERVAL_MS {
            return;
        }

        let delta_bytes = cumulative_bytes.saturating_sub(self.last_total_bytes) as f64;
        let instantaneous = delta_bytes / elapsed.as_secs_f64().max(0.001);

        self.smoothed_bytes_per_sec =
            SMOOTHING * instantaneous + (1.0 - SMOOTHING) * self.smoothed_bytes_per_sec;

        self.last_sample_at = Instant::now();
        self.last_total_bytes = cumulative_bytes;
    }

    pub fn kilobytes_per_sec(&self) -> f64 {
        self.smoothed_bytes_per_sec / 1024.0
    }
}

impl Default for SpeedEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn ignores_samples_within_the_minimum_interval() {
        let mut est = SpeedEstimator::new();
        est.sample(1000);
        est.sample(2000);
        // Second sample is too soon; smoothed figure stays at its
        // initial value (0) since the first sample also needed an
        // elapsed window to establish a rate.
        assert_eq!(est.kilobytes_per_sec(), 0.0);
    }

    #[test]
    fn produces_a_positive_rate_after_a_real_interval() {
        let mut est = SpeedEstimator::new();
        sleep(Duration::from_millis(210));
        est.sample(1_000_000);
        assert!(est.kilobytes_per_sec() > 0.0);
    }
}
