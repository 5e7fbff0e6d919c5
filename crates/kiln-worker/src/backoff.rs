//! Exponential poll backoff.

use crate::config::PollConfig;
use std::time::Duration;

/// Delay between polls that found no work.
///
/// Starts at the initial interval, grows by the multiplier after every
/// empty poll, caps at the maximum and resets once a job is claimed.
#[derive(Debug, Clone)]
pub struct PollBackoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    current: Duration,
}

impl PollBackoff {
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            multiplier: multiplier.max(1.0),
            current: initial,
        }
    }

    pub fn from_config(config: &PollConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_interval_ms),
            Duration::from_millis(config.max_interval_ms),
            config.multiplier,
        )
    }

    /// Delay to wait now; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        // Saturate in f64; huge or infinite multipliers land on the cap.
        let next = self.current.as_secs_f64() * self.multiplier;
        self.current = if next.is_finite() && next < self.max.as_secs_f64() {
            Duration::from_secs_f64(next)
        } else {
            self.max
        };
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for PollBackoff {
    fn default() -> Self {
        Self::from_config(&PollConfig::default())
    }
}
