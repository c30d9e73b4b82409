use std::time::Duration;
use tracing::{debug, warn};

use crate::config::PollConfig;
use crate::utils::{dynamic_alpha, Ewma};

/// Smoothing window of the read-time average.
const READ_TIME_WINDOW_MINUTES: f64 = 5.0;

/// Picks the next poll interval from the smoothed read duration and resets
/// to the initial interval after a run of failed cycles.
#[derive(Debug, Clone)]
pub struct AdaptivePollScheduler {
    read_time: Ewma,
    interval_secs: f64,
    consecutive_failures: u8,
    initial_secs: f64,
    min_secs: f64,
    max_secs: f64,
    step_secs: f64,
    max_failures: u8,
}

impl AdaptivePollScheduler {
    pub fn new(cfg: &PollConfig) -> Self {
        Self {
            read_time: Ewma::new(),
            interval_secs: cfg.initial_interval_secs,
            consecutive_failures: 0,
            initial_secs: cfg.initial_interval_secs,
            min_secs: cfg.min_interval_secs,
            max_secs: cfg.max_interval_secs.max(cfg.min_interval_secs),
            step_secs: cfg.interval_step_secs,
            max_failures: cfg.max_failures.max(1),
        }
    }

    pub fn interval_secs(&self) -> f64 {
        self.interval_secs
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs.max(0.0))
    }

    pub fn consecutive_failures(&self) -> u8 {
        self.consecutive_failures
    }

    /// Smoothed read duration in seconds; 0 until the first timed read.
    pub fn read_time_mean_secs(&self) -> f64 {
        self.read_time.value().unwrap_or(0.0)
    }

    /// Folds a successful read into the average and returns the new interval.
    pub fn record_success(&mut self, read_time_secs: f64) -> f64 {
        self.consecutive_failures = 0;
        if read_time_secs > 0.0 {
            let alpha = dynamic_alpha(self.interval_secs, READ_TIME_WINDOW_MINUTES);
            self.read_time.update(read_time_secs, alpha);
        }
        self.interval_secs = self.next_interval(self.read_time_mean_secs());
        debug!(
            read_time_secs,
            mean_secs = self.read_time_mean_secs(),
            interval_secs = self.interval_secs,
            "poll interval updated"
        );
        self.interval_secs
    }

    /// Counts a failed cycle; on the last allowed failure the interval falls
    /// back to its initial value and the counter starts over.
    pub fn record_failure(&mut self) -> u8 {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures >= self.max_failures {
            warn!(
                failures = self.consecutive_failures,
                interval_secs = self.initial_secs,
                "too many failed polls, resetting interval"
            );
            self.interval_secs = self.initial_secs;
            self.consecutive_failures = 0;
        }
        self.consecutive_failures
    }

    /// Rounds the mean read time up to a whole number of steps.
    fn next_interval(&self, mean_secs: f64) -> f64 {
        if mean_secs <= 0.0 || self.step_secs <= 0.0 {
            return self.initial_secs;
        }
        let steps = (mean_secs / self.step_secs).floor();
        let mut interval = steps * self.step_secs;
        if mean_secs - interval > 0.0 {
            interval += self.step_secs;
        }
        interval.clamp(self.min_secs, self.max_secs)
    }
}
