//! Configuration for the timer service.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tempo_core::{Error, Result};

/// Configuration for a [`TimerService`](crate::TimerService) and its driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerConfig {
    /// Shortest interval accepted by `schedule_repeating`.
    #[serde(default = "default_min_repeat_interval_ms")]
    pub min_repeat_interval_ms: u64,

    /// Interval used by `schedule_frame`. Zero fires on every tick.
    #[serde(default)]
    pub frame_interval_ms: u64,

    /// How often the async driver ticks the scheduler.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerConfig {
    /// Create a config with defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            min_repeat_interval_ms: 100,
            frame_interval_ms: 0,
            tick_interval_ms: 10,
        }
    }

    /// Set the repeating-timer minimum.
    #[must_use]
    pub const fn with_min_repeat_interval_ms(mut self, ms: u64) -> Self {
        self.min_repeat_interval_ms = ms;
        self
    }

    /// Set the frame timer interval.
    #[must_use]
    pub const fn with_frame_interval_ms(mut self, ms: u64) -> Self {
        self.frame_interval_ms = ms;
        self
    }

    /// Set the driver tick interval.
    #[must_use]
    pub const fn with_tick_interval_ms(mut self, ms: u64) -> Self {
        self.tick_interval_ms = ms;
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.min_repeat_interval_ms == 0 {
            return Err(Error::invalid_config(
                "min_repeat_interval_ms",
                "must be greater than 0",
            ));
        }

        if self.tick_interval_ms == 0 {
            return Err(Error::invalid_config(
                "tick_interval_ms",
                "must be greater than 0",
            ));
        }

        if self.frame_interval_ms != 0 && self.frame_interval_ms < self.min_repeat_interval_ms {
            return Err(Error::invalid_config(
                "frame_interval_ms",
                format!(
                    "must be 0 (every tick) or at least min_repeat_interval_ms ({})",
                    self.min_repeat_interval_ms
                ),
            ));
        }

        Ok(())
    }

    /// Repeating-timer minimum as a duration.
    #[must_use]
    pub const fn min_repeat_interval(&self) -> Duration {
        Duration::from_millis(self.min_repeat_interval_ms)
    }

    /// Frame timer interval as a duration.
    #[must_use]
    pub const fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    /// Driver tick interval as a duration.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

const fn default_min_repeat_interval_ms() -> u64 {
    100
}

const fn default_tick_interval_ms() -> u64 {
    10
}
