//! Async host loop that ticks a [`TimerService`].

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::TimerError;
use crate::service::TimerService;

/// Counters reported when a driver stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStats {
    /// Ticks performed.
    pub ticks: u64,
    /// Timers fired across all ticks.
    pub fired: u64,
    /// Ticks cut short by a failing handler.
    pub handler_failures: u64,
}

/// Ticks a scheduler at a fixed period until shut down.
///
/// Handler failures are logged and counted; the loop keeps going. Hosts that
/// want a different policy drive [`TimerService::tick`] themselves.
#[derive(Debug, Clone)]
pub struct TimerDriver {
    timers: TimerService,
    period: Duration,
}

impl TimerDriver {
    /// Create a driver using the service's configured tick interval.
    #[must_use]
    pub fn new(timers: TimerService) -> Self {
        let period = timers.config().tick_interval();
        Self { timers, period }
    }

    /// Override the tick period. Zero is raised to one millisecond.
    #[must_use]
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period.max(Duration::from_millis(1));
        self
    }

    /// The tick period.
    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Tick until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) -> DriverStats {
        info!(period_ms = %self.period.as_millis(), "Timer driver starting");

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut stats = DriverStats::default();

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            stats.ticks = stats.ticks.saturating_add(1);
            match self.timers.tick() {
                Ok(summary) => {
                    stats.fired = stats.fired.saturating_add(summary.fired as u64);
                }
                Err(err @ TimerError::Handler { .. }) => {
                    stats.handler_failures = stats.handler_failures.saturating_add(1);
                    error!(error = %err, "Timer tick aborted by handler failure");
                }
                Err(err) => {
                    debug!(error = %err, "Timer tick skipped");
                }
            }
        }

        info!(
            ticks = stats.ticks,
            fired = stats.fired,
            handler_failures = stats.handler_failures,
            "Timer driver stopped"
        );
        stats
    }

    /// Run on the current tokio runtime.
    #[must_use]
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<DriverStats> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}
