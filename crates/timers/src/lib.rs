//! In-memory timer scheduling.
//!
//! A [`TimerService`] lets application code:
//!
//! - fire a handler once at an absolute time ([`TimerService::schedule_once`])
//! - fire a handler at a fixed interval ([`TimerService::schedule_repeating`],
//!   [`TimerService::schedule_frame`])
//! - suspend a task until a deadline or cancellation ([`TimerService::wait_until`],
//!   [`TimerService::wait`], [`TimerService::wait_frame`])
//! - cancel any pending timer by id ([`TimerService::cancel`])
//!
//! Nothing happens on its own: the host calls [`TimerService::tick`] once per
//! time step, or runs a [`TimerDriver`]. Timers are best effort and live only
//! as long as the service.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tempo_core::{ManualClock, Timestamp};
//! use tempo_timers::{EventType, TimerConfig, TimerService};
//!
//! const GREET: EventType = EventType::new(1);
//!
//! let clock = ManualClock::new(Timestamp::ZERO);
//! let timers = TimerService::new(TimerConfig::default(), Arc::new(clock.clone()))?;
//! timers.register_fn(GREET, |_, fired| {
//!     println!("hello from {}", fired.id);
//!     Ok(())
//! });
//!
//! timers.schedule_once(Timestamp::from_millis(100), GREET, serde_json::json!({"name": "world"}));
//!
//! clock.set(Timestamp::from_millis(100));
//! assert_eq!(timers.tick()?.fired, 1);
//! # Ok::<(), tempo_timers::TimerError>(())
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod dispatch;
pub mod driver;
mod entry;
pub mod error;
mod index;
pub mod service;
pub mod wait;

pub use config::TimerConfig;
pub use dispatch::{EventType, FiredTimer, FnHandler, HandlerResult, TimerHandler};
pub use driver::{DriverStats, TimerDriver};
pub use entry::{TimerId, TimerKind};
pub use error::{HandlerError, TimerError, TimerResult};
pub use service::{TickSummary, TimerService};
pub use tokio_util::sync::CancellationToken;
pub use wait::WaitOutcome;
