//! Core types, errors, and clock sources shared by the tempo crates.
//!
//! All errors are explicit, typed, and recoverable - no panics allowed.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod clock;
pub mod error;
pub mod result;
pub mod time;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::Error;
pub use result::Result;
pub use time::Timestamp;
