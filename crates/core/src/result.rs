//! Result type definition for tempo operations.

use crate::error::Error;

/// The standard Result type for tempo operations.
///
/// Use the `?` operator, `match`, or combinator methods to handle results.
///
/// # Examples
///
/// ```
/// use tempo_core::{Error, Result};
///
/// fn interval(ms: u64) -> Result<u64> {
///     if ms == 0 {
///         return Err(Error::invalid_config("interval", "must be greater than 0"));
///     }
///     Ok(ms)
/// }
///
/// assert!(interval(0).is_err());
/// assert_eq!(interval(5).ok(), Some(5));
/// ```
pub type Result<T> = std::result::Result<T, Error>;
