//! Backoff strategies for the remote-authority reconnection loop.
//!
//! Attempt semantics: attempt index `0` is the first connection try (no delay) and failed
//! reconnects start at `attempt = 1`. The default reconnection schedule is linear, starting at
//! one second and growing by one second per failure up to ten seconds.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use bucketry::Backoff;
//!
//! let backoff = Backoff::linear(Duration::from_secs(1))
//!     .with_max(Duration::from_secs(10))
//!     .unwrap();
//! assert_eq!(backoff.delay(0), Duration::ZERO);
//! assert_eq!(backoff.delay(3), Duration::from_secs(3));
//! assert_eq!(backoff.delay(42), Duration::from_secs(10));
//! ```
//!
//! Overflow behavior: computations that would overflow saturate to `MAX_BACKOFF` (1 day).

use std::fmt;
use std::time::Duration;

/// Maximum delay used when calculations overflow (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffError {
    ConstantDoesNotSupportMax,
    MaxMustBePositive,
    MaxLessThanBase { base: Duration, max: Duration },
}

impl fmt::Display for BackoffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackoffError::ConstantDoesNotSupportMax => {
                write!(f, "with_max is only valid for linear backoff")
            }
            BackoffError::MaxMustBePositive => write!(f, "max must be greater than zero"),
            BackoffError::MaxLessThanBase { base, max } => {
                write!(f, "max ({:?}) must be >= base ({:?})", max, base)
            }
        }
    }
}

impl std::error::Error for BackoffError {}

#[derive(Debug, Clone, PartialEq, Eq)]
enum BackoffKind {
    Constant { delay: Duration },
    Linear { base: Duration, max: Option<Duration> },
}

/// Delay schedule between reconnection attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    kind: BackoffKind,
}

impl Backoff {
    /// Create a constant backoff strategy
    pub fn constant(delay: Duration) -> Self {
        Self { kind: BackoffKind::Constant { delay } }
    }

    /// Create a linear backoff strategy
    pub fn linear(base: Duration) -> Self {
        Self { kind: BackoffKind::Linear { base, max: None } }
    }

    /// Cap a linear backoff.
    /// Returns an error if called on `Constant`, if `max` is zero, or if `max < base`.
    pub fn with_max(mut self, max: Duration) -> Result<Self, BackoffError> {
        if max.is_zero() {
            return Err(BackoffError::MaxMustBePositive);
        }
        match &mut self.kind {
            BackoffKind::Linear { base, max: existing } => {
                if max < *base {
                    return Err(BackoffError::MaxLessThanBase { base: *base, max });
                }
                *existing = Some(max);
                Ok(self)
            }
            BackoffKind::Constant { .. } => Err(BackoffError::ConstantDoesNotSupportMax),
        }
    }

    /// Delay before the given attempt (0 = initial try, no delay).
    pub fn delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        match &self.kind {
            BackoffKind::Constant { delay } => *delay,
            BackoffKind::Linear { base, max } => {
                let attempt_u32 = attempt.min(u32::MAX as usize) as u32;
                let linear = base.checked_mul(attempt_u32).unwrap_or(MAX_BACKOFF);
                let capped = max.map(|m| linear.min(m)).unwrap_or(linear);
                capped.min(MAX_BACKOFF)
            }
        }
    }
}

impl Default for Backoff {
    /// One second, plus one second per failed attempt, capped at ten seconds.
    fn default() -> Self {
        Self {
            kind: BackoffKind::Linear {
                base: Duration::from_secs(1),
                max: Some(Duration::from_secs(10)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_backoff_returns_same_delay() {
        let backoff = Backoff::constant(Duration::from_secs(1));
        assert_eq!(backoff.delay(0), Duration::ZERO);
        assert_eq!(backoff.delay(1), Duration::from_secs(1));
        assert_eq!(backoff.delay(100), Duration::from_secs(1));
    }

    #[test]
    fn default_schedule_grows_by_one_second_and_caps_at_ten() {
        let backoff = Backoff::default();
        let delays: Vec<u64> = (1..=12).map(|a| backoff.delay(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 10, 10]);
    }

    #[test]
    fn linear_backoff_handles_overflow() {
        let backoff = Backoff::linear(Duration::from_secs(u64::MAX / 2));
        assert_eq!(backoff.delay(1_000_000_000), MAX_BACKOFF);
    }

    #[test]
    fn with_max_on_constant_errors() {
        let constant = Backoff::constant(Duration::from_secs(5)).with_max(Duration::from_secs(1));
        assert!(matches!(constant, Err(BackoffError::ConstantDoesNotSupportMax)));
    }

    #[test]
    fn base_greater_than_max_is_rejected() {
        let err = Backoff::linear(Duration::from_secs(100))
            .with_max(Duration::from_secs(50))
            .unwrap_err();
        assert!(matches!(err, BackoffError::MaxLessThanBase { .. }));
    }

    #[test]
    fn zero_max_is_rejected() {
        let err = Backoff::linear(Duration::from_secs(1)).with_max(Duration::ZERO).unwrap_err();
        assert_eq!(err, BackoffError::MaxMustBePositive);
    }
}
