//! Window policy value type.

use std::fmt;
use std::time::Duration;

use crate::error::{Result, TollgateError};

/// One fixed-window rate limit: at most `threshold` grants per `interval`.
///
/// Validated at construction and immutable thereafter; thresholds and
/// intervals are never zero once a `Policy` exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    threshold: u64,
    interval: Duration,
}

impl Policy {
    /// Create a policy, rejecting non-positive thresholds or intervals.
    pub fn new(threshold: u64, interval: Duration) -> Result<Self> {
        if threshold == 0 {
            return Err(TollgateError::Config(
                "threshold must be a positive integer".to_string(),
            ));
        }
        if i64::try_from(threshold).is_err() {
            return Err(TollgateError::Config(format!(
                "threshold {} exceeds the counter range",
                threshold
            )));
        }
        if interval.is_zero() {
            return Err(TollgateError::Config(
                "interval must be a positive duration".to_string(),
            ));
        }
        Ok(Self {
            threshold,
            interval,
        })
    }

    /// Convenience constructor for whole-second intervals.
    pub fn per_seconds(threshold: u64, secs: u64) -> Result<Self> {
        Self::new(threshold, Duration::from_secs(secs))
    }

    /// Maximum grants permitted within one window.
    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Length of one window.
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}ms", self.threshold, self.interval.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_policy() {
        let policy = Policy::per_seconds(10, 1).unwrap();
        assert_eq!(policy.threshold(), 10);
        assert_eq!(policy.interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let err = Policy::per_seconds(0, 1).unwrap_err();
        assert!(matches!(err, TollgateError::Config(_)));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = Policy::new(10, Duration::ZERO).unwrap_err();
        assert!(matches!(err, TollgateError::Config(_)));
    }

    #[test]
    fn test_oversized_threshold_rejected() {
        let err = Policy::per_seconds(u64::MAX, 1).unwrap_err();
        assert!(matches!(err, TollgateError::Config(_)));
    }

    #[test]
    fn test_display() {
        let policy = Policy::new(42, Duration::from_secs(60)).unwrap();
        assert_eq!(policy.to_string(), "42/60000ms");
    }
}
