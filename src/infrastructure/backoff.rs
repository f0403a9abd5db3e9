//! Backoff curves
//!
//! Each strategy is a pure function of the attempt index: no clocks, no
//! shared state. Callers store the resulting timestamp, never the curve.
//! `attempt` is zero-based (0 = delay before the first retry).

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::fmt::Debug;
use std::time::Duration;

use crate::infrastructure::config::BackoffKind;

const MAX_SHIFT: u32 = 20;

pub trait BackoffStrategy: Send + Sync + Debug {
    fn delay(&self, attempt: u32) -> Duration;
}

/// `base * (attempt + 1)`; the durable retry queue and the fhspb/junior fetch curve
#[derive(Debug, Clone, Copy)]
pub struct LinearBackoff {
    pub base: Duration,
}

impl LinearBackoff {
    #[must_use]
    pub const fn new(base: Duration) -> Self {
        Self { base }
    }
}

impl BackoffStrategy for LinearBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(attempt.saturating_add(1))
    }
}

/// `base * 2^(attempt + 1)`, capped at `max`
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl ExponentialBackoff {
    #[must_use]
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_add(1).min(MAX_SHIFT);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// `base * 2^attempt`, capped, then scaled by a uniform factor in `[1 - jitter, 1 + jitter]`
///
/// Used by the in-process error handler.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialJitterBackoff {
    pub base: Duration,
    pub max: Duration,
    pub jitter: f64,
}

impl ExponentialJitterBackoff {
    pub const DEFAULT_JITTER: f64 = 0.25;

    #[must_use]
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            jitter: Self::DEFAULT_JITTER,
        }
    }

    /// Upper bound of [`BackoffStrategy::delay`] for `attempt`
    #[must_use]
    pub fn ceiling(&self, attempt: u32) -> Duration {
        self.nominal(attempt).mul_f64(1.0 + self.jitter)
    }

    fn nominal(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(MAX_SHIFT);
        self.base.saturating_mul(factor).min(self.max)
    }
}

impl BackoffStrategy for ExponentialJitterBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let jitter_factor = 1.0 - self.jitter + fastrand::f64() * 2.0 * self.jitter;
        self.nominal(attempt).mul_f64(jitter_factor.max(0.0))
    }
}

/// Fetch-client curve for a configured [`BackoffKind`]
#[must_use]
pub fn for_kind(kind: BackoffKind, base: Duration) -> Box<dyn BackoffStrategy> {
    match kind {
        BackoffKind::Linear => Box::new(LinearBackoff::new(base)),
        BackoffKind::Exponential => Box::new(ExponentialBackoff::new(base, Duration::from_secs(60))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_grows_by_base() {
        let b = LinearBackoff::new(Duration::from_secs(1));
        assert_eq!(b.delay(0), Duration::from_secs(1));
        assert_eq!(b.delay(1), Duration::from_secs(2));
        assert_eq!(b.delay(4), Duration::from_secs(5));
    }

    #[test]
    fn exponential_doubles_and_caps() {
        let b = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(b.delay(0), Duration::from_secs(2));
        assert_eq!(b.delay(1), Duration::from_secs(4));
        assert_eq!(b.delay(2), Duration::from_secs(8));
        assert_eq!(b.delay(3), Duration::from_secs(10));
        assert_eq!(b.delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn jitter_stays_within_a_quarter() {
        let b = ExponentialJitterBackoff::new(Duration::from_millis(400), Duration::from_secs(30));
        for attempt in 0..6 {
            let nominal = b.nominal(attempt);
            for _ in 0..50 {
                let d = b.delay(attempt);
                assert!(d >= nominal.mul_f64(0.75), "attempt {attempt}: {d:?} < 75% of {nominal:?}");
                assert!(d <= b.ceiling(attempt));
            }
        }
    }

    #[test]
    fn kind_selects_curve() {
        let base = Duration::from_millis(100);
        assert_eq!(for_kind(BackoffKind::Linear, base).delay(2), Duration::from_millis(300));
        assert_eq!(for_kind(BackoffKind::Exponential, base).delay(2), Duration::from_millis(800));
    }
}
