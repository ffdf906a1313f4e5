// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::cmp::min;
use std::time::Duration;

use crate::error::ConfigurationError;
use crate::fn_wrapper::define_fn_wrapper;
use crate::rnd::RandomSource;

define_fn_wrapper!(CustomBackoffFn(Fn(attempt: u32) -> Duration));

/// Computes the delay to wait after a failed attempt.
///
/// Attempts are numbered from 1; `delay_for(1)` is the wait between the first and the
/// second attempt. Attempt `0` is treated as attempt `1`.
///
/// ```
/// use std::time::Duration;
///
/// use rebound::Backoff;
///
/// let backoff = Backoff::exponential(Duration::from_millis(100), 2.0);
///
/// assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
/// assert_eq!(backoff.delay_for(2), Duration::from_millis(200));
/// assert_eq!(backoff.delay_for(3), Duration::from_millis(400));
/// ```
#[derive(Debug, Clone)]
pub struct Backoff {
    kind: BackoffKind,
    max_delay: Option<Duration>,
}

#[derive(Debug, Clone)]
enum BackoffKind {
    Fixed(Duration),
    Exponential { base: Duration, multiplier: f64 },
    Custom(CustomBackoffFn),
}

impl Backoff {
    /// Waits the same `delay` after every attempt.
    #[must_use]
    pub fn fixed(delay: Duration) -> Self {
        Self {
            kind: BackoffKind::Fixed(delay),
            max_delay: None,
        }
    }

    /// Retries immediately.
    #[must_use]
    pub fn none() -> Self {
        Self::fixed(Duration::ZERO)
    }

    /// Waits `base * multiplier^(attempt - 1)`.
    ///
    /// The multiplier must be finite and at least `1.0`, which [`PolicyBuilder::build`][crate::PolicyBuilder::build]
    /// verifies.
    #[must_use]
    pub fn exponential(base: Duration, multiplier: f64) -> Self {
        Self {
            kind: BackoffKind::Exponential { base, multiplier },
            max_delay: None,
        }
    }

    /// Delegates the delay computation to a user function of the attempt number.
    #[must_use]
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        Self {
            kind: BackoffKind::Custom(CustomBackoffFn::new(f)),
            max_delay: None,
        }
    }

    /// Caps every computed delay at `max_delay`.
    #[must_use]
    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Returns the delay to wait after the given failed attempt, before jitter.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);

        let delay = match &self.kind {
            BackoffKind::Fixed(delay) => *delay,
            BackoffKind::Exponential { base, multiplier } => {
                let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
                scale_saturating(*base, multiplier.powi(exponent))
            }
            BackoffKind::Custom(f) => f.call(attempt),
        };

        clamp_to_max(delay, self.max_delay)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigurationError> {
        if let BackoffKind::Exponential { multiplier, .. } = self.kind
            && !(multiplier.is_finite() && multiplier >= 1.0)
        {
            return Err(ConfigurationError::invalid(format!(
                "exponential backoff multiplier must be a finite number >= 1.0, got {multiplier}"
            )));
        }

        Ok(())
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::fixed(crate::constants::DEFAULT_DELAY)
    }
}

/// Randomization applied on top of the computed backoff delay.
///
/// Jitter only ever shortens a delay, which keeps the configured backoff an upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Jitter {
    /// The computed delay is used as is.
    #[default]
    None,

    /// Uniform in `[0, delay]`.
    Full,

    /// `delay / 2` plus a uniform value in `[0, delay / 2]`.
    Equal,
}

impl Jitter {
    /// Applies the jitter to `delay` using `rnd` as the source of randomness.
    #[must_use]
    pub fn apply(self, delay: Duration, rnd: &RandomSource) -> Duration {
        match self {
            Self::None => delay,
            Self::Full => scale_saturating(delay, rnd.next_f64()),
            Self::Equal => {
                let half = delay / 2;
                half.saturating_add(scale_saturating(delay - half, rnd.next_f64()))
            }
        }
    }
}

fn clamp_to_max(d: Duration, max: Option<Duration>) -> Duration {
    max.map_or(d, |m| min(d, m))
}

#[expect(clippy::cast_precision_loss, reason = "only used as an upper bound")]
const MAX_NANOS: f64 = u64::MAX as f64;

/// Multiplies `base` by `factor`, rounding to whole nanoseconds and saturating at [`Duration::MAX`].
fn scale_saturating(base: Duration, factor: f64) -> Duration {
    #[expect(clippy::cast_precision_loss, reason = "sub-nanosecond precision is irrelevant for delays")]
    let nanos = (base.as_nanos() as f64 * factor).round();

    if nanos.is_nan() || nanos <= 0.0 {
        return Duration::ZERO;
    }

    if nanos >= MAX_NANOS {
        return Duration::MAX;
    }

    #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss, reason = "range checked above")]
    let nanos = nanos as u64;
    Duration::from_nanos(nanos)
}
