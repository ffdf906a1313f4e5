// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-operation circuit breaking.
//!
//! Every operation key with circuit breaking enabled owns one [`CircuitBreaker`] that moves
//! between three states:
//!
//! - **Closed**: every call is admitted and its outcome recorded in a sliding window. Once the
//!   window holds at least `minimum_calls` outcomes and the failure rate reaches the threshold,
//!   the circuit opens.
//! - **Open**: calls are rejected without invoking the operation until `open_duration` has
//!   elapsed. The next admission then moves the circuit to half-open.
//! - **Half-open**: up to `half_open_trial_permits` concurrent trial calls are admitted. A single
//!   trial failure reopens the circuit; once every permit has produced a success, the circuit
//!   closes with an empty window.

mod breaker;
mod registry;
mod window;

use std::fmt::{self, Display, Formatter};
use std::time::Duration;

pub(crate) use breaker::{Admission, CircuitBreaker, Permit, Transition};
pub(crate) use registry::CircuitRegistry;
pub(crate) use window::ExecutionResult;

use crate::constants::{
    DEFAULT_FAILURE_RATE_THRESHOLD, DEFAULT_HALF_OPEN_TRIAL_PERMITS, DEFAULT_MINIMUM_CALLS, DEFAULT_OPEN_DURATION,
    DEFAULT_WINDOW_SIZE,
};
use crate::error::ConfigurationError;

/// State of the circuit of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected.
    Open,
    /// A limited number of trial calls is admitted.
    HalfOpen,
}

impl CircuitState {
    /// Returns a short `snake_case` name of the state, suitable for telemetry.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl Display for CircuitState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How many recent outcomes the failure rate is computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlidingWindow {
    /// The last `n` outcomes.
    Count(u32),
    /// Outcomes recorded within the given duration.
    Time(Duration),
}

/// Circuit breaking configuration of a policy.
///
/// ```
/// use std::time::Duration;
///
/// use rebound::{CircuitOptions, SlidingWindow};
///
/// let options = CircuitOptions::default()
///     .failure_rate_threshold(0.5)
///     .sliding_window(SlidingWindow::Time(Duration::from_secs(60)))
///     .minimum_calls(20)
///     .open_duration(Duration::from_secs(10))
///     .half_open_trial_permits(3);
///
/// assert_eq!(options.get_half_open_trial_permits(), 3);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitOptions {
    failure_rate_threshold: f64,
    sliding_window: SlidingWindow,
    minimum_calls: u32,
    open_duration: Duration,
    half_open_trial_permits: u32,
}

impl Default for CircuitOptions {
    fn default() -> Self {
        Self {
            failure_rate_threshold: DEFAULT_FAILURE_RATE_THRESHOLD,
            sliding_window: SlidingWindow::Count(DEFAULT_WINDOW_SIZE),
            minimum_calls: DEFAULT_MINIMUM_CALLS,
            open_duration: DEFAULT_OPEN_DURATION,
            half_open_trial_permits: DEFAULT_HALF_OPEN_TRIAL_PERMITS,
        }
    }
}

impl CircuitOptions {
    /// Failure rate in `[0.0, 1.0]` at which the circuit opens. Defaults to `0.5`.
    #[must_use]
    pub fn failure_rate_threshold(mut self, threshold: f64) -> Self {
        self.failure_rate_threshold = threshold;
        self
    }

    /// Window the failure rate is computed over. Defaults to the last 10 outcomes.
    #[must_use]
    pub fn sliding_window(mut self, window: SlidingWindow) -> Self {
        self.sliding_window = window;
        self
    }

    /// Number of outcomes the window must hold before the circuit may open. Defaults to `5`.
    #[must_use]
    pub fn minimum_calls(mut self, minimum_calls: u32) -> Self {
        self.minimum_calls = minimum_calls;
        self
    }

    /// Time the circuit stays open before admitting trial calls. Defaults to 30 seconds.
    #[must_use]
    pub fn open_duration(mut self, duration: Duration) -> Self {
        self.open_duration = duration;
        self
    }

    /// Number of concurrent trial calls admitted while half-open. Defaults to `1`.
    #[must_use]
    pub fn half_open_trial_permits(mut self, permits: u32) -> Self {
        self.half_open_trial_permits = permits;
        self
    }

    /// Returns the failure rate threshold.
    #[must_use]
    pub fn get_failure_rate_threshold(&self) -> f64 {
        self.failure_rate_threshold
    }

    /// Returns the sliding window.
    #[must_use]
    pub fn get_sliding_window(&self) -> SlidingWindow {
        self.sliding_window
    }

    /// Returns the minimum number of calls in the window.
    #[must_use]
    pub fn get_minimum_calls(&self) -> u32 {
        self.minimum_calls
    }

    /// Returns the open duration.
    #[must_use]
    pub fn get_open_duration(&self) -> Duration {
        self.open_duration
    }

    /// Returns the number of half-open trial permits.
    #[must_use]
    pub fn get_half_open_trial_permits(&self) -> u32 {
        self.half_open_trial_permits
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigurationError> {
        if !(0.0..=1.0).contains(&self.failure_rate_threshold) {
            return Err(ConfigurationError::invalid(format!(
                "failure_rate_threshold must be within [0.0, 1.0], got {}",
                self.failure_rate_threshold
            )));
        }

        if self.minimum_calls == 0 {
            return Err(ConfigurationError::invalid("minimum_calls must be at least 1"));
        }

        if self.half_open_trial_permits == 0 {
            return Err(ConfigurationError::invalid("half_open_trial_permits must be at least 1"));
        }

        match self.sliding_window {
            SlidingWindow::Count(0) => Err(ConfigurationError::invalid("count window must hold at least 1 outcome")),
            SlidingWindow::Count(size) if size < self.minimum_calls => Err(ConfigurationError::invalid(format!(
                "minimum_calls ({}) exceeds the window size ({size}), the circuit could never open",
                self.minimum_calls
            ))),
            SlidingWindow::Time(duration) if duration.is_zero() => {
                Err(ConfigurationError::invalid("time window must be longer than zero"))
            }
            _ => Ok(()),
        }
    }
}
