// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Deserializable policy configuration.
//!
//! Durations use [`jiff::SignedDuration`], so both ISO 8601 (`"PT0.5S"`) and the friendly
//! format (`"500ms"`) are accepted. Unset fields keep the defaults of [`PolicyBuilder`].
//!
//! ```
//! use rebound::RegistryConfig;
//!
//! let config: RegistryConfig = serde_json::from_str(
//!     r#"{
//!         "operations": {
//!             "inventory.lookup": {
//!                 "max_attempts": 4,
//!                 "backoff": { "kind": "exponential", "base": "PT0.1S", "multiplier": 2.0 },
//!                 "jitter": "equal",
//!                 "circuit": { "failure_rate_threshold": 0.25, "open_duration": "PT10S" }
//!             }
//!         }
//!     }"#,
//! )
//! .unwrap();
//!
//! let registry = config.into_registry::<std::io::Error>(|_, builder| builder).unwrap();
//! let policy = registry.resolve(&"inventory.lookup".into()).unwrap();
//!
//! assert_eq!(policy.max_attempts(), 4);
//! assert!(policy.circuit_enabled());
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use jiff::SignedDuration;
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::{Backoff, CircuitOptions, Jitter, OperationKey, PolicyBuilder, PolicyRegistry, SlidingWindow};

/// Configuration of a single policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
#[non_exhaustive]
pub struct PolicyConfig {
    /// Total number of attempts, the first one included.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,

    /// Delay between attempts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff: Option<BackoffConfig>,

    /// Randomization applied to the backoff delay.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jitter: Option<Jitter>,

    /// Time after which no further attempt is started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_budget: Option<SignedDuration>,

    /// Categories that may be retried. Empty means every category.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub retry_on: Vec<String>,

    /// Categories that are never retried.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub no_retry_on: Vec<String>,

    /// Categories that count against the circuit. Empty means every category.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fail_on: Vec<String>,

    /// Categories that are routed to a fallback. Empty means every category.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fallback_on: Vec<String>,

    /// Circuit breaking; disabled when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit: Option<CircuitConfig>,
}

/// Configuration of the delay between attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
#[non_exhaustive]
pub enum BackoffConfig {
    /// Retry immediately.
    None,

    /// The same delay before every retry.
    Fixed {
        /// The delay.
        delay: SignedDuration,
    },

    /// `base * multiplier^(attempt - 1)`, optionally capped.
    Exponential {
        /// Delay before the first retry.
        base: SignedDuration,
        /// Growth factor, at least `1.0`.
        multiplier: f64,
        /// Upper bound of any single delay.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_delay: Option<SignedDuration>,
    },
}

/// Configuration of the circuit of a policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
#[non_exhaustive]
pub struct CircuitConfig {
    /// Failure rate in `[0.0, 1.0]` at which the circuit opens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_rate_threshold: Option<f64>,

    /// Outcomes the failure rate is computed over.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sliding_window: Option<WindowConfig>,

    /// Outcomes required before the failure rate is evaluated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum_calls: Option<u32>,

    /// Time an open circuit rejects calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_duration: Option<SignedDuration>,

    /// Concurrent trial calls admitted while half-open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub half_open_trial_permits: Option<u32>,
}

/// Configuration of a sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum WindowConfig {
    /// The last `size` outcomes.
    Count {
        /// Number of outcomes.
        size: u32,
    },

    /// Outcomes recorded within `duration`.
    Time {
        /// Window length.
        duration: SignedDuration,
    },
}

/// Policies of many operations, keyed by operation key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
#[non_exhaustive]
pub struct RegistryConfig {
    /// Policy of every operation.
    pub operations: BTreeMap<String, PolicyConfig>,
}

impl RegistryConfig {
    /// Builds a registry from the configured policies.
    ///
    /// `customize` sees the builder of every operation before it is built, which is where
    /// behavior that cannot be expressed as data is added, such as
    /// [`categorize_with`][PolicyBuilder::categorize_with] or
    /// [`attempt_timeout`][PolicyBuilder::attempt_timeout].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Invalid`] naming the operation whose configuration is invalid.
    pub fn into_registry<E>(
        self,
        mut customize: impl FnMut(&OperationKey, PolicyBuilder<E>) -> PolicyBuilder<E>,
    ) -> Result<PolicyRegistry<E>, ConfigurationError> {
        self.operations
            .into_iter()
            .try_fold(PolicyRegistry::new(), |registry, (name, config)| {
                let key = OperationKey::new(name);
                let policy = PolicyBuilder::try_from(config)
                    .map(|builder| customize(&key, builder))
                    .and_then(PolicyBuilder::build)
                    .map_err(|e| match e {
                        ConfigurationError::Invalid(message) => ConfigurationError::invalid(format!("operation '{key}': {message}")),
                        other => other,
                    })?;

                registry.register(key, policy)
            })
    }
}

impl<E> TryFrom<PolicyConfig> for PolicyBuilder<E> {
    type Error = ConfigurationError;

    fn try_from(config: PolicyConfig) -> Result<Self, Self::Error> {
        let mut builder = Self::default();

        if let Some(max_attempts) = config.max_attempts {
            builder = builder.max_attempts(max_attempts);
        }
        if let Some(backoff) = config.backoff {
            builder = builder.backoff(Backoff::try_from(backoff)?);
        }
        if let Some(jitter) = config.jitter {
            builder = builder.jitter(jitter);
        }
        if let Some(budget) = config.call_budget {
            builder = builder.call_budget(to_duration("call_budget", budget)?);
        }
        if let Some(circuit) = config.circuit {
            builder = builder.circuit(CircuitOptions::try_from(circuit)?);
        }

        Ok(builder
            .retry_on(config.retry_on)
            .no_retry_on(config.no_retry_on)
            .fail_on(config.fail_on)
            .fallback_on(config.fallback_on))
    }
}

impl TryFrom<BackoffConfig> for Backoff {
    type Error = ConfigurationError;

    fn try_from(config: BackoffConfig) -> Result<Self, Self::Error> {
        Ok(match config {
            BackoffConfig::None => Self::none(),
            BackoffConfig::Fixed { delay } => Self::fixed(to_duration("backoff.delay", delay)?),
            BackoffConfig::Exponential {
                base,
                multiplier,
                max_delay,
            } => {
                let backoff = Self::exponential(to_duration("backoff.base", base)?, multiplier);
                match max_delay {
                    Some(max) => backoff.max_delay(to_duration("backoff.max_delay", max)?),
                    None => backoff,
                }
            }
        })
    }
}

impl TryFrom<CircuitConfig> for CircuitOptions {
    type Error = ConfigurationError;

    fn try_from(config: CircuitConfig) -> Result<Self, Self::Error> {
        let mut options = Self::default();

        if let Some(threshold) = config.failure_rate_threshold {
            options = options.failure_rate_threshold(threshold);
        }
        if let Some(window) = config.sliding_window {
            options = options.sliding_window(match window {
                WindowConfig::Count { size } => SlidingWindow::Count(size),
                WindowConfig::Time { duration } => SlidingWindow::Time(to_duration("circuit.sliding_window.duration", duration)?),
            });
        }
        if let Some(minimum_calls) = config.minimum_calls {
            options = options.minimum_calls(minimum_calls);
        }
        if let Some(open_duration) = config.open_duration {
            options = options.open_duration(to_duration("circuit.open_duration", open_duration)?);
        }
        if let Some(permits) = config.half_open_trial_permits {
            options = options.half_open_trial_permits(permits);
        }

        Ok(options)
    }
}

fn to_duration(field: &str, value: SignedDuration) -> Result<Duration, ConfigurationError> {
    Duration::try_from(value).map_err(|error| ConfigurationError::invalid(format!("{field} must not be negative, got {value}: {error}")))
}
