// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Immutable per-operation resilience configuration.

pub(crate) mod backoff;
#[cfg(feature = "serde")]
pub(crate) mod config;
pub(crate) mod registry;

use std::time::Duration;

use recoverable::Recovery;

use crate::circuit::CircuitOptions;
use crate::classify::{CategoryFn, FailureCategory, FailureClassifier, RecoveryFn, RetryPredicate};
use crate::constants::DEFAULT_MAX_ATTEMPTS;
use crate::error::ConfigurationError;
use crate::fn_wrapper::define_fn_wrapper;
use crate::{Backoff, Jitter, RandomSource};

define_fn_wrapper!(TimeoutErrorFn<E>(Fn(timeout: Duration) -> E));

/// Retry and circuit breaking behavior of one logical operation.
///
/// A policy is built once, typically at startup, and then shared read-only by every caller of
/// the operation. Failures are of type `E`, the error type of the wrapped operation.
///
/// ```
/// use std::time::Duration;
///
/// use rebound::{Backoff, CircuitOptions, Jitter, Policy};
///
/// let policy = Policy::<std::io::Error>::builder()
///     .max_attempts(4)
///     .backoff(Backoff::exponential(Duration::from_millis(50), 2.0).max_delay(Duration::from_secs(1)))
///     .jitter(Jitter::Equal)
///     .circuit(CircuitOptions::default().failure_rate_threshold(0.25))
///     .build()
///     .unwrap();
///
/// assert_eq!(policy.max_attempts(), 4);
/// assert!(policy.circuit_enabled());
/// ```
#[derive(Debug)]
pub struct Policy<E> {
    max_attempts: u32,
    backoff: Backoff,
    jitter: Jitter,
    rnd: RandomSource,
    call_budget: Option<Duration>,
    attempt_timeout: Option<AttemptTimeout<E>>,
    classifier: FailureClassifier<E>,
    circuit: Option<CircuitOptions>,
}

#[derive(Debug)]
struct AttemptTimeout<E> {
    timeout: Duration,
    error: TimeoutErrorFn<E>,
}

impl<E> Clone for AttemptTimeout<E> {
    fn clone(&self) -> Self {
        Self {
            timeout: self.timeout,
            error: self.error.clone(),
        }
    }
}

impl<E> Clone for Policy<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            backoff: self.backoff.clone(),
            jitter: self.jitter,
            rnd: self.rnd.clone(),
            call_budget: self.call_budget,
            attempt_timeout: self.attempt_timeout.clone(),
            classifier: self.classifier.clone(),
            circuit: self.circuit.clone(),
        }
    }
}

impl<E> Default for Policy<E> {
    fn default() -> Self {
        PolicyBuilder::default().into_policy()
    }
}

impl<E> Policy<E> {
    /// Starts building a policy with the defaults: 3 attempts, a fixed 100ms backoff, no
    /// jitter and no circuit.
    #[must_use]
    pub fn builder() -> PolicyBuilder<E> {
        PolicyBuilder::default()
    }

    /// Returns the maximum number of attempts, the first call included.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the backoff used between attempts.
    #[must_use]
    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Returns the jitter applied on top of the backoff.
    #[must_use]
    pub fn jitter(&self) -> Jitter {
        self.jitter
    }

    /// Returns the total time a call may spend retrying, if limited.
    #[must_use]
    pub fn call_budget(&self) -> Option<Duration> {
        self.call_budget
    }

    /// Returns the time limit of a single attempt, if any.
    #[must_use]
    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout.as_ref().map(|t| t.timeout)
    }

    /// Returns the failure classifier.
    #[must_use]
    pub fn classifier(&self) -> &FailureClassifier<E> {
        &self.classifier
    }

    /// Returns the circuit configuration, if circuit breaking is enabled.
    #[must_use]
    pub fn circuit(&self) -> Option<&CircuitOptions> {
        self.circuit.as_ref()
    }

    /// Returns `true` if calls are gated by a circuit breaker.
    #[must_use]
    pub fn circuit_enabled(&self) -> bool {
        self.circuit.is_some()
    }

    /// Returns the delay to wait after the given failed attempt, jitter included.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.jitter.apply(self.backoff.delay_for(attempt), &self.rnd)
    }

    /// Returns the attempt timeout together with the constructor of the timeout failure.
    pub(crate) fn timeout_settings(&self) -> Option<(Duration, &TimeoutErrorFn<E>)> {
        self.attempt_timeout.as_ref().map(|t| (t.timeout, &t.error))
    }
}

/// Builder for [`Policy`].
///
/// Values are validated by [`build`][PolicyBuilder::build].
#[derive(Debug)]
pub struct PolicyBuilder<E> {
    max_attempts: u32,
    backoff: Backoff,
    jitter: Jitter,
    rnd: RandomSource,
    call_budget: Option<Duration>,
    attempt_timeout: Option<AttemptTimeout<E>>,
    classifier: FailureClassifier<E>,
    circuit: Option<CircuitOptions>,
}

impl<E> Default for PolicyBuilder<E> {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::default(),
            jitter: Jitter::None,
            rnd: RandomSource::default(),
            call_budget: None,
            attempt_timeout: None,
            classifier: FailureClassifier::default(),
            circuit: None,
        }
    }
}

impl<E> PolicyBuilder<E> {
    /// Sets the maximum number of attempts, the first call included. `1` disables retries.
    #[must_use]
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the backoff used between attempts.
    #[must_use]
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the jitter applied on top of the backoff.
    #[must_use]
    pub fn jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Replaces the random source used for jitter.
    #[must_use]
    pub fn random_source(mut self, rnd: RandomSource) -> Self {
        self.rnd = rnd;
        self
    }

    /// Limits the total time a call may spend retrying.
    ///
    /// No further attempt is made once the elapsed time, plus the next delay, exceeds the budget.
    /// The last failure is returned instead.
    #[must_use]
    pub fn call_budget(mut self, budget: Duration) -> Self {
        self.call_budget = Some(budget);
        self
    }

    /// Limits the duration of every attempt.
    ///
    /// An attempt that does not finish in time is abandoned and fails with the error produced by
    /// `error`. That error is classified like any other failure.
    #[must_use]
    pub fn attempt_timeout<F>(mut self, timeout: Duration, error: F) -> Self
    where
        F: Fn(Duration) -> E + Send + Sync + 'static,
    {
        self.attempt_timeout = Some(AttemptTimeout {
            timeout,
            error: TimeoutErrorFn::new(error),
        });
        self
    }

    /// Sets the function that derives a [`FailureCategory`] from a failure.
    ///
    /// Required when any category set is configured.
    #[must_use]
    pub fn categorize_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&E) -> FailureCategory + Send + Sync + 'static,
    {
        self.classifier.set_category_fn(CategoryFn::new(f));
        self
    }

    /// Only failures of these categories are retried.
    #[must_use]
    pub fn retry_on<I>(mut self, categories: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<FailureCategory>,
    {
        self.classifier.retry_on_mut().extend(categories.into_iter().map(Into::into));
        self
    }

    /// Failures of these categories are never retried, even when listed in [`retry_on`][Self::retry_on].
    #[must_use]
    pub fn no_retry_on<I>(mut self, categories: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<FailureCategory>,
    {
        self.classifier.no_retry_on_mut().extend(categories.into_iter().map(Into::into));
        self
    }

    /// Only failures of these categories count against the circuit.
    #[must_use]
    pub fn fail_on<I>(mut self, categories: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<FailureCategory>,
    {
        self.classifier.fail_on_mut().extend(categories.into_iter().map(Into::into));
        self
    }

    /// Only terminal failures of these categories are handed to a fallback.
    #[must_use]
    pub fn fallback_on<I>(mut self, categories: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<FailureCategory>,
    {
        self.classifier.fallback_on_mut().extend(categories.into_iter().map(Into::into));
        self
    }

    /// Adds a predicate that must hold for a failure to be retried.
    #[must_use]
    pub fn retry_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.classifier.set_retry_predicate(RetryPredicate::new(predicate));
        self
    }

    /// Enables circuit breaking with the given options.
    #[must_use]
    pub fn circuit(mut self, options: CircuitOptions) -> Self {
        self.circuit = Some(options);
        self
    }

    /// Disables circuit breaking.
    #[must_use]
    pub fn no_circuit(mut self) -> Self {
        self.circuit = None;
        self
    }

    /// Validates the configuration and builds the policy.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Invalid`] when a value is out of range or when category sets
    /// are configured without a category function.
    pub fn build(self) -> Result<Policy<E>, ConfigurationError> {
        if self.max_attempts == 0 {
            return Err(ConfigurationError::invalid("max_attempts must be at least 1"));
        }

        if let Some(t) = &self.attempt_timeout
            && t.timeout.is_zero()
        {
            return Err(ConfigurationError::invalid("attempt timeout must be greater than zero"));
        }

        self.backoff.validate()?;
        self.classifier.validate()?;

        if let Some(circuit) = &self.circuit {
            circuit.validate()?;
        }

        Ok(self.into_policy())
    }

    fn into_policy(self) -> Policy<E> {
        Policy {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            jitter: self.jitter,
            rnd: self.rnd,
            call_budget: self.call_budget,
            attempt_timeout: self.attempt_timeout,
            classifier: self.classifier,
            circuit: self.circuit,
        }
    }
}

impl<E: Recovery + 'static> PolicyBuilder<E> {
    /// Lets the failure describe its own recoverability through [`Recovery`].
    ///
    /// [`RecoveryKind::Never`][recoverable::RecoveryKind::Never] failures are not retried.
    /// `Retry` and `Unavailable` failures are retried even when [`retry_on`][Self::retry_on] or
    /// [`retry_if`][Self::retry_if] would stop them, unless their category is listed in
    /// [`no_retry_on`][Self::no_retry_on]. A delay carried by the
    /// [`RecoveryInfo`][recoverable::RecoveryInfo] replaces the backoff delay.
    #[must_use]
    pub fn honor_recovery(mut self) -> Self {
        self.classifier.set_recovery_fn(RecoveryFn::new(E::recovery));
        self
    }
}

#[cfg(test)]
mod tests {
    use recoverable::RecoveryInfo;

    use super::*;
    use crate::SlidingWindow;

    #[derive(Debug)]
    struct Busy(Option<Duration>);

    impl Recovery for Busy {
        fn recovery(&self) -> RecoveryInfo {
            match self.0 {
                Some(d) => RecoveryInfo::retry().delay(d),
                None => RecoveryInfo::never(),
            }
        }
    }

    #[test]
    fn defaults() {
        let policy = Policy::<String>::builder().build().unwrap();

        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(100));
        assert_eq!(policy.jitter(), Jitter::None);
        assert_eq!(policy.call_budget(), None);
        assert_eq!(policy.attempt_timeout(), None);
        assert!(!policy.circuit_enabled());
        assert!(policy.circuit().is_none());

        let default = Policy::<String>::default();
        assert_eq!(default.max_attempts(), policy.max_attempts());
    }

    #[test]
    fn zero_attempts_rejected() {
        let error = Policy::<String>::builder().max_attempts(0).build().unwrap_err();
        assert!(matches!(error, ConfigurationError::Invalid(_)));
    }

    #[test]
    fn single_attempt_allowed() {
        let policy = Policy::<String>::builder().max_attempts(1).build().unwrap();
        assert_eq!(policy.max_attempts(), 1);
    }

    #[test]
    fn invalid_backoff_rejected() {
        Policy::<String>::builder()
            .backoff(Backoff::exponential(Duration::from_millis(10), 0.0))
            .build()
            .unwrap_err();
    }

    #[test]
    fn invalid_circuit_rejected() {
        Policy::<String>::builder()
            .circuit(CircuitOptions::default().failure_rate_threshold(1.5))
            .build()
            .unwrap_err();

        Policy::<String>::builder()
            .circuit(CircuitOptions::default().sliding_window(SlidingWindow::Count(3)).minimum_calls(4))
            .build()
            .unwrap_err();
    }

    #[test]
    fn zero_timeout_rejected() {
        Policy::<String>::builder()
            .attempt_timeout(Duration::ZERO, |_| "timeout".to_string())
            .build()
            .unwrap_err();
    }

    #[test]
    fn category_sets_require_category_fn() {
        let error = Policy::<String>::builder().retry_on(["timeout"]).build().unwrap_err();
        assert!(error.to_string().contains("category"));

        Policy::<String>::builder()
            .categorize_with(|e: &String| FailureCategory::new(e.clone()))
            .retry_on(["timeout"])
            .build()
            .unwrap();
    }

    #[test]
    fn jitter_uses_random_source() {
        let policy = Policy::<String>::builder()
            .backoff(Backoff::fixed(Duration::from_millis(200)))
            .jitter(Jitter::Full)
            .random_source(RandomSource::fixed(0.5))
            .build()
            .unwrap();

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
    }

    #[test]
    fn timeout_error_constructor() {
        let policy = Policy::<String>::builder()
            .attempt_timeout(Duration::from_secs(2), |d| format!("timed out after {d:?}"))
            .build()
            .unwrap();

        assert_eq!(policy.attempt_timeout(), Some(Duration::from_secs(2)));

        let (timeout, error) = policy.timeout_settings().unwrap();
        assert_eq!(error.call(timeout), "timed out after 2s");
    }

    #[test]
    fn honor_recovery() {
        let policy = Policy::<Busy>::builder().honor_recovery().build().unwrap();

        let c = policy.classifier().classify(&Busy(Some(Duration::from_secs(3))));
        assert!(c.retryable());
        assert_eq!(c.retry_delay(), Some(Duration::from_secs(3)));

        assert!(!policy.classifier().classify(&Busy(None)).retryable());
    }

    #[test]
    fn honor_recovery_wins_over_retry_predicate() {
        let policy = Policy::<Busy>::builder()
            .retry_if(|_| false)
            .honor_recovery()
            .build()
            .unwrap();

        let c = policy.classifier().classify(&Busy(Some(Duration::from_millis(250))));
        assert!(c.retryable());
        assert_eq!(c.retry_delay(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn no_circuit_disables() {
        let policy = Policy::<String>::builder()
            .circuit(CircuitOptions::default())
            .no_circuit()
            .build()
            .unwrap();
        assert!(!policy.circuit_enabled());
    }

    #[test]
    fn clone_keeps_configuration() {
        let policy = Policy::<String>::builder()
            .max_attempts(7)
            .call_budget(Duration::from_secs(9))
            .build()
            .unwrap();

        let clone = policy.clone();
        assert_eq!(clone.max_attempts(), 7);
        assert_eq!(clone.call_budget(), Some(Duration::from_secs(9)));
    }

    #[test]
    fn policy_is_send_and_sync() {
        static_assertions::assert_impl_all!(Policy<String>: Send, Sync);
        static_assertions::assert_impl_all!(Policy<std::rc::Rc<u8>>: Send, Sync);
    }
}
