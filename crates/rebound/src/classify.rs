// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Failure classification.
//!
//! Every failed attempt is classified twice: whether another attempt may follow, and whether
//! the failure counts against the circuit of the operation. By default every failure is both.
//! Policies narrow this down with category sets; a category is a short name that a
//! user-provided function derives from the failure:
//!
//! ```
//! use rebound::{FailureCategory, Policy};
//!
//! #[derive(Debug)]
//! enum StoreError {
//!     Timeout,
//!     NotFound,
//! }
//!
//! let policy = Policy::<StoreError>::builder()
//!     .categorize_with(|e| match e {
//!         StoreError::Timeout => FailureCategory::from("timeout"),
//!         StoreError::NotFound => FailureCategory::from("not_found"),
//!     })
//!     .no_retry_on(["not_found"])
//!     .build()
//!     .unwrap();
//!
//! assert!(policy.classifier().classify(&StoreError::Timeout).retryable());
//! assert!(!policy.classifier().classify(&StoreError::NotFound).retryable());
//! ```

use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use recoverable::{RecoveryInfo, RecoveryKind};

use crate::error::ConfigurationError;
use crate::fn_wrapper::define_fn_wrapper;

define_fn_wrapper!(CategoryFn<E>(Fn(cause: &E) -> FailureCategory));
define_fn_wrapper!(RetryPredicate<E>(Fn(cause: &E) -> bool));
define_fn_wrapper!(RecoveryFn<E>(Fn(cause: &E) -> RecoveryInfo));

/// Name of a family of failures, such as `timeout` or `throttled`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FailureCategory(Cow<'static, str>);

impl FailureCategory {
    /// Creates a category from any string-like value.
    #[must_use]
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    /// Returns the category name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for FailureCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for FailureCategory {
    fn from(value: &'static str) -> Self {
        Self(Cow::Borrowed(value))
    }
}

impl From<String> for FailureCategory {
    fn from(value: String) -> Self {
        Self(Cow::Owned(value))
    }
}

/// The verdict of a [`FailureClassifier`] for one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    retryable: bool,
    counts_as_circuit_failure: bool,
    retry_delay: Option<Duration>,
}

impl Classification {
    /// Returns `true` if another attempt may follow this failure.
    #[must_use]
    pub fn retryable(&self) -> bool {
        self.retryable
    }

    /// Returns `true` if this failure is recorded against the circuit of the operation.
    #[must_use]
    pub fn counts_as_circuit_failure(&self) -> bool {
        self.counts_as_circuit_failure
    }

    /// Returns the delay requested by the failure itself, which takes precedence over the
    /// backoff of the policy.
    #[must_use]
    pub fn retry_delay(&self) -> Option<Duration> {
        self.retry_delay
    }
}

/// Decides how a failure of type `E` is handled.
///
/// Built as part of a [`Policy`][crate::Policy]; see [`PolicyBuilder`][crate::PolicyBuilder] for
/// the configuration methods.
#[derive(Debug)]
pub struct FailureClassifier<E> {
    category_of: Option<CategoryFn<E>>,
    retry_on: HashSet<FailureCategory>,
    no_retry_on: HashSet<FailureCategory>,
    fail_on: HashSet<FailureCategory>,
    fallback_on: HashSet<FailureCategory>,
    retry_if: Option<RetryPredicate<E>>,
    recovery: Option<RecoveryFn<E>>,
}

impl<E> Default for FailureClassifier<E> {
    fn default() -> Self {
        Self {
            category_of: None,
            retry_on: HashSet::new(),
            no_retry_on: HashSet::new(),
            fail_on: HashSet::new(),
            fallback_on: HashSet::new(),
            retry_if: None,
            recovery: None,
        }
    }
}

impl<E> Clone for FailureClassifier<E> {
    fn clone(&self) -> Self {
        Self {
            category_of: self.category_of.clone(),
            retry_on: self.retry_on.clone(),
            no_retry_on: self.no_retry_on.clone(),
            fail_on: self.fail_on.clone(),
            fallback_on: self.fallback_on.clone(),
            retry_if: self.retry_if.clone(),
            recovery: self.recovery.clone(),
        }
    }
}

impl<E> FailureClassifier<E> {
    /// Classifies a failure.
    #[must_use]
    pub fn classify(&self, cause: &E) -> Classification {
        let category = self.category(cause);

        let denied = category.as_ref().is_some_and(|c| self.no_retry_on.contains(c));
        let mut retryable = match &category {
            _ if denied => false,
            Some(c) if !self.retry_on.is_empty() => self.retry_on.contains(c),
            _ => true,
        };

        if retryable && let Some(predicate) = &self.retry_if {
            retryable = predicate.call(cause);
        }

        // Recovery information of the failure overrides the allow set and the predicate, but
        // never the deny set.
        let mut retry_delay = None;
        if let Some(recovery) = &self.recovery {
            let info = recovery.call(cause);
            match info.kind() {
                RecoveryKind::Never => retryable = false,
                RecoveryKind::Retry | RecoveryKind::Unavailable if !denied => {
                    retryable = true;
                    retry_delay = info.get_delay();
                }
                _ => {}
            }
        }

        let counts_as_circuit_failure = match &category {
            Some(c) if !self.fail_on.is_empty() => self.fail_on.contains(c),
            _ => true,
        };

        Classification {
            retryable,
            counts_as_circuit_failure,
            retry_delay,
        }
    }

    /// Returns the category of a failure, if the policy categorizes failures.
    #[must_use]
    pub fn category(&self, cause: &E) -> Option<FailureCategory> {
        self.category_of.as_ref().map(|f| f.call(cause))
    }

    /// Returns `true` if a terminal failure should be handed to a fallback.
    #[must_use]
    pub fn applies_fallback(&self, cause: &E) -> bool {
        if self.fallback_on.is_empty() {
            return true;
        }

        self.category(cause).is_some_and(|c| self.fallback_on.contains(&c))
    }

    pub(crate) fn set_category_fn(&mut self, f: CategoryFn<E>) {
        self.category_of = Some(f);
    }

    pub(crate) fn set_retry_predicate(&mut self, f: RetryPredicate<E>) {
        self.retry_if = Some(f);
    }

    pub(crate) fn set_recovery_fn(&mut self, f: RecoveryFn<E>) {
        self.recovery = Some(f);
    }

    pub(crate) fn retry_on_mut(&mut self) -> &mut HashSet<FailureCategory> {
        &mut self.retry_on
    }

    pub(crate) fn no_retry_on_mut(&mut self) -> &mut HashSet<FailureCategory> {
        &mut self.no_retry_on
    }

    pub(crate) fn fail_on_mut(&mut self) -> &mut HashSet<FailureCategory> {
        &mut self.fail_on
    }

    pub(crate) fn fallback_on_mut(&mut self) -> &mut HashSet<FailureCategory> {
        &mut self.fallback_on
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigurationError> {
        let uses_categories =
            !(self.retry_on.is_empty() && self.no_retry_on.is_empty() && self.fail_on.is_empty() && self.fallback_on.is_empty());

        if uses_categories && self.category_of.is_none() {
            return Err(ConfigurationError::invalid(
                "category sets are configured but no category function is set",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    enum TestError {
        Timeout,
        Throttled(Duration),
        BadRequest,
        Internal,
    }

    fn categorize(e: &TestError) -> FailureCategory {
        match e {
            TestError::Timeout => "timeout".into(),
            TestError::Throttled(_) => "throttled".into(),
            TestError::BadRequest => "bad_request".into(),
            TestError::Internal => "internal".into(),
        }
    }

    fn classifier() -> FailureClassifier<TestError> {
        let mut classifier = FailureClassifier::default();
        classifier.set_category_fn(CategoryFn::new(categorize));
        classifier
    }

    #[test]
    fn default_retries_and_counts_everything() {
        let classifier = FailureClassifier::<TestError>::default();

        let c = classifier.classify(&TestError::BadRequest);
        assert!(c.retryable());
        assert!(c.counts_as_circuit_failure());
        assert_eq!(c.retry_delay(), None);
        assert_eq!(classifier.category(&TestError::BadRequest), None);
    }

    #[test]
    fn retry_on_is_allow_list() {
        let mut classifier = classifier();
        classifier.retry_on_mut().insert("timeout".into());

        assert!(classifier.classify(&TestError::Timeout).retryable());
        assert!(!classifier.classify(&TestError::Internal).retryable());
    }

    #[test]
    fn no_retry_on_wins_over_retry_on() {
        let mut classifier = classifier();
        classifier.retry_on_mut().insert("timeout".into());
        classifier.no_retry_on_mut().insert("timeout".into());

        assert!(!classifier.classify(&TestError::Timeout).retryable());
    }

    #[test]
    fn no_retry_on_alone_is_deny_list() {
        let mut classifier = classifier();
        classifier.no_retry_on_mut().insert("bad_request".into());

        assert!(!classifier.classify(&TestError::BadRequest).retryable());
        assert!(classifier.classify(&TestError::Internal).retryable());
    }

    #[test]
    fn fail_on_limits_circuit_failures() {
        let mut classifier = classifier();
        classifier.fail_on_mut().insert("internal".into());

        assert!(classifier.classify(&TestError::Internal).counts_as_circuit_failure());
        assert!(!classifier.classify(&TestError::BadRequest).counts_as_circuit_failure());
        // retryability is independent of the circuit set
        assert!(classifier.classify(&TestError::BadRequest).retryable());
    }

    #[test]
    fn retry_predicate_narrows() {
        let mut classifier = classifier();
        classifier.set_retry_predicate(RetryPredicate::new(|e| !matches!(e, TestError::Internal)));

        assert!(classifier.classify(&TestError::Timeout).retryable());
        assert!(!classifier.classify(&TestError::Internal).retryable());
    }

    #[test]
    fn retry_predicate_cannot_override_deny() {
        let mut classifier = classifier();
        classifier.no_retry_on_mut().insert("timeout".into());
        classifier.set_retry_predicate(RetryPredicate::new(|_| true));

        assert!(!classifier.classify(&TestError::Timeout).retryable());
    }

    #[test]
    fn recovery_metadata() {
        let mut classifier = classifier();
        classifier.set_recovery_fn(RecoveryFn::new(|e| match e {
            TestError::Throttled(d) => RecoveryInfo::retry().delay(*d),
            TestError::BadRequest => RecoveryInfo::never(),
            TestError::Internal => RecoveryInfo::unavailable(),
            TestError::Timeout => RecoveryInfo::unknown(),
        }));

        let throttled = classifier.classify(&TestError::Throttled(Duration::from_secs(7)));
        assert!(throttled.retryable());
        assert_eq!(throttled.retry_delay(), Some(Duration::from_secs(7)));

        assert!(!classifier.classify(&TestError::BadRequest).retryable());
        assert!(classifier.classify(&TestError::Internal).retryable());

        let unknown = classifier.classify(&TestError::Timeout);
        assert!(unknown.retryable());
        assert_eq!(unknown.retry_delay(), None);
    }

    #[test]
    fn recovery_overrides_allow_set_and_predicate() {
        let mut classifier = classifier();
        classifier.retry_on_mut().insert("timeout".into());
        classifier.set_retry_predicate(RetryPredicate::new(|_| false));
        classifier.set_recovery_fn(RecoveryFn::new(|e| match e {
            TestError::Throttled(d) => RecoveryInfo::retry().delay(*d),
            TestError::Internal => RecoveryInfo::unavailable(),
            TestError::Timeout | TestError::BadRequest => RecoveryInfo::unknown(),
        }));

        let throttled = classifier.classify(&TestError::Throttled(Duration::from_secs(2)));
        assert!(throttled.retryable());
        assert_eq!(throttled.retry_delay(), Some(Duration::from_secs(2)));
        assert!(classifier.classify(&TestError::Internal).retryable());

        // unknown leaves the decision to the predicate
        assert!(!classifier.classify(&TestError::Timeout).retryable());
    }

    #[test]
    fn recovery_cannot_override_deny() {
        let mut classifier = classifier();
        classifier.no_retry_on_mut().insert("throttled".into());
        classifier.set_recovery_fn(RecoveryFn::new(|_| RecoveryInfo::retry().delay(Duration::from_secs(1))));

        let throttled = classifier.classify(&TestError::Throttled(Duration::from_secs(1)));
        assert!(!throttled.retryable());
        assert_eq!(throttled.retry_delay(), None);
    }

    #[test]
    fn fallback_on() {
        let mut classifier = classifier();
        assert!(classifier.applies_fallback(&TestError::Internal));

        classifier.fallback_on_mut().insert("timeout".into());
        assert!(classifier.applies_fallback(&TestError::Timeout));
        assert!(!classifier.applies_fallback(&TestError::Internal));
    }

    #[test]
    fn validate_requires_category_fn() {
        let mut classifier = FailureClassifier::<TestError>::default();
        classifier.validate().unwrap();

        classifier.fail_on_mut().insert("timeout".into());
        classifier.validate().unwrap_err();

        classifier.set_category_fn(CategoryFn::new(categorize));
        classifier.validate().unwrap();
    }

    #[test]
    fn category_display() {
        let category = FailureCategory::new(String::from("throttled"));
        assert_eq!(category.to_string(), "throttled");
        assert_eq!(category.as_str(), "throttled");
        assert_eq!(category, FailureCategory::from("throttled"));
    }
}
