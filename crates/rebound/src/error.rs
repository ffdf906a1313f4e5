// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::borrow::Cow;

use crate::OperationKey;

/// A policy could not be built, registered or resolved.
///
/// Configuration errors surface at startup or when an operation key is resolved. They are
/// never produced from inside the retry loop.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// No policy is registered for the operation.
    #[error("no policy is registered for operation '{0}'")]
    UnknownOperation(OperationKey),

    /// A policy is already registered for the operation.
    #[error("a policy is already registered for operation '{0}'")]
    DuplicateOperation(OperationKey),

    /// A policy value is out of range or inconsistent.
    #[error("invalid policy: {0}")]
    Invalid(Cow<'static, str>),
}

impl ConfigurationError {
    pub(crate) fn invalid(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Invalid(message.into())
    }
}

/// The circuit of an operation rejected the call without invoking it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("circuit for operation '{key}' is open")]
pub struct CircuitOpenError {
    key: OperationKey,
}

impl CircuitOpenError {
    pub(crate) fn new(key: OperationKey) -> Self {
        Self { key }
    }

    /// Returns the key of the operation whose circuit rejected the call.
    #[must_use]
    pub fn key(&self) -> &OperationKey {
        &self.key
    }
}

/// Terminal error of a resilient call.
///
/// The failure of the wrapped operation is preserved unchanged in [`ResilienceError::Operation`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ResilienceError<E> {
    /// The operation failed and no further attempt was made.
    #[error("operation failed: {cause}")]
    Operation {
        /// The failure returned by the last attempt.
        cause: E,
        /// Whether the failure was classified as retryable. A retryable failure ends the call
        /// only when the attempt or time budget is exhausted.
        retryable: bool,
    },

    /// The circuit rejected an attempt.
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    /// The caller cancelled the call.
    #[error("operation was cancelled by the caller")]
    Cancelled,

    /// The operation could not be resolved to a policy.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

impl<E> ResilienceError<E> {
    /// Returns the failure of the operation, if the call ended with one.
    #[must_use]
    pub fn cause(&self) -> Option<&E> {
        match self {
            Self::Operation { cause, .. } => Some(cause),
            _ => None,
        }
    }

    /// Consumes the error and returns the failure of the operation, if any.
    #[must_use]
    pub fn into_cause(self) -> Option<E> {
        match self {
            Self::Operation { cause, .. } => Some(cause),
            _ => None,
        }
    }

    /// Returns `true` if the circuit rejected the call.
    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen(_))
    }

    /// Returns `true` if the caller cancelled the call.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_messages() {
        assert_eq!(
            ConfigurationError::UnknownOperation(OperationKey::from("a.b")).to_string(),
            "no policy is registered for operation 'a.b'"
        );
        assert_eq!(
            ConfigurationError::DuplicateOperation(OperationKey::from("a.b")).to_string(),
            "a policy is already registered for operation 'a.b'"
        );
        assert_eq!(
            ConfigurationError::invalid("max_attempts must be at least 1").to_string(),
            "invalid policy: max_attempts must be at least 1"
        );
    }

    #[test]
    fn circuit_open_message() {
        let error = CircuitOpenError::new(OperationKey::from("payments.charge"));
        assert_eq!(error.to_string(), "circuit for operation 'payments.charge' is open");
        assert_eq!(error.key().as_str(), "payments.charge");
    }

    #[test]
    fn resilience_error_accessors() {
        let error: ResilienceError<String> = ResilienceError::Operation {
            cause: "boom".to_string(),
            retryable: true,
        };
        assert_eq!(error.to_string(), "operation failed: boom");
        assert_eq!(error.cause().map(String::as_str), Some("boom"));
        assert_eq!(error.into_cause().as_deref(), Some("boom"));

        let error: ResilienceError<String> = CircuitOpenError::new(OperationKey::from("k")).into();
        assert!(error.is_circuit_open());
        assert!(error.cause().is_none());
        assert_eq!(error.to_string(), "circuit for operation 'k' is open");

        let error: ResilienceError<String> = ResilienceError::Cancelled;
        assert!(error.is_cancelled());
        assert_eq!(error.into_cause(), None);
    }

    #[test]
    fn configuration_converts() {
        let error: ResilienceError<String> = ConfigurationError::UnknownOperation(OperationKey::from("x")).into();
        assert!(matches!(error, ResilienceError::Configuration(_)));
    }

    #[test]
    fn errors_are_std_errors() {
        static_assertions::assert_impl_all!(ConfigurationError: std::error::Error, Send, Sync);
        static_assertions::assert_impl_all!(CircuitOpenError: std::error::Error, Send, Sync);
        static_assertions::assert_impl_all!(ResilienceError<std::io::Error>: std::error::Error, Send, Sync);
    }
}
