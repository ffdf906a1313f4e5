// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::error::{CircuitOpenError, ResilienceError};
use crate::events::OutcomeKind;

/// Final result of a resilient call.
///
/// Use [`into_result`][ExecutionOutcome::into_result] to fold the outcome into a plain `Result`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum ExecutionOutcome<T, E> {
    /// An attempt succeeded.
    Success(T),

    /// The last attempt failed and no further attempt was made.
    Failure {
        /// The failure of the last attempt, unchanged.
        cause: E,
        /// Whether the failure was classified as retryable. `true` means the attempt or time
        /// budget ran out.
        retryable: bool,
    },

    /// The circuit of the operation rejected an attempt. The operation was not invoked for
    /// that attempt.
    CircuitOpen(CircuitOpenError),

    /// The caller cancelled the call.
    Cancelled,
}

impl<T, E> ExecutionOutcome<T, E> {
    /// Returns `true` for [`ExecutionOutcome::Success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns `true` for [`ExecutionOutcome::CircuitOpen`].
    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen(_))
    }

    /// Returns `true` for [`ExecutionOutcome::Cancelled`].
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns the kind of the outcome.
    #[must_use]
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Success(_) => OutcomeKind::Success,
            Self::Failure { .. } => OutcomeKind::Failure,
            Self::CircuitOpen(_) => OutcomeKind::Rejected,
            Self::Cancelled => OutcomeKind::Cancelled,
        }
    }

    /// Converts the outcome into a `Result`.
    ///
    /// # Errors
    ///
    /// Returns the matching [`ResilienceError`] for every outcome other than success.
    pub fn into_result(self) -> Result<T, ResilienceError<E>> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Failure { cause, retryable } => Err(ResilienceError::Operation { cause, retryable }),
            Self::CircuitOpen(error) => Err(ResilienceError::CircuitOpen(error)),
            Self::Cancelled => Err(ResilienceError::Cancelled),
        }
    }
}

impl<T, E> From<ExecutionOutcome<T, E>> for Result<T, ResilienceError<E>> {
    fn from(outcome: ExecutionOutcome<T, E>) -> Self {
        outcome.into_result()
    }
}
