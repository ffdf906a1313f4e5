// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::ops::ControlFlow;
use std::pin::pin;
use std::time::Duration;

use futures_util::future::{Either, select};
use tick::{Clock, FutureExt, Stopwatch};

use crate::circuit::{Admission, CircuitBreaker, ExecutionResult, Permit, Transition};
use crate::error::CircuitOpenError;
use crate::events::{Emitter, EventKind, OutcomeKind, ResilienceEvent};
use crate::{CancellationToken, ExecutionOutcome, OperationKey, Policy};

/// Per-call bookkeeping. Never shared between calls.
#[derive(Debug)]
struct AttemptContext {
    attempt: u32,
    stopwatch: Stopwatch,
}

impl AttemptContext {
    fn new(clock: &Clock) -> Self {
        Self {
            attempt: 1,
            stopwatch: clock.stopwatch(),
        }
    }

    fn elapsed(&self) -> Duration {
        self.stopwatch.elapsed()
    }
}

/// Drives the attempts of one call.
///
/// Before every attempt the circuit (if any) is asked for a permit; a rejection ends the call.
/// After a failure the classifier decides whether another attempt follows, and the backoff of
/// the policy, or a delay requested by the failure itself, decides when.
#[derive(Debug)]
pub(crate) struct RetryExecutor<'a, E> {
    key: &'a OperationKey,
    policy: &'a Policy<E>,
    clock: &'a Clock,
    emitter: &'a Emitter,
    breaker: Option<&'a CircuitBreaker>,
    cancellation: Option<&'a CancellationToken>,
}

impl<'a, E> RetryExecutor<'a, E> {
    pub fn new(key: &'a OperationKey, policy: &'a Policy<E>, clock: &'a Clock, emitter: &'a Emitter) -> Self {
        Self {
            key,
            policy,
            clock,
            emitter,
            breaker: None,
            cancellation: None,
        }
    }

    pub fn breaker(mut self, breaker: Option<&'a CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn cancellation(mut self, cancellation: Option<&'a CancellationToken>) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub async fn run<T, F, Fut>(&self, mut operation: F) -> ExecutionOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut context = AttemptContext::new(self.clock);

        loop {
            let attempt = context.attempt;

            if self.cancellation.is_some_and(CancellationToken::is_cancelled) {
                return self.cancelled(attempt);
            }

            let permit = match self.admit(attempt) {
                Ok(permit) => permit,
                Err(error) => return ExecutionOutcome::CircuitOpen(error),
            };

            self.emit(EventKind::AttemptStarted, attempt, OutcomeKind::Pending, |e| e);

            let Some(result) = self.until_cancelled(self.run_attempt(operation())).await else {
                // the permit goes back unused
                drop(permit);
                return self.cancelled(attempt);
            };

            let delay = match result {
                Ok(value) => return self.on_success(value, permit, attempt),
                Err(cause) => match self.on_failure(cause, permit, &context) {
                    ControlFlow::Continue(delay) => delay,
                    ControlFlow::Break(outcome) => return outcome,
                },
            };

            if !delay.is_zero() && self.until_cancelled(self.clock.delay(delay)).await.is_none() {
                return self.cancelled(attempt);
            }

            context.attempt = attempt.saturating_add(1);
        }
    }

    async fn run_attempt<T, Fut>(&self, future: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let Some((timeout, error)) = self.policy.timeout_settings() else {
            return future.await;
        };

        match future.timeout(self.clock, timeout).await {
            Ok(result) => result,
            Err(_) => Err(error.call(timeout)),
        }
    }

    /// Resolves to `None` if the call is cancelled before `future` completes.
    async fn until_cancelled<F: Future>(&self, future: F) -> Option<F::Output> {
        let Some(token) = self.cancellation else {
            return Some(future.await);
        };

        let future = pin!(future);
        let cancelled = pin!(token.cancelled());

        match select(future, cancelled).await {
            Either::Left((output, _)) => Some(output),
            Either::Right(((), _)) => None,
        }
    }

    fn admit(&self, attempt: u32) -> Result<Option<Permit<'a>>, CircuitOpenError> {
        let Some(breaker) = self.breaker else {
            return Ok(None);
        };

        match breaker.try_admit() {
            Some(Admission { permit, transition }) => {
                self.emit_transition(transition, attempt);
                Ok(Some(permit))
            }
            None => {
                self.emit(EventKind::CallRejected, attempt, OutcomeKind::Rejected, |e| {
                    e.with_circuit_state(breaker.state())
                });
                Err(CircuitOpenError::new(breaker.key().clone()))
            }
        }
    }

    fn on_success<T>(&self, value: T, permit: Option<Permit<'_>>, attempt: u32) -> ExecutionOutcome<T, E> {
        let transition = permit.and_then(|p| p.record(ExecutionResult::Success));

        self.emit(EventKind::AttemptSucceeded, attempt, OutcomeKind::Success, |e| e);
        self.emit_transition(transition, attempt);

        ExecutionOutcome::Success(value)
    }

    fn on_failure<T>(
        &self,
        cause: E,
        permit: Option<Permit<'_>>,
        context: &AttemptContext,
    ) -> ControlFlow<ExecutionOutcome<T, E>, Duration> {
        let attempt = context.attempt;
        let classification = self.policy.classifier().classify(&cause);
        let retryable = classification.retryable();

        // a failure that does not count releases the permit without an outcome
        let transition = match permit {
            Some(permit) if classification.counts_as_circuit_failure() => permit.record(ExecutionResult::Failure),
            _ => None,
        };

        self.emit(EventKind::AttemptFailed, attempt, OutcomeKind::Failure, |e| e.with_retryable(retryable));
        self.emit_transition(transition, attempt);

        if !retryable {
            return ControlFlow::Break(ExecutionOutcome::Failure { cause, retryable });
        }

        if attempt >= self.policy.max_attempts() {
            return ControlFlow::Break(self.exhausted(cause, attempt, None));
        }

        let delay = classification
            .retry_delay()
            .unwrap_or_else(|| self.policy.delay_for(attempt));

        if let Some(budget) = self.policy.call_budget()
            && context.elapsed().saturating_add(delay) > budget
        {
            return ControlFlow::Break(self.exhausted(cause, attempt, Some(delay)));
        }

        self.emit(EventKind::RetryScheduled, attempt, OutcomeKind::Failure, |e| {
            e.with_retryable(true).with_delay(delay)
        });

        ControlFlow::Continue(delay)
    }

    /// Ends a call whose last failure was retryable. `skipped_delay` is the wait that would
    /// have crossed the call budget.
    fn exhausted<T>(&self, cause: E, attempt: u32, skipped_delay: Option<Duration>) -> ExecutionOutcome<T, E> {
        self.emit(EventKind::RetriesExhausted, attempt, OutcomeKind::Failure, |e| {
            let e = e.with_retryable(true);
            match skipped_delay {
                Some(delay) => e.with_delay(delay),
                None => e,
            }
        });

        ExecutionOutcome::Failure { cause, retryable: true }
    }

    fn cancelled<T>(&self, attempt: u32) -> ExecutionOutcome<T, E> {
        self.emit(EventKind::CallCancelled, attempt, OutcomeKind::Cancelled, |e| e);
        ExecutionOutcome::Cancelled
    }

    fn emit_transition(&self, transition: Option<Transition>, attempt: u32) {
        let Some(transition) = transition else {
            return;
        };

        let (kind, outcome) = match transition {
            Transition::Opened(_) | Transition::Reopened => (EventKind::CircuitOpened, OutcomeKind::Failure),
            Transition::HalfOpened => (EventKind::CircuitHalfOpened, OutcomeKind::Pending),
            Transition::Closed => (EventKind::CircuitClosed, OutcomeKind::Success),
        };

        self.emit(kind, attempt, outcome, |e| {
            let e = e.with_circuit_state(transition.state());
            match transition {
                Transition::Opened(health) => e.with_failure_rate(health.failure_rate()),
                _ => e,
            }
        });
    }

    fn emit(&self, kind: EventKind, attempt: u32, outcome: OutcomeKind, f: impl FnOnce(ResilienceEvent) -> ResilienceEvent) {
        self.emitter.emit_with(kind, self.key, attempt, outcome, f);
    }
}
