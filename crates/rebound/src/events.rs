// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Lifecycle events of resilient calls.
//!
//! The engine reports what it does through [`ResilienceEvent`]s delivered to every registered
//! [`EventSink`]. Events of one call are delivered in order: the start and end of each attempt,
//! then any circuit transition the outcome caused. A sink runs on the calling task and must
//! not block; a panicking sink is logged and otherwise ignored.

use std::fmt::{self, Debug, Display, Formatter};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tick::Clock;

use crate::{CircuitState, OperationKey};

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum EventKind {
    /// An attempt is about to invoke the operation.
    AttemptStarted,
    /// An attempt succeeded.
    AttemptSucceeded,
    /// An attempt failed.
    AttemptFailed,
    /// Another attempt follows after [`ResilienceEvent::delay`].
    RetryScheduled,
    /// The last failure was retryable but the attempts or the call budget ran out. For the
    /// budget, [`ResilienceEvent::delay`] is the wait that would have crossed it.
    RetriesExhausted,
    /// The circuit rejected an attempt.
    CallRejected,
    /// The caller cancelled the call.
    CallCancelled,
    /// The circuit opened.
    CircuitOpened,
    /// The circuit started admitting trial calls.
    CircuitHalfOpened,
    /// The circuit closed after successful trials.
    CircuitClosed,
    /// The circuit was reset by an administrator.
    CircuitReset,
}

impl EventKind {
    /// Returns a short `snake_case` name of the event, suitable for telemetry.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AttemptStarted => "attempt_started",
            Self::AttemptSucceeded => "attempt_succeeded",
            Self::AttemptFailed => "attempt_failed",
            Self::RetryScheduled => "retry_scheduled",
            Self::RetriesExhausted => "retries_exhausted",
            Self::CallRejected => "call_rejected",
            Self::CallCancelled => "call_cancelled",
            Self::CircuitOpened => "circuit_opened",
            Self::CircuitHalfOpened => "circuit_half_opened",
            Self::CircuitClosed => "circuit_closed",
            Self::CircuitReset => "circuit_reset",
        }
    }
}

impl Display for EventKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome an event relates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum OutcomeKind {
    /// The attempt has not finished yet.
    Pending,
    /// The attempt succeeded.
    Success,
    /// The attempt failed.
    Failure,
    /// The circuit rejected the attempt.
    Rejected,
    /// The caller cancelled the call.
    Cancelled,
    /// The circuit was reset outside of any call.
    Reset,
}

impl OutcomeKind {
    /// Returns a short `snake_case` name of the outcome, suitable for telemetry.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Reset => "reset",
        }
    }
}

/// A lifecycle event of a resilient call or of a circuit.
#[derive(Debug, Clone, PartialEq)]
pub struct ResilienceEvent {
    kind: EventKind,
    key: OperationKey,
    timestamp: SystemTime,
    attempt: u32,
    outcome: OutcomeKind,
    retryable: Option<bool>,
    delay: Option<Duration>,
    circuit_state: Option<CircuitState>,
    failure_rate: Option<f64>,
}

impl ResilienceEvent {
    pub(crate) fn new(kind: EventKind, key: OperationKey, timestamp: SystemTime, attempt: u32, outcome: OutcomeKind) -> Self {
        Self {
            kind,
            key,
            timestamp,
            attempt,
            outcome,
            retryable: None,
            delay: None,
            circuit_state: None,
            failure_rate: None,
        }
    }

    pub(crate) fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn with_circuit_state(mut self, state: CircuitState) -> Self {
        self.circuit_state = Some(state);
        self
    }

    pub(crate) fn with_failure_rate(mut self, failure_rate: f64) -> Self {
        self.failure_rate = Some(failure_rate);
        self
    }

    /// Returns what happened.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Returns the operation the event belongs to.
    #[must_use]
    pub fn key(&self) -> &OperationKey {
        &self.key
    }

    /// Returns when the event happened, as reported by the engine clock.
    #[must_use]
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Returns the 1-based attempt index, or `0` for events that are not tied to an attempt.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns the outcome the event relates to.
    #[must_use]
    pub fn outcome(&self) -> OutcomeKind {
        self.outcome
    }

    /// Returns whether a failed attempt was classified as retryable.
    #[must_use]
    pub fn retryable(&self) -> Option<bool> {
        self.retryable
    }

    /// Returns the delay before the next attempt of a [`EventKind::RetryScheduled`] event, or
    /// the skipped wait of a [`EventKind::RetriesExhausted`] event that hit the call budget.
    #[must_use]
    pub fn delay(&self) -> Option<Duration> {
        self.delay
    }

    /// Returns the circuit state after the event, for calls gated by a circuit.
    #[must_use]
    pub fn circuit_state(&self) -> Option<CircuitState> {
        self.circuit_state
    }

    /// Returns the failure rate in `[0.0, 1.0]` that tripped the circuit of a
    /// [`EventKind::CircuitOpened`] event. Absent when a failed trial reopened the circuit.
    #[must_use]
    pub fn failure_rate(&self) -> Option<f64> {
        self.failure_rate
    }
}

/// Receives [`ResilienceEvent`]s.
///
/// Closures can be used directly:
///
/// ```
/// use std::sync::{Arc, Mutex};
///
/// use rebound::{EventSink, ResilienceEvent};
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = {
///     let seen = Arc::clone(&seen);
///     move |event: &ResilienceEvent| seen.lock().unwrap().push(event.kind())
/// };
///
/// fn assert_sink(_: &impl EventSink) {}
/// assert_sink(&sink);
/// ```
pub trait EventSink: Send + Sync {
    /// Handles one event. Must not block.
    fn emit(&self, event: &ResilienceEvent);
}

impl<F> EventSink for F
where
    F: Fn(&ResilienceEvent) + Send + Sync,
{
    fn emit(&self, event: &ResilienceEvent) {
        self(event);
    }
}

/// Fans events out to the registered sinks.
#[derive(Clone)]
pub(crate) struct Emitter {
    sinks: Arc<[Arc<dyn EventSink>]>,
    clock: Clock,
}

impl Debug for Emitter {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter").field("sinks", &self.sinks.len()).finish_non_exhaustive()
    }
}

impl Emitter {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>, clock: Clock) -> Self {
        Self {
            sinks: sinks.into(),
            clock,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.sinks.is_empty()
    }

    pub fn event(&self, kind: EventKind, key: &OperationKey, attempt: u32, outcome: OutcomeKind) -> ResilienceEvent {
        ResilienceEvent::new(kind, key.clone(), self.clock.system_time(), attempt, outcome)
    }

    pub fn emit(&self, event: &ResilienceEvent) {
        for sink in self.sinks.iter() {
            if catch_unwind(AssertUnwindSafe(|| sink.emit(event))).is_err() {
                tracing::event!(
                    name: "rebound.event_sink.panicked",
                    tracing::Level::ERROR,
                    resilience.operation.key = event.key().as_str(),
                    resilience.event.name = event.kind().as_str(),
                );
            }
        }
    }

    /// Builds and emits an event, skipping the work when nobody listens.
    pub fn emit_with(&self, kind: EventKind, key: &OperationKey, attempt: u32, outcome: OutcomeKind, f: impl FnOnce(ResilienceEvent) -> ResilienceEvent) {
        if self.is_enabled() {
            self.emit(&f(self.event(kind, key, attempt, outcome)));
        }
    }
}
