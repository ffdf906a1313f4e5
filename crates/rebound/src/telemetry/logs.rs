// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::{EventKind, EventSink, ResilienceEvent};

/// Re-emits [`ResilienceEvent`]s as named `tracing` events.
///
/// Retries, failures, rejections and openings are logged at `WARN`, other circuit transitions
/// and cancellations at `INFO`, attempt starts and successes at `DEBUG`. Every event carries
/// `resilience.operation.key`, `resilience.event.name`, `resilience.attempt.index` and
/// `resilience.outcome`; retries add `resilience.retry.delay` (seconds) and calls gated by a
/// circuit add `resilience.circuit.state`. Openings carry the tripping
/// `resilience.circuit.failure_rate`.
#[derive(Debug, Clone, Copy, Default)]
#[non_exhaustive]
pub struct TracingSink;

impl TracingSink {
    /// Creates the sink.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

macro_rules! log_event {
    ($name:literal, $level:expr, $event:expr) => {
        tracing::event!(
            name: $name,
            $level,
            resilience.operation.key = $event.key().as_str(),
            resilience.event.name = $event.kind().as_str(),
            resilience.attempt.index = $event.attempt(),
            resilience.outcome = $event.outcome().as_str(),
            resilience.retryable = $event.retryable(),
            resilience.retry.delay = $event.delay().map(|d| d.as_secs_f32()),
            resilience.circuit.state = $event.circuit_state().map(crate::CircuitState::as_str),
            resilience.circuit.failure_rate = $event.failure_rate(),
        )
    };
}

impl EventSink for TracingSink {
    fn emit(&self, event: &ResilienceEvent) {
        match event.kind() {
            EventKind::AttemptStarted => log_event!("rebound.attempt.started", tracing::Level::DEBUG, event),
            EventKind::AttemptSucceeded => log_event!("rebound.attempt.succeeded", tracing::Level::DEBUG, event),
            EventKind::AttemptFailed => log_event!("rebound.attempt.failed", tracing::Level::WARN, event),
            EventKind::RetryScheduled => log_event!("rebound.retry", tracing::Level::WARN, event),
            EventKind::RetriesExhausted => log_event!("rebound.retry.exhausted", tracing::Level::WARN, event),
            EventKind::CallRejected => log_event!("rebound.call.rejected", tracing::Level::WARN, event),
            EventKind::CallCancelled => log_event!("rebound.call.cancelled", tracing::Level::INFO, event),
            EventKind::CircuitOpened => log_event!("rebound.circuit.opened", tracing::Level::WARN, event),
            EventKind::CircuitHalfOpened => log_event!("rebound.circuit.half_opened", tracing::Level::INFO, event),
            EventKind::CircuitClosed => log_event!("rebound.circuit.closed", tracing::Level::INFO, event),
            EventKind::CircuitReset => log_event!("rebound.circuit.reset", tracing::Level::INFO, event),
        }
    }
}
