// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Mutex;
use std::time::Instant;

use tick::Clock;

use super::window::{ExecutionResult, FailureWindow, Health};
use super::{CircuitOptions, CircuitState};
use crate::OperationKey;
use crate::constants::ERR_POISONED_LOCK;

/// A state change caused by an admission, an outcome or a reset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Transition {
    /// Closed to open, with the health that tripped the circuit.
    Opened(Health),
    /// Half-open back to open after a failed trial.
    Reopened,
    /// Open to half-open on the first admission after the open duration.
    HalfOpened,
    /// Half-open to closed after every trial permit succeeded.
    Closed,
}

impl Transition {
    pub fn state(self) -> CircuitState {
        match self {
            Self::Opened(_) | Self::Reopened => CircuitState::Open,
            Self::HalfOpened => CircuitState::HalfOpen,
            Self::Closed => CircuitState::Closed,
        }
    }
}

/// The circuit state machine of one operation key.
///
/// All reads and writes of the state and the window go through one mutex, so transitions for
/// the key are linearizable. Time is read before the lock is taken and the lock is never held
/// across an await.
#[derive(Debug)]
pub(crate) struct CircuitBreaker {
    key: OperationKey,
    options: CircuitOptions,
    clock: Clock,
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    state: State,
    window: FailureWindow,
    // Bumped on every transition. Outcomes of permits issued in an earlier epoch are ignored.
    epoch: u64,
}

#[derive(Debug, Clone, Copy)]
enum State {
    Closed,
    Open { opened_at: Instant },
    HalfOpen { admitted: u32, succeeded: u32 },
}

impl Inner {
    fn transition_to(&mut self, state: State) {
        self.state = state;
        self.window.clear();
        self.epoch = self.epoch.wrapping_add(1);
    }
}

/// A call admitted by the breaker.
#[derive(Debug)]
pub(crate) struct Admission<'a> {
    pub permit: Permit<'a>,
    pub transition: Option<Transition>,
}

/// Right to run one attempt.
///
/// Reporting an outcome consumes the permit. A permit dropped without an outcome (cancelled
/// call, failure that does not count against the circuit) hands its trial slot back.
#[derive(Debug)]
pub(crate) struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    epoch: u64,
    settled: bool,
}

impl Permit<'_> {
    pub fn record(mut self, result: ExecutionResult) -> Option<Transition> {
        self.settled = true;
        self.breaker.on_outcome(self.epoch, result)
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_release(self.epoch);
        }
    }
}

impl CircuitBreaker {
    pub fn new(key: OperationKey, options: CircuitOptions, clock: Clock) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: State::Closed,
                window: FailureWindow::new(options.get_sliding_window()),
                epoch: 0,
            }),
            key,
            options,
            clock,
        }
    }

    pub fn key(&self) -> &OperationKey {
        &self.key
    }

    #[cfg(test)]
    pub fn options(&self) -> &CircuitOptions {
        &self.options
    }

    /// Returns the current state. An open circuit whose open duration has elapsed still reports
    /// open until the next admission moves it to half-open.
    pub fn state(&self) -> CircuitState {
        match self.inner.lock().expect(ERR_POISONED_LOCK).state {
            State::Closed => CircuitState::Closed,
            State::Open { .. } => CircuitState::Open,
            State::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    /// Admits or rejects one attempt. `None` means the circuit rejected it.
    pub fn try_admit(&self) -> Option<Admission<'_>> {
        let now = self.clock.instant();
        let mut inner = self.inner.lock().expect(ERR_POISONED_LOCK);

        let state = inner.state;
        let transition = match state {
            State::Closed => None,
            State::Open { opened_at } => {
                if now.saturating_duration_since(opened_at) < self.options.get_open_duration() {
                    return None;
                }

                inner.transition_to(State::HalfOpen {
                    admitted: 1,
                    succeeded: 0,
                });
                Some(Transition::HalfOpened)
            }
            State::HalfOpen { admitted, succeeded } => {
                if admitted >= self.options.get_half_open_trial_permits() {
                    return None;
                }

                inner.state = State::HalfOpen {
                    admitted: admitted + 1,
                    succeeded,
                };
                None
            }
        };

        Some(Admission {
            permit: Permit {
                breaker: self,
                epoch: inner.epoch,
                settled: false,
            },
            transition,
        })
    }

    /// Forces the circuit closed with an empty window. Returns the state before the reset;
    /// resetting a closed circuit changes nothing.
    pub fn reset(&self) -> CircuitState {
        let mut inner = self.inner.lock().expect(ERR_POISONED_LOCK);
        let state = inner.state;

        match state {
            State::Closed => CircuitState::Closed,
            State::Open { .. } => {
                inner.transition_to(State::Closed);
                CircuitState::Open
            }
            State::HalfOpen { .. } => {
                inner.transition_to(State::Closed);
                CircuitState::HalfOpen
            }
        }
    }

    fn on_outcome(&self, epoch: u64, result: ExecutionResult) -> Option<Transition> {
        let now = self.clock.instant();
        let mut inner = self.inner.lock().expect(ERR_POISONED_LOCK);

        if inner.epoch != epoch {
            return None;
        }

        let state = inner.state;
        match state {
            State::Closed => {
                inner.window.record(result, now);

                if result == ExecutionResult::Success {
                    return None;
                }

                let health = inner.window.health(now);
                if health.is_unhealthy(self.options.get_failure_rate_threshold(), self.options.get_minimum_calls()) {
                    inner.transition_to(State::Open { opened_at: now });
                    return Some(Transition::Opened(health));
                }

                None
            }
            State::Open { .. } => None,
            State::HalfOpen { admitted, succeeded } => match result {
                ExecutionResult::Failure => {
                    inner.transition_to(State::Open { opened_at: now });
                    Some(Transition::Reopened)
                }
                ExecutionResult::Success => {
                    let succeeded = succeeded + 1;

                    if succeeded >= self.options.get_half_open_trial_permits() {
                        inner.transition_to(State::Closed);
                        return Some(Transition::Closed);
                    }

                    inner.state = State::HalfOpen { admitted, succeeded };
                    None
                }
            },
        }
    }

    fn on_release(&self, epoch: u64) {
        let mut inner = self.inner.lock().expect(ERR_POISONED_LOCK);

        if inner.epoch != epoch {
            return;
        }

        let state = inner.state;
        if let State::HalfOpen { admitted, succeeded } = state {
            inner.state = State::HalfOpen {
                admitted: admitted.saturating_sub(1).max(succeeded),
                succeeded,
            };
        }
    }
}
