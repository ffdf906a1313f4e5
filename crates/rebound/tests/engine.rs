// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for the resilience engine using only the public API.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rebound::{
    Backoff, CancellationToken, CircuitOptions, CircuitState, EventKind, ExecutionOutcome, FailureCategory, OperationKey, Policy,
    PolicyRegistry, Recovery, RecoveryInfo, ResilienceEngine, ResilienceEvent,
};
use tick::{Clock, ClockControl};

#[derive(Debug, Clone, PartialEq, Eq)]
enum GatewayError {
    Unavailable,
    Declined,
    Throttled(Duration),
}

impl Recovery for GatewayError {
    fn recovery(&self) -> RecoveryInfo {
        match self {
            Self::Unavailable => RecoveryInfo::retry(),
            Self::Declined => RecoveryInfo::never(),
            Self::Throttled(after) => RecoveryInfo::retry().delay(*after),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Events(Arc<Mutex<Vec<ResilienceEvent>>>);

impl Events {
    fn kinds(&self) -> Vec<EventKind> {
        self.0.lock().unwrap().iter().map(ResilienceEvent::kind).collect()
    }

    fn all(&self) -> Vec<ResilienceEvent> {
        self.0.lock().unwrap().clone()
    }

    fn clear(&self) {
        self.0.lock().unwrap().clear();
    }

    fn sink(&self) -> impl Fn(&ResilienceEvent) + Send + Sync + 'static {
        let events = Arc::clone(&self.0);
        move |event: &ResilienceEvent| events.lock().unwrap().push(event.clone())
    }
}

const CHARGE: &str = "PaymentClient.charge";

fn charge_policy() -> Policy<GatewayError> {
    Policy::builder()
        .max_attempts(3)
        .backoff(Backoff::none())
        .circuit(
            CircuitOptions::default()
                .failure_rate_threshold(0.5)
                .minimum_calls(4)
                .open_duration(Duration::from_secs(1)),
        )
        .build()
        .unwrap()
}

fn engine(clock: &Clock, events: &Events) -> ResilienceEngine<GatewayError> {
    let registry = PolicyRegistry::new().register(CHARGE, charge_policy()).unwrap();

    ResilienceEngine::builder(clock)
        .registry(registry)
        .event_sink(events.sink())
        .build()
}

#[tokio::test]
async fn circuit_lifecycle_end_to_end() {
    let control = ClockControl::new();
    let events = Events::default();
    let engine = engine(&control.to_clock(), &events);
    let calls = AtomicU32::new(0);
    let failing = || {
        calls.fetch_add(1, Ordering::Relaxed);
        async { Err::<(), _>(GatewayError::Unavailable) }
    };

    // attempts 1 to 3 fail, the window holds fewer than the minimum calls
    let outcome = engine.execute(CHARGE, failing).await.unwrap();
    assert_eq!(
        outcome,
        ExecutionOutcome::Failure {
            cause: GatewayError::Unavailable,
            retryable: true
        }
    );
    assert_eq!(calls.load(Ordering::Relaxed), 3);
    assert_eq!(engine.circuit_state(CHARGE), Some(CircuitState::Closed));

    // the 4th attempt opens the circuit, its retry is rejected
    let outcome = engine.execute(CHARGE, failing).await.unwrap();
    assert!(outcome.is_circuit_open());
    assert_eq!(calls.load(Ordering::Relaxed), 4);
    assert_eq!(engine.circuit_state(CHARGE), Some(CircuitState::Open));

    // rejected without invoking the operation
    control.advance(Duration::from_millis(999));
    let outcome = engine.execute(CHARGE, failing).await.unwrap();
    assert!(outcome.is_circuit_open());
    assert_eq!(calls.load(Ordering::Relaxed), 4);

    // after the open duration the next call is a half-open trial
    control.advance(Duration::from_millis(1));
    events.clear();
    let outcome = engine
        .execute(CHARGE, || {
            calls.fetch_add(1, Ordering::Relaxed);
            async { Ok::<_, GatewayError>("charged") }
        })
        .await
        .unwrap();

    assert_eq!(outcome, ExecutionOutcome::Success("charged"));
    assert_eq!(calls.load(Ordering::Relaxed), 5);
    assert_eq!(
        events.kinds(),
        [
            EventKind::CircuitHalfOpened,
            EventKind::AttemptStarted,
            EventKind::AttemptSucceeded,
            EventKind::CircuitClosed,
        ]
    );
    assert_eq!(engine.circuit_state(CHARGE), Some(CircuitState::Closed));
}

#[tokio::test]
async fn failed_trial_reopens_with_fresh_window() {
    let control = ClockControl::new();
    let events = Events::default();
    let engine = engine(&control.to_clock(), &events);

    for _ in 0..2 {
        let _ = engine
            .execute(CHARGE, || async { Err::<(), _>(GatewayError::Unavailable) })
            .await
            .unwrap();
    }
    assert_eq!(engine.circuit_state(CHARGE), Some(CircuitState::Open));

    control.advance(Duration::from_secs(1));
    let outcome = engine
        .execute(CHARGE, || async { Err::<(), _>(GatewayError::Unavailable) })
        .await
        .unwrap();

    // the trial failed, so its retry is rejected by the reopened circuit
    assert!(outcome.is_circuit_open());
    assert_eq!(engine.circuit_state(CHARGE), Some(CircuitState::Open));

    // after another open duration a single success closes the circuit again
    control.advance(Duration::from_secs(1));
    let outcome = engine.execute(CHARGE, || async { Ok::<_, GatewayError>(()) }).await.unwrap();
    assert!(outcome.is_success());
    assert_eq!(engine.circuit_state(CHARGE), Some(CircuitState::Closed));

    // the window was cleared on close: three failures stay below the minimum calls
    let _ = engine
        .execute(CHARGE, || async { Err::<(), _>(GatewayError::Unavailable) })
        .await
        .unwrap();
    assert_eq!(engine.circuit_state(CHARGE), Some(CircuitState::Closed));
}

#[tokio::test]
async fn every_event_carries_common_fields() {
    let control = ClockControl::new();
    let clock = control.to_clock();
    let events = Events::default();
    let engine = engine(&clock, &events);

    let _ = engine
        .execute(CHARGE, || async { Err::<(), _>(GatewayError::Unavailable) })
        .await
        .unwrap();

    let all = events.all();
    assert!(!all.is_empty());
    for event in all {
        assert_eq!(event.key(), &OperationKey::method("PaymentClient", "charge"));
        assert_eq!(event.timestamp(), clock.system_time());
        assert!((1..=3).contains(&event.attempt()));
    }
}

fn panicking_sink(_: &ResilienceEvent) {
    panic!("sink failure");
}

#[tokio::test]
async fn panicking_sink_does_not_affect_outcome() {
    let registry = PolicyRegistry::new().register(CHARGE, charge_policy()).unwrap();
    let engine = ResilienceEngine::builder(&Clock::new_frozen())
        .registry(registry)
        .event_sink(panicking_sink)
        .build();

    let outcome = engine.execute(CHARGE, || async { Ok::<_, GatewayError>(1) }).await.unwrap();

    assert_eq!(outcome, ExecutionOutcome::Success(1));
}

#[tokio::test]
async fn honors_recovery_of_the_error() {
    let control = ClockControl::new().auto_advance_timers(true);
    let clock = control.to_clock();
    let events = Events::default();
    let registry = PolicyRegistry::new()
        .register(
            "gateway.capture",
            Policy::builder()
                .max_attempts(5)
                .backoff(Backoff::fixed(Duration::from_millis(10)))
                .honor_recovery()
                .build()
                .unwrap(),
        )
        .unwrap();
    let engine = ResilienceEngine::builder(&clock)
        .registry(registry)
        .event_sink(events.sink())
        .build();

    let calls = AtomicU32::new(0);
    let outcome = engine
        .execute("gateway.capture", || {
            let call = calls.fetch_add(1, Ordering::Relaxed);
            async move {
                match call {
                    0 => Err(GatewayError::Throttled(Duration::from_secs(2))),
                    1 => Err(GatewayError::Declined),
                    _ => Ok(()),
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(
        outcome,
        ExecutionOutcome::Failure {
            cause: GatewayError::Declined,
            retryable: false
        }
    );
    assert_eq!(calls.load(Ordering::Relaxed), 2);

    let delays: Vec<_> = events.all().iter().filter_map(ResilienceEvent::delay).collect();
    assert_eq!(delays, [Duration::from_secs(2)]);
}

#[tokio::test]
async fn categories_limit_retries_and_circuit_failures() {
    let control = ClockControl::new();
    let registry = PolicyRegistry::new()
        .register(
            "ledger.post",
            Policy::builder()
                .max_attempts(4)
                .backoff(Backoff::none())
                .categorize_with(|e: &GatewayError| match e {
                    GatewayError::Declined => FailureCategory::from("declined"),
                    _ => FailureCategory::from("transient"),
                })
                .no_retry_on(["declined"])
                .fail_on(["transient"])
                .circuit(CircuitOptions::default().minimum_calls(1).failure_rate_threshold(0.1))
                .build()
                .unwrap(),
        )
        .unwrap();
    let engine = ResilienceEngine::builder(&control.to_clock()).registry(registry).build();
    let calls = AtomicU32::new(0);

    for _ in 0..5 {
        let outcome = engine
            .execute("ledger.post", || {
                calls.fetch_add(1, Ordering::Relaxed);
                async { Err::<(), _>(GatewayError::Declined) }
            })
            .await
            .unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Failure { retryable: false, .. }));
    }

    // declined failures are neither retried nor counted
    assert_eq!(calls.load(Ordering::Relaxed), 5);
    assert_eq!(engine.circuit_state("ledger.post"), Some(CircuitState::Closed));
}

#[tokio::test]
async fn cancellation_during_backoff() {
    let control = ClockControl::new();
    let registry = PolicyRegistry::new()
        .register(
            "slow.op",
            Policy::builder()
                .max_attempts(3)
                .backoff(Backoff::fixed(Duration::from_secs(60)))
                .build()
                .unwrap(),
        )
        .unwrap();
    let events = Events::default();
    let engine = ResilienceEngine::builder(&control.to_clock())
        .registry(registry)
        .event_sink(events.sink())
        .build();
    let token = CancellationToken::new();

    let task = tokio::spawn({
        let engine = engine.clone();
        let token = token.clone();
        async move {
            engine
                .execute_cancellable("slow.op", &token, || async { Err::<(), _>(GatewayError::Unavailable) })
                .await
                .unwrap()
        }
    });

    // wait until the first attempt failed and the retry is scheduled
    while !events.kinds().contains(&EventKind::RetryScheduled) {
        tokio::task::yield_now().await;
    }
    token.cancel();

    let outcome = task.await.unwrap();
    assert!(outcome.is_cancelled());
    assert_eq!(events.kinds().last(), Some(&EventKind::CallCancelled));
}

#[tokio::test]
async fn concurrent_trials_are_limited() {
    let control = ClockControl::new();
    let registry = PolicyRegistry::new()
        .register(
            "search.query",
            Policy::builder()
                .max_attempts(1)
                .circuit(
                    CircuitOptions::default()
                        .minimum_calls(1)
                        .open_duration(Duration::from_secs(1))
                        .half_open_trial_permits(2),
                )
                .build()
                .unwrap(),
        )
        .unwrap();
    let engine = ResilienceEngine::<GatewayError>::builder(&control.to_clock())
        .registry(registry)
        .build();

    let _ = engine
        .execute("search.query", || async { Err::<(), _>(GatewayError::Unavailable) })
        .await
        .unwrap();
    control.advance(Duration::from_secs(1));

    // two trials in flight, the third call is rejected
    let (release_tx, release_rx) = tokio::sync::watch::channel(false);
    let trial = |engine: ResilienceEngine<GatewayError>, release: tokio::sync::watch::Receiver<bool>| async move {
        engine
            .execute("search.query", || {
                let mut release = release.clone();
                async move {
                    let _ = release.wait_for(|released| *released).await;
                    Ok::<_, GatewayError>(())
                }
            })
            .await
            .unwrap()
    };

    let first = tokio::spawn(trial(engine.clone(), release_rx.clone()));
    let second = tokio::spawn(trial(engine.clone(), release_rx.clone()));
    while engine.circuit_state("search.query") != Some(CircuitState::HalfOpen) {
        tokio::task::yield_now().await;
    }
    tokio::task::yield_now().await;

    let rejected = engine
        .execute("search.query", || async { Ok::<_, GatewayError>(()) })
        .await
        .unwrap();

    release_tx.send(true).unwrap();
    assert!(first.await.unwrap().is_success());
    assert!(second.await.unwrap().is_success());
    assert!(rejected.is_circuit_open());
    assert_eq!(engine.circuit_state("search.query"), Some(CircuitState::Closed));
}
