// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use tick::Clock;

use crate::circuit::CircuitRegistry;
use crate::events::{Emitter, EventKind, OutcomeKind};
use crate::retry::RetryExecutor;
use crate::telemetry::TracingSink;
use crate::{
    CancellationToken, CircuitState, ConfigurationError, EventSink, ExecutionOutcome, OperationKey, Policy, PolicyRegistry,
    ResilienceError,
};

/// Runs operations under the retry and circuit breaking policies of their operation key.
///
/// The engine owns the circuit state of every key it has seen and is meant to be created once
/// and shared; cloning is cheap and clones share all state. It owns no threads or runtime:
/// every call runs on the task of the caller and time is taken from the [`Clock`] the engine
/// was built with.
///
/// ```
/// # futures::executor::block_on(async {
/// use rebound::{Policy, PolicyRegistry, ResilienceEngine};
/// use tick::Clock;
///
/// let registry = PolicyRegistry::<std::io::Error>::new()
///     .register("inventory.lookup", Policy::builder().max_attempts(2).build()?)?;
///
/// let engine = ResilienceEngine::builder(&Clock::new_frozen())
///     .registry(registry)
///     .build();
///
/// let outcome = engine
///     .execute("inventory.lookup", || async { Ok::<_, std::io::Error>(42) })
///     .await?;
///
/// assert!(outcome.is_success());
/// # Ok::<(), rebound::ConfigurationError>(())
/// # }).unwrap();
/// ```
#[derive(Debug)]
pub struct ResilienceEngine<E> {
    inner: Arc<EngineInner<E>>,
}

#[derive(Debug)]
struct EngineInner<E> {
    registry: PolicyRegistry<E>,
    circuits: CircuitRegistry,
    clock: Clock,
    emitter: Emitter,
}

impl<E> Clone for ResilienceEngine<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> ResilienceEngine<E> {
    /// Starts building an engine that reads time from `clock`.
    #[must_use]
    pub fn builder(clock: &Clock) -> EngineBuilder<E> {
        EngineBuilder::new(clock.clone())
    }

    /// Returns the policies the engine resolves operation keys against.
    #[must_use]
    pub fn registry(&self) -> &PolicyRegistry<E> {
        &self.inner.registry
    }

    /// Runs `operation` under the policy registered for `key`.
    ///
    /// The operation is invoked once per attempt. The returned outcome is terminal: all retries
    /// permitted by the policy have been made.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnknownOperation`] if no policy is registered for `key`;
    /// the operation is not invoked in that case.
    pub async fn execute<T, F, Fut>(&self, key: impl Into<OperationKey>, operation: F) -> Result<ExecutionOutcome<T, E>, ConfigurationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = key.into();
        let policy = self.inner.registry.resolve(&key)?;

        Ok(self.run(&key, &policy, None, operation).await)
    }

    /// Like [`execute`][Self::execute], but stops as soon as `token` is cancelled.
    ///
    /// Cancellation aborts a pending backoff delay or the attempt in flight and yields
    /// [`ExecutionOutcome::Cancelled`]. A cancelled attempt never counts against the circuit.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnknownOperation`] if no policy is registered for `key`.
    pub async fn execute_cancellable<T, F, Fut>(
        &self,
        key: impl Into<OperationKey>,
        token: &CancellationToken,
        operation: F,
    ) -> Result<ExecutionOutcome<T, E>, ConfigurationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = key.into();
        let policy = self.inner.registry.resolve(&key)?;

        Ok(self.run(&key, &policy, Some(token), operation).await)
    }

    /// Runs `operation` under a policy supplied by the caller instead of the registry.
    ///
    /// Circuit state is still keyed by `key`: calls made through `invoke` and
    /// [`execute`][Self::execute] with the same key share one circuit.
    pub async fn invoke<T, F, Fut>(&self, key: impl Into<OperationKey>, policy: &Policy<E>, operation: F) -> ExecutionOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(&key.into(), policy, None, operation).await
    }

    /// Runs `operation` and, if it ends in a failure the policy routes to a fallback or in a
    /// rejection by an open circuit, produces the result with `fallback` instead.
    ///
    /// The fallback receives the error that would otherwise have been returned. Cancellation
    /// never falls back. A failure of the fallback itself is returned as a non-retryable
    /// [`ResilienceError::Operation`].
    ///
    /// # Errors
    ///
    /// Returns the terminal error when no fallback applies, the error of the fallback when it
    /// fails, or [`ResilienceError::Configuration`] if no policy is registered for `key`.
    pub async fn execute_with_fallback<T, F, Fut, FB, FbFut>(
        &self,
        key: impl Into<OperationKey>,
        operation: F,
        fallback: FB,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce(ResilienceError<E>) -> FbFut,
        FbFut: Future<Output = Result<T, E>>,
    {
        let key = key.into();
        let policy = self.inner.registry.resolve(&key)?;

        let error = match self.run(&key, &policy, None, operation).await {
            ExecutionOutcome::Success(value) => return Ok(value),
            ExecutionOutcome::Failure { cause, retryable } if policy.classifier().applies_fallback(&cause) => {
                ResilienceError::Operation { cause, retryable }
            }
            ExecutionOutcome::CircuitOpen(error) => ResilienceError::CircuitOpen(error),
            outcome => return outcome.into_result(),
        };

        let reason = if error.is_circuit_open() { "circuit_open" } else { "failure" };
        tracing::event!(
            name: "rebound.fallback",
            tracing::Level::DEBUG,
            resilience.operation.key = key.as_str(),
            resilience.fallback.reason = reason,
        );

        fallback(error)
            .await
            .map_err(|cause| ResilienceError::Operation { cause, retryable: false })
    }

    /// Forces the circuit of `key` closed with an empty failure window.
    ///
    /// Returns the state the circuit was in, or `None` if the key never used a circuit. A
    /// [`CircuitReset`][crate::EventKind::CircuitReset] event is emitted either way; on a closed
    /// circuit that event is the only effect.
    pub fn reset_circuit(&self, key: impl Into<OperationKey>) -> Option<CircuitState> {
        let key = key.into();
        let previous = self.inner.circuits.get(&key).map(|breaker| breaker.reset());

        self.inner.emitter.emit_with(EventKind::CircuitReset, &key, 0, OutcomeKind::Reset, |e| {
            e.with_circuit_state(CircuitState::Closed)
        });

        previous
    }

    /// Returns the current circuit state of `key`, or `None` if the key never used a circuit.
    ///
    /// An open circuit whose open duration has elapsed still reports [`CircuitState::Open`]
    /// until the next call moves it to half-open.
    #[must_use]
    pub fn circuit_state(&self, key: impl Into<OperationKey>) -> Option<CircuitState> {
        self.inner.circuits.get(&key.into()).map(|breaker| breaker.state())
    }

    async fn run<T, F, Fut>(
        &self,
        key: &OperationKey,
        policy: &Policy<E>,
        token: Option<&CancellationToken>,
        operation: F,
    ) -> ExecutionOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let inner = &*self.inner;
        let breaker = policy.circuit().map(|options| inner.circuits.get_or_create(key, options));

        RetryExecutor::new(key, policy, &inner.clock, &inner.emitter)
            .breaker(breaker.as_deref())
            .cancellation(token)
            .run(operation)
            .await
    }
}

/// Builder of a [`ResilienceEngine`].
pub struct EngineBuilder<E> {
    clock: Clock,
    registry: PolicyRegistry<E>,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl<E: Debug> Debug for EngineBuilder<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("clock", &self.clock)
            .field("registry", &self.registry)
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl<E> EngineBuilder<E> {
    fn new(clock: Clock) -> Self {
        Self {
            clock,
            registry: PolicyRegistry::new(),
            sinks: Vec::new(),
        }
    }

    /// Sets the policies operation keys are resolved against. Defaults to an empty registry.
    #[must_use]
    pub fn registry(mut self, registry: PolicyRegistry<E>) -> Self {
        self.registry = registry;
        self
    }

    /// Adds a sink that receives every [`ResilienceEvent`][crate::ResilienceEvent].
    ///
    /// Sinks are called in the order they were added, synchronously on the calling task.
    #[must_use]
    pub fn event_sink(mut self, sink: impl EventSink + 'static) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    /// Enables structured logging of resilience events through `tracing`.
    #[must_use]
    pub fn enable_logs(self) -> Self {
        self.event_sink(TracingSink::new())
    }

    /// Enables metrics reporting with the given OpenTelemetry meter provider.
    #[must_use]
    #[cfg(any(feature = "metrics", test))]
    pub fn enable_metrics(self, provider: &dyn opentelemetry::metrics::MeterProvider) -> Self {
        self.event_sink(crate::telemetry::MetricsSink::new(provider))
    }

    /// Builds the engine.
    #[must_use]
    pub fn build(self) -> ResilienceEngine<E> {
        let emitter = Emitter::new(self.sinks, self.clock.clone());

        ResilienceEngine {
            inner: Arc::new(EngineInner {
                registry: self.registry,
                circuits: CircuitRegistry::new(self.clock.clone()),
                clock: self.clock,
                emitter,
            }),
        }
    }
}
