// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Retry, backoff and per-operation circuit breaking for fallible async operations.
//!
//! Every operation is identified by an [`OperationKey`] and governed by an immutable
//! [`Policy`]: how many attempts it gets, how long to wait between them, which failures are
//! worth retrying, and whether a circuit breaker guards it. Policies are registered once in a
//! [`PolicyRegistry`]; a [`ResilienceEngine`] then runs operations under the policy of their
//! key and keeps the circuit state of every key.
//!
//! # Runtime Agnostic Design
//!
//! The engine owns no threads and no runtime. Calls run on the task of the caller and all
//! timing (backoff delays, open durations, per-attempt timeouts) goes through the
//! [`tick::Clock`] the engine is built with, which also makes time fully controllable in tests.
//!
//! # Quick Start
//!
//! ```rust
//! # futures::executor::block_on(async {
//! use std::time::Duration;
//!
//! use rebound::{Backoff, CircuitOptions, ExecutionOutcome, Jitter, Policy, PolicyRegistry, ResilienceEngine};
//! use tick::Clock;
//!
//! #[derive(Debug)]
//! struct TransportError;
//!
//! let registry = PolicyRegistry::new().register(
//!     "PaymentClient.charge",
//!     Policy::<TransportError>::builder()
//!         .max_attempts(3)
//!         .backoff(Backoff::exponential(Duration::from_millis(100), 2.0))
//!         .jitter(Jitter::Full)
//!         .circuit(CircuitOptions::default().minimum_calls(4).open_duration(Duration::from_secs(1)))
//!         .build()?,
//! )?;
//!
//! let engine = ResilienceEngine::builder(&Clock::new_frozen())
//!     .registry(registry)
//!     .enable_logs()
//!     .build();
//!
//! let outcome = engine
//!     .execute("PaymentClient.charge", || async { Ok::<_, TransportError>("charged") })
//!     .await?;
//!
//! assert!(matches!(outcome, ExecutionOutcome::Success("charged")));
//! # Ok::<(), rebound::ConfigurationError>(())
//! # }).unwrap();
//! ```
//!
//! # Classification
//!
//! By default every failure is retried and counts against the circuit. Policies narrow this
//! down with failure categories ([`PolicyBuilder::categorize_with`],
//! [`PolicyBuilder::no_retry_on`], [`PolicyBuilder::fail_on`], ...), a predicate
//! ([`PolicyBuilder::retry_if`]), or by honoring the [`Recovery`] information carried by the
//! error itself ([`PolicyBuilder::honor_recovery`]).
//!
//! # Observability
//!
//! Every attempt, retry, rejection and circuit transition is reported as a [`ResilienceEvent`]
//! to the [`EventSink`]s of the engine. [`EngineBuilder::enable_logs`] turns events into
//! `tracing` events; with the `metrics` feature, `EngineBuilder::enable_metrics` counts them
//! with OpenTelemetry.
//!
//! # Features
//!
//! - `serde`: deserializable `PolicyConfig` and `RegistryConfig`.
//! - `metrics`: OpenTelemetry metrics through `telemetry::MetricsSink`.

pub use recoverable::{Recovery, RecoveryInfo, RecoveryKind};

mod circuit;
mod classify;
mod constants;
mod engine;
mod error;
mod events;
mod fn_wrapper;
mod key;
mod layer;
mod outcome;
mod policy;
mod retry;
mod rnd;

pub mod telemetry;

pub use circuit::{CircuitOptions, CircuitState, SlidingWindow};
pub use classify::{Classification, FailureCategory, FailureClassifier};
pub use engine::{EngineBuilder, ResilienceEngine};
pub use error::{CircuitOpenError, ConfigurationError, ResilienceError};
pub use events::{EventKind, EventSink, OutcomeKind, ResilienceEvent};
pub use key::OperationKey;
pub use layer::{Resilient, ResilientLayer};
pub use outcome::ExecutionOutcome;
pub use policy::backoff::{Backoff, Jitter};
#[cfg(feature = "serde")]
pub use policy::config::{BackoffConfig, CircuitConfig, PolicyConfig, RegistryConfig, WindowConfig};
pub use policy::registry::PolicyRegistry;
pub use policy::{Policy, PolicyBuilder};
pub use rnd::RandomSource;
pub use tokio_util::sync::CancellationToken;

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod testing;
