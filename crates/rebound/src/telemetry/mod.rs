// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! # Telemetry
//!
//! Well-known attribute keys attached to the logs and metrics produced from
//! [`ResilienceEvent`][crate::ResilienceEvent]s, plus the two built-in sinks:
//!
//! - [`TracingSink`] re-emits every event as a named `tracing` event.
//! - `MetricsSink` (feature `metrics`) counts events on an OpenTelemetry counter.
//!
//! Names follow the [OpenTelemetry naming guidelines](https://opentelemetry.io/docs/specs/semconv/general/naming/#general-naming-considerations):
//! dot-separated keys, short `snake_case` values.

mod logs;
#[cfg(any(feature = "metrics", test))]
mod metrics;

pub use logs::TracingSink;
#[cfg(any(feature = "metrics", test))]
pub use metrics::MetricsSink;

/// Key used to annotate the operation an event belongs to.
///
/// Examples: `inventory.lookup`, `PaymentClient.charge`.
pub const OPERATION_KEY: &str = "resilience.operation.key";

/// Key used to annotate the specific resilience event being emitted.
///
/// Examples: `attempt_failed`, `retry_scheduled`, `circuit_opened`.
pub const EVENT_NAME: &str = "resilience.event.name";

/// Key used to annotate the outcome an event relates to.
///
/// Examples: `success`, `failure`, `rejected`.
pub const OUTCOME: &str = "resilience.outcome";

/// Key used to annotate the state of the circuit after the event.
///
/// Examples: `closed`, `open`, `half_open`.
pub const CIRCUIT_STATE: &str = "resilience.circuit.state";
