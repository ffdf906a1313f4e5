// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use opentelemetry::metrics::{Counter, Meter, MeterProvider};
use opentelemetry::{InstrumentationScope, KeyValue};

use super::{CIRCUIT_STATE, EVENT_NAME, OPERATION_KEY, OUTCOME};
use crate::{EventSink, ResilienceEvent};

const METER_NAME: &str = "rebound";
const VERSION: &str = "v0.1.0";
const SCHEMA_URL: &str = "https://opentelemetry.io/schemas/1.47.0";

fn create_meter(meter_provider: &dyn MeterProvider) -> Meter {
    meter_provider.meter_with_scope(
        InstrumentationScope::builder(METER_NAME)
            .with_version(VERSION)
            .with_schema_url(SCHEMA_URL)
            .build(),
    )
}

fn create_resilience_event_counter(meter: &Meter) -> Counter<u64> {
    meter
        .u64_counter("resilience.event")
        .with_description("Emitted upon the occurrence of a resilience event.")
        .with_unit("u64")
        .build()
}

/// Counts [`ResilienceEvent`]s on the `resilience.event` OpenTelemetry counter.
///
/// Each increment is annotated with the operation key, the event name, the outcome and, for
/// calls gated by a circuit, the circuit state.
#[derive(Debug, Clone)]
pub struct MetricsSink {
    resilience_events: Counter<u64>,
}

impl MetricsSink {
    /// Creates the counter on a meter obtained from `meter_provider`.
    #[must_use]
    pub fn new(meter_provider: &dyn MeterProvider) -> Self {
        Self {
            resilience_events: create_resilience_event_counter(&create_meter(meter_provider)),
        }
    }
}

impl EventSink for MetricsSink {
    fn emit(&self, event: &ResilienceEvent) {
        let mut attributes = vec![
            KeyValue::new(OPERATION_KEY, event.key().to_string()),
            KeyValue::new(EVENT_NAME, event.kind().as_str()),
            KeyValue::new(OUTCOME, event.outcome().as_str()),
        ];

        if let Some(state) = event.circuit_state() {
            attributes.push(KeyValue::new(CIRCUIT_STATE, state.as_str()));
        }

        self.resilience_events.add(1, &attributes);
    }
}
