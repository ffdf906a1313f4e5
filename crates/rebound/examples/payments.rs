// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Simulates an outage of a payment gateway.
//!
//! Charges are retried with exponential backoff. Once too many of them fail, the circuit of the
//! operation opens and further charges are rejected without reaching the gateway. After the
//! open duration a trial charge probes the gateway and, once it recovered, the circuit closes.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_stdout::MetricExporter;
use rebound::{
    Backoff, CircuitOptions, ExecutionOutcome, FailureCategory, Jitter, OperationKey, Policy, PolicyRegistry, ResilienceEngine,
};
use tick::Clock;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug)]
enum GatewayError {
    Unavailable,
    CardDeclined,
}

struct Gateway {
    requests: AtomicU32,
}

impl Gateway {
    // The gateway is down for the first 40 requests.
    async fn charge(&self, amount: u32) -> Result<String, GatewayError> {
        let request = self.requests.fetch_add(1, Ordering::Relaxed);

        if request < 40 {
            Err(GatewayError::Unavailable)
        } else if amount > 500 {
            Err(GatewayError::CardDeclined)
        } else {
            Ok(format!("receipt-{request}"))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let meter_provider = configure_telemetry();

    let key = OperationKey::method("Gateway", "charge");
    let policy = Policy::builder()
        .max_attempts(3)
        .backoff(Backoff::exponential(Duration::from_millis(20), 2.0).max_delay(Duration::from_millis(200)))
        .jitter(Jitter::Equal)
        .categorize_with(|e: &GatewayError| match e {
            GatewayError::Unavailable => FailureCategory::from("unavailable"),
            GatewayError::CardDeclined => FailureCategory::from("declined"),
        })
        .no_retry_on(["declined"])
        .fail_on(["unavailable"])
        // Decrease the following values to see the circuit trip faster
        .circuit(
            CircuitOptions::default()
                .minimum_calls(6)
                .failure_rate_threshold(0.5)
                .open_duration(Duration::from_millis(500)),
        )
        .build()?;

    let clock = Clock::new_tokio();
    let engine = ResilienceEngine::builder(&clock)
        .registry(PolicyRegistry::new().register(key.clone(), policy)?)
        .enable_logs()
        .enable_metrics(&meter_provider)
        .build();

    let gateway = Gateway {
        requests: AtomicU32::new(0),
    };

    for charge in 0..40 {
        clock.delay(Duration::from_millis(50)).await;

        let amount = if charge % 10 == 9 { 900 } else { 100 };
        let outcome = engine.execute(key.clone(), || gateway.charge(amount)).await?;

        match outcome {
            ExecutionOutcome::Success(receipt) => println!("{charge}: charged {amount}, {receipt}"),
            ExecutionOutcome::Failure { cause, retryable } => println!("{charge}: failed with {cause:?} (retryable: {retryable})"),
            ExecutionOutcome::CircuitOpen(e) => println!("{charge}: {e}"),
            ExecutionOutcome::Cancelled => println!("{charge}: cancelled"),
        }
    }

    println!("circuit is {:?}", engine.circuit_state(key));

    // Flush metrics to stdout before exiting
    meter_provider.force_flush()?;

    Ok(())
}

fn configure_telemetry() -> SdkMeterProvider {
    tracing_subscriber::registry().with(tracing_subscriber::fmt::layer()).init();

    SdkMeterProvider::builder()
        .with_periodic_exporter(MetricExporter::default())
        .build()
}
