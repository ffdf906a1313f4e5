// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use dashmap::DashMap;
use tick::Clock;

use super::{CircuitBreaker, CircuitOptions};
use crate::OperationKey;

/// Keyed store of circuit breakers, created lazily on first use of a key.
///
/// The map is sharded so that unrelated keys do not contend; each breaker synchronizes its own
/// state.
#[derive(Debug)]
pub(crate) struct CircuitRegistry {
    breakers: DashMap<OperationKey, Arc<CircuitBreaker>>,
    clock: Clock,
}

impl CircuitRegistry {
    pub fn new(clock: Clock) -> Self {
        Self {
            breakers: DashMap::new(),
            clock,
        }
    }

    /// Returns the breaker of `key`, creating it with `options` if the key was never used.
    ///
    /// Options only apply on creation; the first policy used with a key decides its circuit.
    pub fn get_or_create(&self, key: &OperationKey, options: &CircuitOptions) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(key) {
            return Arc::clone(breaker.value());
        }

        let entry = self
            .breakers
            .entry(key.clone())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(key.clone(), options.clone(), self.clock.clone())));

        Arc::clone(entry.value())
    }

    pub fn get(&self, key: &OperationKey) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(key).map(|b| Arc::clone(b.value()))
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.breakers.len()
    }
}
