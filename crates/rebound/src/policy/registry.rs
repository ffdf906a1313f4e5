// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ConfigurationError;
use crate::{OperationKey, Policy};

/// Maps operation keys to their policies.
///
/// The registry is filled once at startup and handed to the engine, after which it is
/// read-only. Resolving a key is deterministic and has no side effects.
///
/// ```
/// use rebound::{Policy, PolicyRegistry};
///
/// let registry = PolicyRegistry::<std::io::Error>::new()
///     .register("inventory.lookup", Policy::default())?
///     .register("inventory.reserve", Policy::builder().max_attempts(1).build()?)?;
///
/// assert_eq!(registry.resolve(&"inventory.reserve".into())?.max_attempts(), 1);
/// assert!(registry.resolve(&"billing.charge".into()).is_err());
/// # Ok::<(), rebound::ConfigurationError>(())
/// ```
#[derive(Debug)]
pub struct PolicyRegistry<E> {
    policies: HashMap<OperationKey, Arc<Policy<E>>>,
}

impl<E> Default for PolicyRegistry<E> {
    fn default() -> Self {
        Self { policies: HashMap::new() }
    }
}

impl<E> PolicyRegistry<E> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the policy of an operation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::DuplicateOperation`] if the key is already registered.
    pub fn register(mut self, key: impl Into<OperationKey>, policy: Policy<E>) -> Result<Self, ConfigurationError> {
        let key = key.into();

        if self.policies.contains_key(&key) {
            return Err(ConfigurationError::DuplicateOperation(key));
        }

        self.policies.insert(key, Arc::new(policy));
        Ok(self)
    }

    /// Returns the policy registered for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnknownOperation`] if nothing is registered for the key.
    pub fn resolve(&self, key: &OperationKey) -> Result<Arc<Policy<E>>, ConfigurationError> {
        self.policies
            .get(key)
            .map(Arc::clone)
            .ok_or_else(|| ConfigurationError::UnknownOperation(key.clone()))
    }

    /// Returns `true` if a policy is registered for `key`.
    #[must_use]
    pub fn contains(&self, key: &OperationKey) -> bool {
        self.policies.contains_key(key)
    }

    /// Returns the registered operation keys in no particular order.
    pub fn keys(&self) -> impl Iterator<Item = &OperationKey> {
        self.policies.keys()
    }

    /// Returns the number of registered operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Returns `true` if no operation is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
