// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Decorator that runs a [`Service`] through a [`ResilienceEngine`].
//!
//! ```
//! # futures::executor::block_on(async {
//! use layered::{Execute, Layer, Service};
//! use rebound::{Policy, PolicyRegistry, ResilienceEngine, ResilientLayer};
//! use tick::Clock;
//!
//! let registry = PolicyRegistry::<std::io::Error>::new()
//!     .register("greeter.greet", Policy::builder().build().unwrap())
//!     .unwrap();
//! let engine = ResilienceEngine::builder(&Clock::new_frozen()).registry(registry).build();
//!
//! let service = ResilientLayer::new(&engine, "greeter.greet")
//!     .layer(Execute::new(|name: String| async move { Ok::<_, std::io::Error>(format!("hello {name}")) }));
//!
//! assert_eq!(service.execute("world".to_string()).await.unwrap(), "hello world");
//! # });
//! ```

use std::fmt::{self, Debug, Formatter};

use layered::{Layer, Service};

use crate::{OperationKey, ResilienceEngine, ResilienceError};

/// Wraps services so that every request runs under the policy of one operation key.
pub struct ResilientLayer<E> {
    engine: ResilienceEngine<E>,
    key: OperationKey,
}

impl<E> ResilientLayer<E> {
    /// Creates a layer that resolves the policy of `key` from the registry of `engine`.
    #[must_use]
    pub fn new(engine: &ResilienceEngine<E>, key: impl Into<OperationKey>) -> Self {
        Self {
            engine: engine.clone(),
            key: key.into(),
        }
    }
}

impl<E> Clone for ResilientLayer<E> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            key: self.key.clone(),
        }
    }
}

impl<E> Debug for ResilientLayer<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientLayer").field("key", &self.key).finish_non_exhaustive()
    }
}

impl<S, E> Layer<S> for ResilientLayer<E> {
    type Service = Resilient<S, E>;

    fn layer(&self, inner: S) -> Self::Service {
        Resilient {
            inner,
            engine: self.engine.clone(),
            key: self.key.clone(),
        }
    }
}

/// A service whose requests are retried and circuit broken by a [`ResilienceEngine`].
///
/// The input is cloned for every attempt. The terminal outcome is mapped to
/// `Result<T, ResilienceError<E>>`.
pub struct Resilient<S, E> {
    inner: S,
    engine: ResilienceEngine<E>,
    key: OperationKey,
}

impl<S, E> Resilient<S, E> {
    /// Returns the operation key requests run under.
    #[must_use]
    pub fn key(&self) -> &OperationKey {
        &self.key
    }

    /// Returns the wrapped service.
    #[must_use]
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: Clone, E> Clone for Resilient<S, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            engine: self.engine.clone(),
            key: self.key.clone(),
        }
    }
}

impl<S, E> Debug for Resilient<S, E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resilient").field("key", &self.key).finish_non_exhaustive()
    }
}

impl<S, In, T, E> Service<In> for Resilient<S, E>
where
    S: Service<In, Out = Result<T, E>>,
    In: Clone + Send + Sync,
    T: Send,
    E: Send + Sync + 'static,
{
    type Out = Result<T, ResilienceError<E>>;

    async fn execute(&self, input: In) -> Self::Out {
        self.engine
            .execute(self.key.clone(), || self.inner.execute(input.clone()))
            .await?
            .into_result()
    }
}
