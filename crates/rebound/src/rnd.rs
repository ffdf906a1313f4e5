// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;
use std::sync::Arc;

/// Source of uniformly distributed values in `[0.0, 1.0)` used for backoff jitter.
///
/// This source is **NOT cryptographically secure**. Jitter only needs to spread retries of
/// concurrent callers apart, so the default source is the thread-local `fastrand` generator.
///
/// Tests can make jitter reproducible with [`RandomSource::fixed`] or [`RandomSource::from_fn`]:
///
/// ```
/// use rebound::RandomSource;
///
/// let rnd = RandomSource::fixed(0.25);
/// assert_eq!(rnd.next_f64(), 0.25);
/// ```
#[derive(Clone, Default)]
pub struct RandomSource(Kind);

#[derive(Clone, Default)]
enum Kind {
    #[default]
    Fastrand,
    Custom(Arc<dyn Fn() -> f64 + Send + Sync>),
}

impl Debug for RandomSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Kind::Fastrand => write!(f, "Fastrand"),
            Kind::Custom(_) => write!(f, "Custom"),
        }
    }
}

impl RandomSource {
    /// Creates a source that always yields `value`, clamped to `[0.0, 1.0]`.
    #[must_use]
    pub fn fixed(value: f64) -> Self {
        let value = value.clamp(0.0, 1.0);
        Self(Kind::Custom(Arc::new(move || value)))
    }

    /// Creates a source backed by a custom generator.
    ///
    /// Values outside `[0.0, 1.0]` are clamped when consumed.
    #[must_use]
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        Self(Kind::Custom(Arc::new(f)))
    }

    /// Returns the next value in `[0.0, 1.0]`.
    #[must_use]
    pub fn next_f64(&self) -> f64 {
        match &self.0 {
            Kind::Fastrand => fastrand::f64(),
            Kind::Custom(generator) => {
                let value = generator();
                if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
            }
        }
    }
}
