// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

/// Default number of attempts, the first call included.
pub(crate) const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay between attempts when no backoff is configured.
pub(crate) const DEFAULT_DELAY: Duration = Duration::from_millis(100);

/// Default failure rate in `[0.0, 1.0]` that trips an enabled circuit.
pub(crate) const DEFAULT_FAILURE_RATE_THRESHOLD: f64 = 0.5;

/// Default number of most recent outcomes kept by a count based window.
pub(crate) const DEFAULT_WINDOW_SIZE: u32 = 10;

/// Default number of outcomes the window must hold before the failure rate is evaluated.
pub(crate) const DEFAULT_MINIMUM_CALLS: u32 = 5;

/// Default time an open circuit rejects calls before admitting trials.
pub(crate) const DEFAULT_OPEN_DURATION: Duration = Duration::from_secs(30);

/// Default number of concurrent trial calls admitted while half-open.
pub(crate) const DEFAULT_HALF_OPEN_TRIAL_PERMITS: u32 = 1;

/// Number of buckets a time based window is split into.
pub(crate) const TIME_WINDOW_BUCKETS: u32 = 10;

pub(crate) const ERR_POISONED_LOCK: &str = "poisoned lock - cannot continue execution because circuit state can no longer be trusted";
