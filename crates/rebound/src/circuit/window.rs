// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::SlidingWindow;
use crate::constants::TIME_WINDOW_BUCKETS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExecutionResult {
    Success,
    Failure,
}

impl ExecutionResult {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Aggregated outcomes of a window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Health {
    calls: u32,
    failures: u32,
    failure_rate: f64,
}

impl Health {
    pub fn new(successes: u32, failures: u32) -> Self {
        let calls = successes.saturating_add(failures);
        let failure_rate = if calls == 0 {
            0.0
        } else {
            f64::from(failures) / f64::from(calls)
        };

        Self {
            calls,
            failures,
            failure_rate,
        }
    }

    #[cfg(test)]
    pub fn calls(&self) -> u32 {
        self.calls
    }

    pub fn failure_rate(&self) -> f64 {
        self.failure_rate
    }

    /// A window without failures is never unhealthy, whatever the threshold.
    pub fn is_unhealthy(&self, threshold: f64, minimum_calls: u32) -> bool {
        self.failures > 0 && self.calls >= minimum_calls && self.failure_rate >= threshold
    }
}

#[derive(Debug)]
pub(crate) enum FailureWindow {
    Count(CountWindow),
    Time(TimeWindow),
}

impl FailureWindow {
    pub fn new(window: SlidingWindow) -> Self {
        match window {
            SlidingWindow::Count(size) => Self::Count(CountWindow::new(size)),
            SlidingWindow::Time(duration) => Self::Time(TimeWindow::new(duration)),
        }
    }

    pub fn record(&mut self, result: ExecutionResult, now: Instant) {
        match self {
            Self::Count(w) => w.record(result),
            Self::Time(w) => w.record(result, now),
        }
    }

    pub fn health(&self, now: Instant) -> Health {
        match self {
            Self::Count(w) => w.health(),
            Self::Time(w) => w.health(now),
        }
    }

    pub fn clear(&mut self) {
        match self {
            Self::Count(w) => w.clear(),
            Self::Time(w) => w.clear(),
        }
    }
}

/// Keeps the last `capacity` outcomes.
#[derive(Debug)]
pub(crate) struct CountWindow {
    outcomes: VecDeque<ExecutionResult>,
    capacity: usize,
    failures: u32,
}

impl CountWindow {
    fn new(capacity: u32) -> Self {
        let capacity = usize::try_from(capacity.max(1)).unwrap_or(usize::MAX);

        Self {
            outcomes: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            failures: 0,
        }
    }

    fn record(&mut self, result: ExecutionResult) {
        if self.outcomes.len() == self.capacity
            && self.outcomes.pop_front() == Some(ExecutionResult::Failure)
        {
            self.failures -= 1;
        }

        if result == ExecutionResult::Failure {
            self.failures += 1;
        }

        self.outcomes.push_back(result);
    }

    fn health(&self) -> Health {
        let calls = u32::try_from(self.outcomes.len()).unwrap_or(u32::MAX);
        Health::new(calls - self.failures, self.failures)
    }

    fn clear(&mut self) {
        self.outcomes.clear();
        self.failures = 0;
    }
}

/// Keeps the outcomes of the last `sampling_duration`, aggregated into buckets so memory stays
/// bounded regardless of throughput.
#[derive(Debug)]
pub(crate) struct TimeWindow {
    sampling_duration: Duration,
    bucket_duration: Duration,
    buckets: VecDeque<Bucket>,
}

impl TimeWindow {
    fn new(sampling_duration: Duration) -> Self {
        Self {
            sampling_duration,
            bucket_duration: sampling_duration / TIME_WINDOW_BUCKETS,
            buckets: VecDeque::with_capacity(TIME_WINDOW_BUCKETS as usize + 1),
        }
    }

    fn record(&mut self, result: ExecutionResult, now: Instant) {
        while let Some(front) = self.buckets.front()
            && self.is_expired(front, now)
        {
            self.buckets.pop_front();
        }

        if let Some(back) = self.buckets.back_mut()
            && now.saturating_duration_since(back.started_at) < self.bucket_duration
        {
            back.update(result);
        } else {
            let mut bucket = Bucket::new(now);
            bucket.update(result);
            self.buckets.push_back(bucket);
        }
    }

    fn health(&self, now: Instant) -> Health {
        let mut successes = 0_u32;
        let mut failures = 0_u32;

        for bucket in self.buckets.iter().filter(|b| !self.is_expired(b, now)) {
            successes = successes.saturating_add(bucket.successes);
            failures = failures.saturating_add(bucket.failures);
        }

        Health::new(successes, failures)
    }

    fn clear(&mut self) {
        self.buckets.clear();
    }

    fn is_expired(&self, bucket: &Bucket, now: Instant) -> bool {
        now.saturating_duration_since(bucket.started_at) > self.sampling_duration
    }
}

#[derive(Debug)]
struct Bucket {
    successes: u32,
    failures: u32,
    started_at: Instant,
}

impl Bucket {
    fn new(started_at: Instant) -> Self {
        Self {
            successes: 0,
            failures: 0,
            started_at,
        }
    }

    fn update(&mut self, result: ExecutionResult) {
        match result {
            ExecutionResult::Success => self.successes = self.successes.saturating_add(1),
            ExecutionResult::Failure => self.failures = self.failures.saturating_add(1),
        }
    }
}
