use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryLimit {
    Attempts(u32),
    Deadline(Duration),
    /// Keep going until the check succeeds or errors.
    Unbounded,
}

/// Fixed-interval polling shared by instance discovery, boot completion
/// and mount teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub limit: RetryLimit,
}

impl RetryPolicy {
    pub fn attempts(interval: Duration, attempts: u32) -> Self {
        Self {
            interval,
            limit: RetryLimit::Attempts(attempts.max(1)),
        }
    }

    pub fn deadline(interval: Duration, deadline: Duration) -> Self {
        Self {
            interval,
            limit: RetryLimit::Deadline(deadline),
        }
    }

    pub fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            limit: RetryLimit::Unbounded,
        }
    }

    /// Calls `check` until it yields a value. Returns `Ok(None)` once the
    /// limit is exhausted; a check error stops polling immediately.
    pub fn poll<T, F>(&self, mut check: F) -> Result<Option<T>>
    where
        F: FnMut() -> Result<Option<T>>,
    {
        let started = Instant::now();
        let mut attempt = 0_u32;
        loop {
            attempt = attempt.saturating_add(1);
            if let Some(value) = check()? {
                return Ok(Some(value));
            }

            let exhausted = match self.limit {
                RetryLimit::Attempts(max) => attempt >= max,
                RetryLimit::Deadline(deadline) => started.elapsed() >= deadline,
                RetryLimit::Unbounded => false,
            };
            if exhausted {
                return Ok(None);
            }
            thread::sleep(self.interval);
        }
    }
}
