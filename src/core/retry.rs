//! Bounded retry with Fibonacci backoff
//!
//! Wraps one unit of work and re-runs it from scratch after a retryable
//! failure. Delays follow the Fibonacci sequence scaled by the initial
//! backoff (500ms, 1s, 1.5s, 2.5s, 4s, ... by default). Cancellation is
//! observed both while the work is in flight and while sleeping.

use crate::core::error::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Errors that can tell whether running the work again may succeed
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        StoreError::is_retryable(self)
    }
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Retries allowed after the first attempt
    pub max_retries: u32,
    /// First backoff delay, in milliseconds
    pub initial_backoff_ms: u64,
    /// Upper bound on any single delay, in milliseconds
    pub max_backoff_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: None,
        }
    }
}

impl RetryConfig {
    /// Retry without sleeping between attempts
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_backoff_ms: 0,
            max_backoff_ms: None,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Fresh delay schedule for one retry loop
    pub fn backoff(&self) -> FibonacciBackoff {
        FibonacciBackoff::new(
            Duration::from_millis(self.initial_backoff_ms),
            self.max_backoff_ms.map(Duration::from_millis),
        )
    }
}

/// Infinite iterator of Fibonacci-scaled delays
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    previous: Duration,
    current: Duration,
    cap: Option<Duration>,
}

impl FibonacciBackoff {
    pub fn new(base: Duration, cap: Option<Duration>) -> Self {
        FibonacciBackoff {
            previous: Duration::ZERO,
            current: base,
            cap,
        }
    }
}

impl Iterator for FibonacciBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let next = self.previous.saturating_add(self.current);
        self.previous = self.current;
        self.current = next;
        Some(match self.cap {
            Some(cap) => next.min(cap),
            None => next,
        })
    }
}

/// Why a retry loop gave up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// The cancellation token fired
    Cancelled,
    /// A failure that retrying cannot fix
    Permanent { attempts: u32, error: E },
    /// Every allowed attempt failed with a retryable error
    Exhausted { attempts: u32, last: E },
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Cancelled => f.write_str("cancelled"),
            RetryError::Permanent { error, .. } => write!(f, "{}", error),
            RetryError::Exhausted { attempts, last } => {
                write!(f, "gave up after {} attempts: {}", attempts, last)
            }
        }
    }
}

/// Run `op` until it succeeds, fails permanently, runs out of attempts or is cancelled
///
/// `op` receives the 1-based attempt number and must redo all of its work
/// on every call; nothing is carried over between attempts.
pub async fn retry<T, E, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + fmt::Display,
{
    let mut backoff = config.backoff();
    let mut attempt = 0;

    loop {
        attempt += 1;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            result = op(attempt) => result,
        };

        let error = match result {
            Ok(value) => return Ok(value),
            Err(error) if !error.is_retryable() => {
                return Err(RetryError::Permanent {
                    attempts: attempt,
                    error,
                })
            }
            Err(error) => error,
        };

        if attempt >= config.max_attempts() {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: error,
            });
        }

        let delay = backoff.next().unwrap_or_default();
        warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "transient failure, retrying"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
