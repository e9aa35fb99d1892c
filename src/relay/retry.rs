//! Bounded retry for relay sends
//!
//! Every send goes through [`RetryExecutor::execute`]: transaction-level
//! rejections are retried after a delay until the attempt budget runs out,
//! anything else (a broken session) propagates on the spot.

use crate::metrics::metrics;
use crate::types::TransferRequest;
use crate::wallet::{WalletError, WalletSession};
use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Delay between failed attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DelayStrategy {
    /// Same pause after every failure
    Fixed(Duration),
    /// `base * 2^attempt`, capped at `max`, randomised by `± jitter_factor`
    Exponential {
        base: Duration,
        max: Duration,
        jitter_factor: f64,
    },
}

impl DelayStrategy {
    /// Delay to apply after failed attempt `attempt` (0-indexed)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            DelayStrategy::Fixed(delay) => delay,
            DelayStrategy::Exponential {
                base,
                max,
                jitter_factor,
            } => {
                let exp_backoff = base.as_millis() as f64 * 2_f64.powi(attempt.min(31) as i32);
                let capped_backoff = exp_backoff.min(max.as_millis() as f64);

                let jitter_range = capped_backoff * jitter_factor.clamp(0.0, 1.0);
                let jitter = if jitter_range > 0.0 {
                    rand::thread_rng().gen_range(-jitter_range..=jitter_range)
                } else {
                    0.0
                };
                Duration::from_millis((capped_backoff + jitter).max(0.0) as u64)
            }
        }
    }
}

/// Retry policy: attempt budget, delay function, and which errors are retryable
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,
    pub delay: DelayStrategy,
    pub retryable: fn(&WalletError) -> bool,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay: DelayStrategy::Fixed(delay),
            retryable: WalletError::is_transient,
        }
    }

    /// 5 attempts, 3 s apart
    pub fn domino_default() -> Self {
        Self::fixed(5, Duration::from_millis(3000))
    }

    /// 5 attempts, 3.5 s apart
    pub fn leafway_default() -> Self {
        Self::fixed(5, Duration::from_millis(3500))
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::domino_default()
    }
}

/// Successful result with the attempt count that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome<T> {
    pub value: T,
    pub attempts: u32,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RetryError {
    /// Every attempt failed with a retryable error
    #[error("exhausted after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: WalletError },

    /// A non-retryable error stopped the loop
    #[error("permanent failure on attempt {attempts}: {error}")]
    Permanent { attempts: u32, error: WalletError },
}

impl RetryError {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Permanent { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// One fallible network operation that may be attempted repeatedly
#[async_trait]
pub trait Attempt: Send {
    type Output: Send;

    /// Run attempt number `attempt` (1-based)
    async fn attempt(&mut self, attempt: u32) -> Result<Self::Output, WalletError>;
}

/// A send on an open session
pub struct SendAttempt<'a> {
    pub session: &'a mut dyn WalletSession,
    pub request: &'a TransferRequest,
}

#[async_trait]
impl<'a> Attempt for SendAttempt<'a> {
    type Output = ();

    async fn attempt(&mut self, _attempt: u32) -> Result<(), WalletError> {
        self.session.send(self.request).await
    }
}

/// Runs a fallible wallet operation under a [`RetryPolicy`]
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Invoke `operation` until it succeeds, fails permanently, or the
    /// attempt budget is spent. Every attempt is logged.
    pub async fn execute<A>(
        &self,
        operation_name: &str,
        operation: &mut A,
    ) -> Result<RetryOutcome<A::Output>, RetryError>
    where
        A: Attempt + ?Sized,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..max_attempts {
            let attempt_no = attempt + 1;
            debug!(
                operation = operation_name,
                attempt = attempt_no,
                max_attempts,
                "Executing attempt"
            );
            metrics().send_attempts.inc();

            match operation.attempt(attempt_no).await {
                Ok(value) => {
                    info!(
                        operation = operation_name,
                        attempt = attempt_no,
                        max_attempts,
                        "Attempt succeeded"
                    );
                    return Ok(RetryOutcome {
                        value,
                        attempts: attempt_no,
                    });
                }
                Err(err) => {
                    metrics().send_failures.inc();

                    if !(self.policy.retryable)(&err) {
                        warn!(
                            operation = operation_name,
                            attempt = attempt_no,
                            error = %err,
                            "Permanent error, not retrying"
                        );
                        return Err(RetryError::Permanent {
                            attempts: attempt_no,
                            error: err,
                        });
                    }

                    if attempt_no < max_attempts {
                        let backoff = self.policy.delay.delay_for(attempt);
                        warn!(
                            operation = operation_name,
                            attempt = attempt_no,
                            max_attempts,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %err,
                            "Attempt failed, retrying"
                        );
                        last_error = Some(err);
                        sleep(backoff).await;
                    } else {
                        warn!(
                            operation = operation_name,
                            attempts = attempt_no,
                            error = %err,
                            "All retry attempts exhausted"
                        );
                        last_error = Some(err);
                    }
                }
            }
        }

        Err(RetryError::Exhausted {
            attempts: max_attempts,
            last_error: last_error
                .unwrap_or_else(|| WalletError::Transaction("retry exhausted without error".into())),
        })
    }
}
