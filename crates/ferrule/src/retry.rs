//! Exponential-backoff retry around Lookup Service calls.
//!
//! ## State machine
//!
//! ```text
//!             ┌──────────── retryable, budget left: sleep delay(n) ───┐
//!             ▼                                                       │
//! Attempting(n) ──ok──▶ Success                                       │
//!             │                                                       │
//!             └─err──▶ classify ──┬───────────────────────────────────┘
//!                                 └─ not retryable / n == max_retries ─▶ Terminal
//! ```
//!
//! Both the in-flight attempt and the backoff sleep race a [`Cancellation`];
//! whichever side loses is dropped.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use crate::classify::classify;
use crate::error::{ErrorContext, ReferenceError};
use crate::lookup::BoxError;

/// Backoff schedule. Doubles as the `retry:` section of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// When false, every failure is terminal
    pub enabled: bool,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    #[serde(with = "crate::config::duration")]
    pub base_delay: Duration,
    /// Upper bound for any single delay
    #[serde(with = "crate::config::duration")]
    pub max_delay: Duration,
    /// Multiplier applied per attempt
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
            enabled: true,
        }
    }
}

impl RetryConfig {
    /// A schedule that never retries.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// `min(base × factor^attempt, max)`, or zero when disabled.
    ///
    /// `attempt` is 0-indexed: `delay(0)` precedes the first retry.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn delay(&self, attempt: u32) -> Duration {
        if !self.enabled {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.base_delay.as_nanos() as f64 * self.backoff_factor.powi(exponent);
        let cap = self.max_delay.as_nanos() as f64;

        if !scaled.is_finite() || scaled >= cap {
            return self.max_delay;
        }
        Duration::from_nanos(scaled.round() as u64)
    }

    /// Total attempts the loop may make.
    #[must_use]
    pub fn attempt_budget(&self) -> u32 {
        if self.enabled {
            self.max_retries.saturating_add(1)
        } else {
            1
        }
    }
}

/// Cooperative cancellation: an external signal, a deadline, or both.
///
/// Cheap to clone; every clone observes the same signal.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    signal: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

/// Triggers the paired [`Cancellation`].
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    /// Cancel every clone of the paired token.
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

impl Cancellation {
    /// A token that never fires.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// A token plus the handle that fires it.
    #[must_use]
    pub fn pair() -> (CancelHandle, Self) {
        let (tx, rx) = watch::channel(false);
        (
            CancelHandle(tx),
            Self {
                signal: Some(rx),
                deadline: None,
            },
        )
    }

    /// Also fire at `deadline` (the earlier deadline wins).
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// The effective deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the token has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.signal.as_ref().is_some_and(|rx| *rx.borrow())
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolve once the token fires; pending forever if it never can.
    pub async fn cancelled(&self) {
        let signal = async {
            match &self.signal {
                Some(rx) => {
                    let mut rx = rx.clone();
                    // A dropped handle can no longer cancel.
                    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
                        std::future::pending::<()>().await;
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };

        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            () = signal => {}
            () = deadline => {}
        }
    }
}

/// Result of a retried operation plus how many times it was invoked.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// Final value or terminal error
    pub result: Result<T, ReferenceError>,
    /// Number of operation invocations (0 if cancelled before the first)
    pub attempts: u32,
}

/// Run `operation` until it succeeds, fails terminally, or is cancelled.
///
/// The operation receives the 0-indexed attempt number. Failures are
/// classified against `context`; the terminal error carries the number of
/// retries that preceded it.
pub async fn run_with_retry<T, F, Fut>(
    config: &RetryConfig,
    cancel: &Cancellation,
    context: &ErrorContext,
    mut operation: F,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, BoxError>>,
{
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return RetryOutcome {
                result: Err(ReferenceError::cancelled(context.clone(), attempt.saturating_sub(1))),
                attempts: attempt,
            };
        }

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            result = operation(attempt) => Some(result),
        };

        let Some(result) = outcome else {
            debug!(attempt, "Lookup cancelled mid-attempt");
            return RetryOutcome {
                result: Err(ReferenceError::cancelled(context.clone(), attempt)),
                attempts: attempt + 1,
            };
        };

        let raw = match result {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt + 1,
                };
            }
            Err(raw) => raw,
        };

        let error = classify(raw.as_ref(), context, config.enabled).with_retry_count(attempt);

        if !error.retryable || attempt >= config.max_retries {
            debug!(
                kind = %error.kind,
                attempts = attempt + 1,
                error = %error.message,
                "Lookup failed terminally"
            );
            return RetryOutcome {
                result: Err(error),
                attempts: attempt + 1,
            };
        }

        let delay = config.delay(attempt);
        debug!(
            attempt,
            kind = %error.kind,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Retrying lookup after backoff"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(attempt, "Lookup cancelled during backoff");
                return RetryOutcome {
                    result: Err(ReferenceError::cancelled(context.clone(), attempt)),
                    attempts: attempt + 1,
                };
            }
            () = tokio::time::sleep(delay) => {}
        }

        attempt += 1;
    }
}
