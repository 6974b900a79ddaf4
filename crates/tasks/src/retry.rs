// Copyright 2026 Element Creations Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Exponential backoff around storage operations

use std::{future::Future, time::Duration};

use sweeper_storage::RepositoryError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::DeleteError;

/// How transient storage failures are retried
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// How many times a failed operation is retried. Zero disables retries.
    pub max_retries: u32,

    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Upper bound on the delay between two attempts
    pub max_delay: Duration,

    /// Factor applied to the delay after each attempt
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy which never retries
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// The delay to wait after the given (zero-based) failed attempt
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = self.backoff_multiplier.powi(exponent);

        Duration::try_from_secs_f64(self.initial_delay.as_secs_f64() * factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Run `operation` until it succeeds, fails with a non-transient error, or
/// the policy runs out of retries.
///
/// Cancelling the token interrupts the wait between two attempts, in which
/// case the last error is returned.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancellation_token: &CancellationToken,
    operation: &'static str,
    mut make_attempt: F,
) -> Result<T, DeleteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RepositoryError>>,
{
    let max_attempts = policy.max_retries.saturating_add(1);
    let mut attempt = 0;

    loop {
        let error = match make_attempt().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(operation, attempt = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        if !error.is_transient() {
            return Err(DeleteError::Query(error));
        }

        attempt += 1;
        if attempt >= max_attempts || cancellation_token.is_cancelled() {
            warn!(
                operation,
                error = &error as &dyn std::error::Error,
                attempts = attempt,
                "Operation failed after all retry attempts"
            );
            return Err(DeleteError::Connectivity {
                attempts: attempt,
                source: error,
            });
        }

        let delay = policy.delay_for_attempt(attempt - 1);
        warn!(
            operation,
            error = &error as &dyn std::error::Error,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis(),
            "Transient storage error, will retry after delay"
        );

        tokio::select! {
            () = cancellation_token.cancelled() => {
                return Err(DeleteError::Connectivity {
                    attempts: attempt,
                    source: error,
                });
            }
            () = tokio::time::sleep(delay) => {}
        }
    }
}
