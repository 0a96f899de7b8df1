// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Bounded retries for per-item work
//!
//! A failing item is retried a fixed number of times with a fixed delay and
//! then handed to a caller-supplied handler that records the terminal failure,
//! so one bad item never aborts its batch. Quota rejections are treated
//! differently: the provider's reset delay is slept and the attempt is not
//! charged against the budget.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::TransferError;

/// Attempt budget and delay between attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "duration_secs")]
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(10),
        }
    }
}

/// Result of running an operation under a [`RetryPolicy`].
#[derive(Debug)]
pub struct Attempted<T> {
    /// Result of the operation, or of the exhaustion handler. `None` when the
    /// run was abandoned because the caller asked to stop.
    pub value: Option<T>,
    /// Attempts charged against the budget
    pub attempts: u32,
    /// Quota rejections waited out
    pub quota_waits: u32,
    pub exhausted: bool,
}

impl<T> Attempted<T> {
    /// Attempts beyond the first, each of which was preceded by a failure.
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Run `op` until it succeeds or the attempt budget is spent.
    ///
    /// `op` receives the 1-based attempt number; a retry after a quota
    /// rejection reuses the same number. When the budget is spent
    /// `on_exhausted` receives the last error and its output becomes the
    /// value. `keep_going` is polled before every sleep and after every quota
    /// wait; if it turns false while attempts remain the run is abandoned
    /// without calling `on_exhausted`, leaving the item for a later run.
    pub async fn run<T, F, Fut, E, EFut>(
        &self,
        label: &str,
        keep_going: &(dyn Fn() -> bool + Send + Sync),
        mut op: F,
        on_exhausted: E,
    ) -> Attempted<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, TransferError>>,
        E: FnOnce(TransferError) -> EFut,
        EFut: Future<Output = T>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempts = 1u32;
        let mut quota_waits = 0u32;

        loop {
            let err = match op(attempts).await {
                Ok(value) => {
                    return Attempted {
                        value: Some(value),
                        attempts,
                        quota_waits,
                        exhausted: false,
                    };
                }
                Err(e) => e,
            };

            if let Some(reset_in) = err.quota_reset() {
                if !keep_going() {
                    return abandoned(attempts, quota_waits);
                }
                info!(
                    label = %label,
                    attempt = attempts,
                    reset_secs = reset_in.as_secs_f64(),
                    "Quota exhausted, waiting for reset"
                );
                quota_waits += 1;
                tokio::time::sleep(reset_in).await;
                if !keep_going() {
                    return abandoned(attempts, quota_waits);
                }
                continue;
            }

            if attempts >= max_attempts {
                error!(
                    label = %label,
                    attempts,
                    error = %err,
                    "Giving up after exhausting retries"
                );
                let value = on_exhausted(err).await;
                return Attempted {
                    value: Some(value),
                    attempts,
                    quota_waits,
                    exhausted: true,
                };
            }

            if !keep_going() {
                warn!(label = %label, attempt = attempts, error = %err, "Stopping before retry");
                return abandoned(attempts, quota_waits);
            }

            warn!(
                label = %label,
                attempt = attempts,
                max_attempts,
                error = %err,
                "Attempt failed, retrying in {}s",
                self.backoff.as_secs_f64()
            );
            tokio::time::sleep(self.backoff).await;
            attempts += 1;
        }
    }
}

fn abandoned<T>(attempts: u32, quota_waits: u32) -> Attempted<T> {
    Attempted {
        value: None,
        attempts,
        quota_waits,
        exhausted: false,
    }
}

/// Serde helper storing a [`Duration`] as fractional seconds.
pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
