// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Request quota tracking
//!
//! Helpdesk providers report the size of the current rate-limit window and
//! how much of it is left on every response, but not when the window resets.
//! [`RateQuotaTracker`] infers resets from a large upward jump in the
//! remaining count and paces outbound calls so the window's quota is spread
//! across its duration with a safety margin held back.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Tunables for the throttle controller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaPolicy {
    /// Requests held back from the window's total
    pub safety_margin: f64,
    /// Increase in `remaining` that counts as a window reset
    pub jump_threshold: u32,
    /// Wait used before any quota data has been observed
    pub default_delay_secs: f64,
    /// Wait added once `remaining` drops below half the safety margin
    pub hard_brake_secs: f64,
    /// Fraction of the total quota the target pace aims to use
    pub headroom: f64,
    /// Length of the provider's quota window
    pub window_secs: f64,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            safety_margin: 10.0,
            jump_threshold: 10,
            default_delay_secs: 2.0,
            hard_brake_secs: 20.0,
            headroom: 0.8,
            window_secs: 60.0,
        }
    }
}

impl QuotaPolicy {
    /// Braking term for a given remaining quota.
    ///
    /// Grows as `remaining` shrinks and saturates at `hard_brake_secs` below
    /// half the safety margin.
    pub fn brake(&self, remaining: f64) -> f64 {
        if remaining < self.safety_margin / 2.0 {
            self.hard_brake_secs
        } else {
            self.safety_margin / remaining
        }
    }
}

/// Quota state of the current window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuotaWindow {
    pub total: u32,
    pub remaining: u32,
    pub remaining_at_start: u32,
    pub started_at: Instant,
}

/// Components of a throttle decision, kept for logging.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ThrottlePlan {
    pub consumed: f64,
    pub target_secs_per_request: f64,
    pub target_elapsed: f64,
    pub actual_elapsed: f64,
    pub base: f64,
    pub brake: f64,
}

impl ThrottlePlan {
    pub fn total_secs(&self) -> f64 {
        self.base + self.brake
    }
}

/// Tracks a provider's rate-limit window from response metadata.
#[derive(Clone, Debug)]
pub struct RateQuotaTracker {
    policy: QuotaPolicy,
    window: Option<QuotaWindow>,
    /// Set by a rejected call; no call goes out before it
    blocked_until: Option<Instant>,
}

impl RateQuotaTracker {
    pub fn new(policy: QuotaPolicy) -> Self {
        Self {
            policy,
            window: None,
            blocked_until: None,
        }
    }

    /// Current window, `None` until the first response carrying quota data.
    pub fn window(&self) -> Option<QuotaWindow> {
        self.window
    }

    /// Record the quota values reported on a response.
    ///
    /// Returns true when the observation started a new window.
    pub fn observe(&mut self, total: u32, remaining: u32, now: Instant) -> bool {
        let reset = match self.window {
            None => true,
            Some(w) => {
                i64::from(remaining)
                    > i64::from(w.remaining) + i64::from(self.policy.jump_threshold)
            }
        };

        match self.window.as_mut() {
            Some(w) if !reset => {
                w.total = total;
                w.remaining = remaining;
            }
            _ => {
                self.window = Some(QuotaWindow {
                    total,
                    remaining,
                    remaining_at_start: remaining,
                    started_at: now,
                });
            }
        }

        reset
    }

    /// Breakdown of the wait before the next call, `None` without quota data.
    pub fn plan(&self, now: Instant) -> Option<ThrottlePlan> {
        let w = self.window?;
        let policy = &self.policy;

        let total = f64::from(w.total);
        let remaining = f64::from(w.remaining);
        let consumed = f64::from(w.remaining_at_start) - remaining;

        let target_secs_per_request = if total > 0.0 {
            policy.window_secs / (total * policy.headroom)
        } else {
            policy.window_secs
        };
        // Providers reporting a total at or below the margin would make the
        // divisor zero or negative.
        let paced_total = (total - policy.safety_margin).max(1.0);
        let target_elapsed = consumed * policy.window_secs / paced_total;
        let actual_elapsed = now.saturating_duration_since(w.started_at).as_secs_f64();
        let base = (target_elapsed - actual_elapsed).max(0.0);

        Some(ThrottlePlan {
            consumed,
            target_secs_per_request,
            target_elapsed,
            actual_elapsed,
            base,
            brake: policy.brake(remaining),
        })
    }

    /// Hold every call until `until`, after the provider refused one. An
    /// earlier block never shortens a later one.
    pub fn block_until(&mut self, until: Instant) {
        if self.blocked_until.is_none_or(|current| current < until) {
            self.blocked_until = Some(until);
        }
    }

    /// Time left on a block set by [`block_until`](Self::block_until).
    pub fn blocked_for(&self, now: Instant) -> Duration {
        self.blocked_until
            .map(|until| until.saturating_duration_since(now))
            .unwrap_or_default()
    }

    /// How long to wait before the next outbound call.
    pub fn time_to_wait(&self, now: Instant) -> Duration {
        let secs = match self.plan(now) {
            Some(plan) => plan.total_secs(),
            None => self.policy.default_delay_secs,
        };
        let paced = Duration::try_from_secs_f64(secs.max(0.0))
            .unwrap_or_else(|_| Duration::from_secs_f64(self.policy.hard_brake_secs.max(0.0)));
        paced.max(self.blocked_for(now))
    }
}
