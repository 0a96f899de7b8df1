// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Single-runner guard for long-running jobs
//!
//! Scheduled invocations of a job overlap: a new tick fires while the previous
//! run is still working through its time budget. The guard lets only one of
//! them work. The active runner writes a heartbeat timestamp to the job's
//! stats before every unit of work; an invocation that finds a heartbeat
//! younger than the staleness timeout exits as a no-op. A runner that crashed
//! stops beating, so its heartbeat goes stale and the next invocation takes
//! over. If two runners both saw a stale heartbeat, the one whose heartbeat
//! gets overwritten notices and stops.

use std::sync::{Arc, Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use helpdesk_types::StatKey;

use crate::jobs::JobError;
use crate::pool::KeepGoing;
use crate::retry::duration_secs;
use crate::stats::JobStats;

static NEXT_RUNNER: AtomicU64 = AtomicU64::new(1);

/// Timing of a guarded run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessPolicy {
    /// Age after which a heartbeat is presumed to belong to a dead runner
    #[serde(with = "duration_secs")]
    pub stale_after: Duration,
    /// Time budget of one run
    #[serde(with = "duration_secs")]
    pub run_for: Duration,
    /// Pause after a unit that found nothing to do
    #[serde(with = "duration_secs")]
    pub idle_wait: Duration,
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(120),
            run_for: Duration::from_secs(20 * 60),
            idle_wait: Duration::from_secs(5),
        }
    }
}

impl LivenessPolicy {
    /// Heartbeats are refreshed this often while a unit is in progress.
    fn beat_every(&self) -> Duration {
        (self.stale_after / 4).max(Duration::from_millis(10))
    }
}

#[derive(Clone, Debug, Default)]
pub struct RunSnapshot {
    pub runner: Option<u64>,
    pub deadline: Option<Instant>,
    pub heartbeat: Option<DateTime<Utc>>,
    pub complete: bool,
    pub superseded: bool,
}

/// In-memory state of a job's active runner.
///
/// Shared by handle between the guard and the workers of the run; reset when
/// the runner exits, however it exits.
#[derive(Debug, Default)]
pub struct RunState {
    inner: Mutex<RunSnapshot>,
}

impl RunState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, RunSnapshot> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::error!("Run state mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn snapshot(&self) -> RunSnapshot {
        self.lock().clone()
    }

    fn claim(self: &Arc<Self>, deadline: Instant) -> Option<Claim> {
        let mut inner = self.lock();
        if inner.runner.is_some() {
            return None;
        }
        let runner = NEXT_RUNNER.fetch_add(1, Ordering::Relaxed);
        *inner = RunSnapshot {
            runner: Some(runner),
            deadline: Some(deadline),
            ..RunSnapshot::default()
        };
        Some(Claim {
            state: Arc::clone(self),
            runner,
        })
    }

    fn beat(&self, runner: u64, at: DateTime<Utc>) {
        let mut inner = self.lock();
        if inner.runner == Some(runner) {
            inner.heartbeat = Some(at);
        }
    }

    fn mark_complete(&self, runner: u64) {
        let mut inner = self.lock();
        if inner.runner == Some(runner) {
            inner.complete = true;
        }
    }

    fn supersede(&self, runner: u64) {
        let mut inner = self.lock();
        if inner.runner == Some(runner) {
            inner.superseded = true;
        }
    }

    fn release(&self, runner: u64) {
        let mut inner = self.lock();
        if inner.runner == Some(runner) {
            *inner = RunSnapshot::default();
        }
    }
}

/// Ownership of a [`RunState`]; dropping it clears the state.
struct Claim {
    state: Arc<RunState>,
    runner: u64,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.state.release(self.runner);
    }
}

/// Handed to each unit of work; tells workers whether to keep going.
#[derive(Clone)]
pub struct RunToken {
    state: Arc<RunState>,
    runner: u64,
    deadline: Instant,
}

impl RunToken {
    pub fn deadline_passed(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Deadline not passed, job not complete, and this runner still owns the
    /// heartbeat.
    pub fn keep_going(&self) -> bool {
        if self.deadline_passed() {
            return false;
        }
        let inner = self.state.lock();
        inner.runner == Some(self.runner) && !inner.complete && !inner.superseded
    }

    pub fn predicate(&self) -> KeepGoing {
        let token = self.clone();
        Arc::new(move || token.keep_going())
    }
}

/// What one unit of work achieved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitOutcome {
    /// Work was done; run another unit right away
    Progressed,
    /// Nothing to do right now
    Idle,
    /// The job is finished for good
    Complete,
}

/// One iteration of a guarded job, e.g. fetching and processing one page.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn run_unit(&self, token: &RunToken) -> Result<UnitOutcome, JobError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum StopReason {
    Deadline,
    Complete,
    Superseded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuardOutcome {
    /// Another runner holds a fresh heartbeat
    AlreadyRunning,
    /// The job was marked complete earlier
    AlreadyComplete,
    Finished { units: u64, reason: StopReason },
}

/// Runs a job's units under the single-runner protocol.
pub struct LivenessGuard {
    stats: JobStats,
    state: Arc<RunState>,
    policy: LivenessPolicy,
}

impl LivenessGuard {
    pub fn new(stats: JobStats, state: Arc<RunState>, policy: LivenessPolicy) -> Self {
        Self {
            stats,
            state,
            policy,
        }
    }

    pub fn state(&self) -> &Arc<RunState> {
        &self.state
    }

    /// Run `work` until the deadline passes, the job completes, or another
    /// runner takes over. Returns at once when a live runner exists.
    pub async fn run<W: UnitOfWork + ?Sized>(&self, work: &W) -> Result<GuardOutcome, JobError> {
        let job = self.stats.job();

        if self.state.snapshot().complete || self.stats.is_complete().await? {
            info!(job = %job, "Job already complete, nothing to do");
            return Ok(GuardOutcome::AlreadyComplete);
        }

        if let Some(beat) = self.stats.heartbeat().await? {
            let age = Utc::now().signed_duration_since(beat);
            if age.to_std().map(|a| a < self.policy.stale_after).unwrap_or(true) {
                info!(job = %job, heartbeat = %beat, "Another runner is active, exiting");
                return Ok(GuardOutcome::AlreadyRunning);
            }
            warn!(job = %job, heartbeat = %beat, "Taking over from stale runner");
        }

        let deadline = Instant::now() + self.policy.run_for;
        let Some(claim) = self.state.claim(deadline) else {
            info!(job = %job, "Another runner is active in this process, exiting");
            return Ok(GuardOutcome::AlreadyRunning);
        };
        let token = RunToken {
            state: Arc::clone(&self.state),
            runner: claim.runner,
            deadline,
        };

        let until = Utc::now()
            + chrono::Duration::from_std(self.policy.run_for).unwrap_or(chrono::Duration::zero());
        self.stats
            .record(StatKey::State, &format!("running until {}", until.to_rfc3339()))
            .await;
        info!(job = %job, until = %until, "Runner started");

        let mut ours = Utc::now();
        let mut units = 0u64;
        let result = self.run_loop(work, &token, &mut ours, &mut units).await;

        let reason = result.as_ref().ok().copied();
        if reason != Some(StopReason::Superseded) {
            match self.stats.clear_heartbeat(ours).await {
                Ok(true) => {}
                Ok(false) => warn!(job = %job, "Heartbeat changed before it could be cleared"),
                Err(e) => error!(job = %job, error = %e, "Failed to clear heartbeat"),
            }
        }
        let state = if reason == Some(StopReason::Complete) {
            "transfer complete"
        } else {
            "stopped"
        };
        self.stats.record(StatKey::State, state).await;
        drop(claim);

        let reason = result?;
        info!(job = %job, units, reason = %reason, "Runner stopped");
        Ok(GuardOutcome::Finished { units, reason })
    }

    async fn run_loop<W: UnitOfWork + ?Sized>(
        &self,
        work: &W,
        token: &RunToken,
        ours: &mut DateTime<Utc>,
        units: &mut u64,
    ) -> Result<StopReason, JobError> {
        let job = self.stats.job();
        self.write_beat(token, ours).await?;

        loop {
            if token.deadline_passed() {
                return Ok(StopReason::Deadline);
            }
            if *units > 0 && !self.refresh_beat(token, ours).await? {
                return Ok(StopReason::Superseded);
            }

            let outcome = self.run_unit_beating(work, token, ours).await?;
            *units += 1;

            match outcome {
                UnitOutcome::Complete => {
                    self.stats.mark_complete().await?;
                    self.state.mark_complete(token.runner);
                    info!(job = %job, "Transfer complete");
                    return Ok(StopReason::Complete);
                }
                UnitOutcome::Idle => {
                    let left = token.deadline.saturating_duration_since(Instant::now());
                    let wait = self.policy.idle_wait.min(left);
                    debug!(job = %job, secs = wait.as_secs_f64(), "Nothing to do, waiting");
                    tokio::time::sleep(wait).await;
                }
                UnitOutcome::Progressed => {}
            }

            if self.state.snapshot().superseded {
                return Ok(StopReason::Superseded);
            }
            if self.stats.heartbeat().await? != Some(*ours) {
                error!(job = %job, "Heartbeat superseded by another runner, stopping");
                self.state.supersede(token.runner);
                return Ok(StopReason::Superseded);
            }
        }
    }

    /// Run one unit, refreshing the heartbeat while it is in progress.
    async fn run_unit_beating<W: UnitOfWork + ?Sized>(
        &self,
        work: &W,
        token: &RunToken,
        ours: &mut DateTime<Utc>,
    ) -> Result<UnitOutcome, JobError> {
        let unit = work.run_unit(token);
        tokio::pin!(unit);
        let mut ticker = tokio::time::interval(self.policy.beat_every());
        ticker.tick().await;
        let mut beating = true;

        loop {
            tokio::select! {
                outcome = &mut unit => return outcome,
                _ = ticker.tick(), if beating => {
                    if !self.refresh_beat(token, ours).await? {
                        // Let the unit wind down; workers see the flag
                        beating = false;
                    }
                }
            }
        }
    }

    async fn write_beat(&self, token: &RunToken, ours: &mut DateTime<Utc>) -> Result<(), JobError> {
        let now = Utc::now().max(*ours + chrono::Duration::nanoseconds(1));
        self.stats.beat(now).await?;
        self.state.beat(token.runner, now);
        *ours = now;
        Ok(())
    }

    /// Write a new heartbeat unless another runner has replaced ours.
    async fn refresh_beat(
        &self,
        token: &RunToken,
        ours: &mut DateTime<Utc>,
    ) -> Result<bool, JobError> {
        if self.stats.heartbeat().await? != Some(*ours) {
            error!(job = %self.stats.job(), "Heartbeat superseded by another runner, stopping");
            self.state.supersede(token.runner);
            return Ok(false);
        }
        self.write_beat(token, ours).await?;
        Ok(true)
    }
}
