// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Per-job statistics persisted for the dashboard

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::warn;

use helpdesk_types::{JobKind, StatKey};

use crate::store::{CaseStore, StoreError};

/// Counters that are reset when a job is seeded.
const COUNTERS: [StatKey; 4] = [
    StatKey::Transferred,
    StatKey::Skipped,
    StatKey::Warnings,
    StatKey::Failures,
];

/// Handle on one job's statistics.
///
/// Counter writes are best effort: a failed write is logged and dropped so
/// dashboard bookkeeping never fails an item transfer.
#[derive(Clone)]
pub struct JobStats {
    job: JobKind,
    store: CaseStore,
}

impl JobStats {
    pub fn new(job: JobKind, store: CaseStore) -> Self {
        Self { job, store }
    }

    pub fn job(&self) -> JobKind {
        self.job
    }

    pub fn store(&self) -> &CaseStore {
        &self.store
    }

    pub fn key(&self, stat: StatKey) -> String {
        stat.scoped(self.job)
    }

    pub async fn get(&self, stat: StatKey) -> Result<Option<String>, StoreError> {
        self.store.stat(&self.key(stat)).await
    }

    pub async fn set(&self, stat: StatKey, value: &str) -> Result<(), StoreError> {
        self.store.set_stat(&self.key(stat), value).await
    }

    /// Add to a counter, logging instead of failing.
    pub async fn incr(&self, stat: StatKey, by: u32) {
        if by == 0 {
            return;
        }
        if let Err(e) = self.store.increment_stat(&self.key(stat), i64::from(by)).await {
            warn!(job = %self.job, stat = %stat, error = %e, "Failed to update stat");
        }
    }

    /// Overwrite a stat, logging instead of failing.
    pub async fn record(&self, stat: StatKey, value: &str) {
        if let Err(e) = self.set(stat, value).await {
            warn!(job = %self.job, stat = %stat, error = %e, "Failed to update stat");
        }
    }

    pub async fn counter(&self, stat: StatKey) -> Result<i64, StoreError> {
        Ok(self
            .get(stat)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    /// Seed the run counters once per job, recording the source total.
    ///
    /// Returns true when this call did the seeding.
    pub async fn seed(&self, starting_entries: u64) -> Result<bool, StoreError> {
        if self.get(StatKey::Initialized).await?.as_deref() == Some("true") {
            return Ok(false);
        }
        let entries = starting_entries.to_string();
        self.set(StatKey::StartingEntries, &entries).await?;
        self.set(StatKey::CasesRemaining, &entries).await?;
        for stat in COUNTERS {
            self.set(stat, "0").await?;
        }
        self.set(StatKey::Initialized, "true").await?;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Heartbeat
    // ------------------------------------------------------------------

    pub async fn heartbeat(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self
            .get(StatKey::Heartbeat)
            .await?
            .and_then(|raw| parse_beat(&raw)))
    }

    pub async fn beat(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.set(StatKey::Heartbeat, &format_beat(at)).await
    }

    /// Clear the heartbeat if it is still `ours`.
    pub async fn clear_heartbeat(&self, ours: DateTime<Utc>) -> Result<bool, StoreError> {
        self.store
            .clear_stat_if(&self.key(StatKey::Heartbeat), &format_beat(ours))
            .await
    }

    // ------------------------------------------------------------------
    // Completion
    // ------------------------------------------------------------------

    pub async fn is_complete(&self) -> Result<bool, StoreError> {
        Ok(self.get(StatKey::Complete).await?.as_deref() == Some("true"))
    }

    pub async fn mark_complete(&self) -> Result<(), StoreError> {
        self.set(StatKey::Complete, "true").await
    }

    pub async fn reopen(&self) -> Result<(), StoreError> {
        self.set(StatKey::Complete, "false").await
    }

    /// All stats of this job, keyed without the job prefix.
    pub async fn snapshot(&self) -> Result<Vec<(String, String)>, StoreError> {
        let prefix = format!("{}.", self.job);
        Ok(self
            .store
            .stats(&prefix)
            .await?
            .into_iter()
            .map(|(k, v)| (k[prefix.len()..].to_string(), v))
            .collect())
    }
}

/// Heartbeats keep full precision so two runners never write the same value.
pub fn format_beat(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn parse_beat(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
