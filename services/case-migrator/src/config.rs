// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Configuration for the case migrator
//!
//! Connection details and credentials come from environment variables (see
//! [`MigratorConfig::from_env`]). Tunables can additionally be overlaid from
//! a JSON file named by `CONFIG_FILE` (see [`ConfigOverlay`]); credentials
//! are never read from it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use helpdesk_types::JobKind;

use crate::jobs::ingest::IngestSettings;
use crate::jobs::publish::PublishSettings;
use crate::liveness::LivenessPolicy;
use crate::quota::QuotaPolicy;

/// Base URL and basic-auth credentials of one provider.
#[derive(Clone, Default)]
pub struct Endpoint {
    pub base_url: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("base_url", &self.base_url)
            .field("username", &"****")
            .field("password", &"****")
            .finish()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MigratorConfig {
    /// Source helpdesk. Not read from the config file.
    #[serde(skip)]
    pub desk: Endpoint,

    /// Destination helpdesk. Not read from the config file.
    #[serde(skip)]
    pub freshdesk: Endpoint,

    /// SQLite database holding the migrated cases
    pub database_path: PathBuf,

    pub http_timeout_secs: u64,

    /// Wait assumed after a 429 that carries no reset header
    pub fallback_reset_secs: u64,

    /// Seconds between scheduled runs in `serve`
    pub schedule_interval_secs: u64,

    pub ingest_run_minutes: u64,
    pub publish_run_minutes: u64,

    /// Age at which another runner's heartbeat is considered dead
    pub stale_after_secs: u64,

    pub idle_wait_secs: u64,

    pub quota: QuotaPolicy,
    pub ingest: IngestSettings,
    pub publish: PublishSettings,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            desk: Endpoint::default(),
            freshdesk: Endpoint::default(),
            database_path: PathBuf::from("case-migrator.db"),
            http_timeout_secs: 30,
            fallback_reset_secs: 60,
            schedule_interval_secs: 60,
            ingest_run_minutes: 20,
            publish_run_minutes: 1,
            stale_after_secs: 120,
            idle_wait_secs: 5,
            quota: QuotaPolicy::default(),
            ingest: IngestSettings::default(),
            publish: PublishSettings::default(),
        }
    }
}

impl MigratorConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |name: &str| {
            var(name).with_context(|| format!("{} environment variable required", name))
        };
        let defaults = Self::default();

        let desk = Endpoint {
            base_url: required("DESK_URL")?,
            username: required("DESK_USERNAME")?,
            password: required("DESK_PASSWORD")?,
        };
        // Freshdesk authenticates with the API key as user and a dummy password
        let freshdesk = Endpoint {
            base_url: required("FRESHDESK_URL")?,
            username: required("FRESHDESK_API_KEY")?,
            password: "X".to_string(),
        };

        let database_path = var("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.database_path);

        let mut ingest = defaults.ingest;
        ingest.concurrency = parse_or(&var, "INGEST_CONCURRENCY", ingest.concurrency)?;
        ingest.page_size = parse_or(&var, "INGEST_PAGE_SIZE", ingest.page_size)?;
        if let Some(raw) = var("CREATED_BEFORE") {
            let cutoff = DateTime::parse_from_rfc3339(&raw).context("Invalid CREATED_BEFORE")?;
            ingest.created_before = Some(cutoff.with_timezone(&Utc));
        }
        if let Some(raw) = var("EXCLUDED_SENDERS") {
            ingest.excluded_senders = split_list(&raw);
        }
        ingest.tag_source = var("TAG_SOURCE").filter(|t| !t.is_empty());

        let mut publish = defaults.publish;
        publish.concurrency = parse_or(&var, "PUBLISH_CONCURRENCY", publish.concurrency)?;
        publish.page_size = parse_or(&var, "PUBLISH_PAGE_SIZE", publish.page_size)?;
        if let Some(tag) = var("TICKET_TAG") {
            publish.ticket_tag = tag;
        }

        Ok(Self {
            desk,
            freshdesk,
            database_path,
            http_timeout_secs: parse_or(&var, "HTTP_TIMEOUT_SECS", defaults.http_timeout_secs)?,
            fallback_reset_secs: parse_or(
                &var,
                "FALLBACK_RESET_SECS",
                defaults.fallback_reset_secs,
            )?,
            schedule_interval_secs: parse_or(
                &var,
                "SCHEDULE_INTERVAL_SECS",
                defaults.schedule_interval_secs,
            )?,
            ingest_run_minutes: parse_or(&var, "INGEST_RUN_MINUTES", defaults.ingest_run_minutes)?,
            publish_run_minutes: parse_or(
                &var,
                "PUBLISH_RUN_MINUTES",
                defaults.publish_run_minutes,
            )?,
            stale_after_secs: parse_or(&var, "STALE_AFTER_SECS", defaults.stale_after_secs)?,
            idle_wait_secs: parse_or(&var, "IDLE_WAIT_SECS", defaults.idle_wait_secs)?,
            quota: defaults.quota,
            ingest,
            publish,
        })
    }

    /// Apply the keys present in `overlay`, keeping every other setting and
    /// the endpoints.
    pub fn merge_tunables(&mut self, overlay: &ConfigOverlay) -> Result<()> {
        let mut merged =
            serde_json::to_value(&*self).context("Failed to serialize configuration")?;
        merge_json(&mut merged, Value::Object(overlay.0.clone()));
        let tunables: MigratorConfig =
            serde_json::from_value(merged).context("Invalid value in config file")?;

        let desk = std::mem::take(&mut self.desk);
        let freshdesk = std::mem::take(&mut self.freshdesk);
        *self = MigratorConfig {
            desk,
            freshdesk,
            ..tunables
        };
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn fallback_reset(&self) -> Duration {
        Duration::from_secs(self.fallback_reset_secs)
    }

    pub fn schedule_interval(&self) -> Duration {
        Duration::from_secs(self.schedule_interval_secs.max(1))
    }

    /// Liveness timing for one job.
    pub fn liveness(&self, job: JobKind) -> LivenessPolicy {
        let minutes = match job {
            JobKind::Ingest => self.ingest_run_minutes,
            JobKind::Publish => self.publish_run_minutes,
        };
        LivenessPolicy {
            stale_after: Duration::from_secs(self.stale_after_secs),
            run_for: Duration::from_secs(minutes * 60),
            idle_wait: Duration::from_secs(self.idle_wait_secs),
        }
    }
}

/// Tunables read from a JSON file. Only the keys it holds are applied, at any
/// depth, so `{"ingest": {"concurrency": 10}}` leaves the rest of `ingest`
/// alone.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverlay(Map<String, Value>);

impl ConfigOverlay {
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        match serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        {
            Value::Object(map) => Ok(Self(map)),
            _ => bail!("Config file {} must hold a JSON object", path.display()),
        }
    }
}

fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                merge_json(base.entry(key).or_insert(Value::Null), value);
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}", name)),
        None => Ok(default),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
