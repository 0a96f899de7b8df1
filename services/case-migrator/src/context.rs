// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Wiring of the store, provider clients, jobs and their guards

use std::sync::Arc;

use anyhow::{Context, Result};

use helpdesk_types::{CaseCounts, DestinationId, JobKind};

use crate::config::{Endpoint, MigratorConfig};
use crate::error::TransferError;
use crate::jobs::JobError;
use crate::jobs::ingest::IngestJob;
use crate::jobs::publish::{self, PublishJob};
use crate::liveness::{GuardOutcome, LivenessGuard, RunState};
use crate::provider::desk::{self, DeskSource};
use crate::provider::freshdesk::{self, FreshdeskDestination};
use crate::provider::{DestinationApi, SourceApi};
use crate::stats::JobStats;
use crate::store::{CaseStore, StoreError};
use crate::throttle::{ClientSettings, QuotaHeaders, ThrottledClient};

/// Everything a command needs, shared by the CLI and the scheduler.
pub struct MigratorContext {
    store: CaseStore,
    ingest: IngestJob,
    publish: PublishJob,
    ingest_guard: LivenessGuard,
    publish_guard: LivenessGuard,
    destination: Arc<dyn DestinationApi>,
}

/// Case counts plus the stats of both jobs.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub counts: CaseCounts,
    pub jobs: Vec<(JobKind, Vec<(String, String)>)>,
}

impl MigratorContext {
    /// Open the store and build clients for both providers
    pub fn new(config: &MigratorConfig) -> Result<Self> {
        let store = CaseStore::open(&config.database_path).with_context(|| {
            format!(
                "Failed to open case store: {}",
                config.database_path.display()
            )
        })?;

        let source = DeskSource::new(
            client(config, "desk", &config.desk, desk::QUOTA_HEADERS)
                .context("Failed to create desk client")?,
        );
        let destination = FreshdeskDestination::new(
            client(config, "freshdesk", &config.freshdesk, freshdesk::QUOTA_HEADERS)
                .context("Failed to create freshdesk client")?,
        );

        Ok(Self::with_providers(
            config,
            store,
            Arc::new(source),
            Arc::new(destination),
        ))
    }

    /// Assemble a context around already-built providers
    pub fn with_providers(
        config: &MigratorConfig,
        store: CaseStore,
        source: Arc<dyn SourceApi>,
        destination: Arc<dyn DestinationApi>,
    ) -> Self {
        let ingest = IngestJob::new(source, store.clone(), config.ingest.clone());
        let publish = PublishJob::new(
            Arc::clone(&destination),
            store.clone(),
            config.publish.clone(),
        );
        let ingest_guard = LivenessGuard::new(
            ingest.stats().clone(),
            RunState::new(),
            config.liveness(JobKind::Ingest),
        );
        let publish_guard = LivenessGuard::new(
            publish.stats().clone(),
            RunState::new(),
            config.liveness(JobKind::Publish),
        );

        Self {
            store,
            ingest,
            publish,
            ingest_guard,
            publish_guard,
            destination,
        }
    }

    pub fn store(&self) -> &CaseStore {
        &self.store
    }

    pub fn stats(&self, job: JobKind) -> &JobStats {
        match job {
            JobKind::Ingest => self.ingest.stats(),
            JobKind::Publish => self.publish.stats(),
        }
    }

    /// Invoke a job through its guard
    pub async fn run_job(&self, job: JobKind) -> Result<GuardOutcome, JobError> {
        match job {
            JobKind::Ingest => self.ingest_guard.run(&self.ingest).await,
            JobKind::Publish => self.publish_guard.run(&self.publish).await,
        }
    }

    pub async fn status(&self) -> Result<StatusReport, StoreError> {
        let counts = self.store.counts().await?;
        let mut jobs = Vec::new();
        for job in [JobKind::Ingest, JobKind::Publish] {
            jobs.push((job, self.stats(job).snapshot().await?));
        }
        Ok(StatusReport { counts, jobs })
    }

    /// Clear a job's complete flag so the next run scans again
    pub async fn reopen(&self, job: JobKind) -> Result<(), StoreError> {
        self.stats(job).reopen().await
    }

    pub async fn probe(&self) -> Result<DestinationId, TransferError> {
        publish::probe(self.destination.as_ref()).await
    }
}

fn client(
    config: &MigratorConfig,
    provider: &'static str,
    endpoint: &Endpoint,
    headers: QuotaHeaders,
) -> Result<ThrottledClient> {
    ThrottledClient::new(ClientSettings {
        provider,
        base_url: endpoint.base_url.clone(),
        username: endpoint.username.clone(),
        password: endpoint.password.clone(),
        timeout: config.http_timeout(),
        headers,
        policy: config.quota.clone(),
        fallback_reset: config.fallback_reset(),
    })
}
