// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! In-process trigger for both jobs
//!
//! Every tick starts an invocation of each job. Invocations overlap freely;
//! the job's liveness guard turns all but one of them into no-ops.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, error, info, info_span};

use helpdesk_types::JobKind;

use crate::context::MigratorContext;
use crate::liveness::GuardOutcome;

/// Trigger both jobs every `interval` until `shutdown` resolves.
///
/// Runs still in flight at shutdown are aborted; their heartbeats go stale
/// and the next process takes over after the staleness timeout.
pub async fn serve(
    ctx: Arc<MigratorContext>,
    interval: Duration,
    shutdown: impl Future<Output = ()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut runs: JoinSet<()> = JoinSet::new();
    tokio::pin!(shutdown);

    info!(interval_secs = interval.as_secs_f64(), "Scheduler started");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for job in [JobKind::Ingest, JobKind::Publish] {
                    let ctx = Arc::clone(&ctx);
                    runs.spawn(
                        async move { trigger(&ctx, job).await }
                            .instrument(info_span!("job", job = %job)),
                    );
                }
            }
            Some(joined) = runs.join_next(), if !runs.is_empty() => {
                if let Err(e) = joined {
                    error!(error = %e, "Job task panicked");
                }
            }
            _ = &mut shutdown => {
                info!(in_flight = runs.len(), "Received shutdown signal");
                break;
            }
        }
    }
    runs.shutdown().await;
}

async fn trigger(ctx: &MigratorContext, job: JobKind) {
    match ctx.run_job(job).await {
        Ok(GuardOutcome::Finished { units, reason }) => {
            info!(units, reason = %reason, "Run finished");
        }
        Ok(GuardOutcome::AlreadyRunning) | Ok(GuardOutcome::AlreadyComplete) => {}
        Err(e) => error!(error = %e, "Run failed"),
    }
}
