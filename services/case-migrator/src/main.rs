// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Case Migrator
//!
//! Command-line entry point: run either migration leg once, serve both on a
//! schedule, or inspect the local store.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{Table, presets::NOTHING};
use tracing::info;

use case_migrator::config::{ConfigOverlay, MigratorConfig};
use case_migrator::context::MigratorContext;
use case_migrator::liveness::GuardOutcome;
use case_migrator::{metrics, scheduler};
use helpdesk_types::JobKind;

#[derive(Parser)]
#[command(
    name = "case-migrator",
    version,
    about = "Migrate helpdesk cases from Desk to Freshdesk"
)]
struct Cli {
    /// JSON file overriding tunables (credentials always come from the environment)
    #[arg(short, long, global = true, env = "CONFIG_FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy source cases into the local store
    Ingest {
        /// Print Prometheus metrics after the run
        #[arg(long)]
        print_metrics: bool,
    },

    /// Publish stored cases to the destination
    Publish {
        /// Print Prometheus metrics after the run
        #[arg(long)]
        print_metrics: bool,
    },

    /// Run both jobs on a fixed interval until interrupted
    Serve,

    /// Show case counts and job stats
    Status,

    /// List cases that failed terminally
    Failures,

    /// Clear a job's complete flag
    Reopen {
        /// ingest or publish
        job: JobKind,
    },

    /// Create a test ticket with four notes to observe destination quotas
    Probe,
}

fn create_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_header(headers);
    table
}

async fn run_once(ctx: &MigratorContext, job: JobKind, print_metrics: bool) -> Result<()> {
    let outcome = ctx
        .run_job(job)
        .await
        .with_context(|| format!("{} run failed", job))?;
    match outcome {
        GuardOutcome::AlreadyRunning => println!("{} is already running elsewhere", job),
        GuardOutcome::AlreadyComplete => {
            println!("{} is complete; use `reopen {}` to run it again", job, job)
        }
        GuardOutcome::Finished { units, reason } => {
            println!("{} stopped after {} units: {}", job, units, reason)
        }
    }
    if print_metrics {
        print!("{}", metrics::gather_metrics());
    }
    Ok(())
}

async fn print_status(ctx: &MigratorContext) -> Result<()> {
    let report = ctx.status().await.context("Failed to read status")?;

    let mut table = create_table(&["TOTAL", "PUBLISHED", "PENDING", "FAILED"]);
    table.add_row(vec![
        report.counts.total.to_string(),
        report.counts.published.to_string(),
        report.counts.pending.to_string(),
        report.counts.failed.to_string(),
    ]);
    println!("{table}");
    println!();

    let mut table = create_table(&["JOB", "STAT", "VALUE"]);
    for (job, stats) in report.jobs {
        for (stat, value) in stats {
            table.add_row(vec![job.to_string(), stat, value]);
        }
    }
    println!("{table}");
    Ok(())
}

async fn print_failures(ctx: &MigratorContext) -> Result<()> {
    let failed = ctx
        .store()
        .failed_cases()
        .await
        .context("Failed to list failed cases")?;

    let mut table = create_table(&["SOURCE ID", "SUBJECT", "REASON"]);
    for case in failed {
        table.add_row(vec![
            case.source_id.to_string(),
            case.subject.unwrap_or_default(),
            case.failure.unwrap_or_default(),
        ]);
    }
    println!("{table}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "case_migrator=info".to_string()),
        ))
        .init();

    let mut config = MigratorConfig::from_env().context("Failed to load configuration")?;
    if let Some(path) = &cli.config {
        let overlay = ConfigOverlay::from_file(path).await?;
        config
            .merge_tunables(&overlay)
            .with_context(|| format!("Failed to apply config file: {}", path.display()))?;
        info!(config_file = %path.display(), "Loaded config file");
    }
    info!(
        database = %config.database_path.display(),
        desk = %config.desk.base_url,
        freshdesk = %config.freshdesk.base_url,
        "Configuration loaded"
    );

    metrics::register_metrics();
    let ctx = MigratorContext::new(&config).context("Failed to create context")?;

    match cli.command {
        Commands::Ingest { print_metrics } => run_once(&ctx, JobKind::Ingest, print_metrics).await,
        Commands::Publish { print_metrics } => {
            run_once(&ctx, JobKind::Publish, print_metrics).await
        }
        Commands::Serve => {
            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to listen for ctrl-c");
                    std::future::pending::<()>().await;
                }
            };
            scheduler::serve(Arc::new(ctx), config.schedule_interval(), shutdown).await;
            Ok(())
        }
        Commands::Status => print_status(&ctx).await,
        Commands::Failures => print_failures(&ctx).await,
        Commands::Reopen { job } => {
            ctx.reopen(job)
                .await
                .with_context(|| format!("Failed to reopen {}", job))?;
            println!("{} reopened", job);
            Ok(())
        }
        Commands::Probe => {
            let ticket_id = ctx.probe().await.context("Probe failed")?;
            println!("Created probe ticket {}", ticket_id);
            Ok(())
        }
    }
}
