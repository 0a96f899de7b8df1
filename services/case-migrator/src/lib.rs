// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Case Migrator Library
//!
//! Moves support cases from a legacy helpdesk (Desk) into a new one
//! (Freshdesk) in two legs that run independently: ingest copies source cases
//! into a local SQLite store, and publish replays stored cases as destination
//! tickets. Both legs are rate limited against the providers' quotas,
//! resumable after a crash, and safe to trigger repeatedly.
//!
//! # Modules
//!
//! - [`config`] - Environment and file configuration
//! - [`context`] - Wiring of store, providers, jobs and guards
//! - [`quota`] / [`throttle`] - Quota tracking and the throttled HTTP client
//! - [`retry`] - Bounded per-item retries
//! - [`pool`] - Sharded worker pool
//! - [`liveness`] - Heartbeat-based single-runner guard
//! - [`cursor`] - Ingest resume cursor
//! - [`store`] / [`stats`] - SQLite case store and per-job stats
//! - [`provider`] - Desk and Freshdesk API adapters
//! - [`customer`] / [`format`] - Sender lookup and ticket rendering
//! - [`jobs`] - The ingest and publish legs
//! - [`scheduler`] - Periodic in-process trigger
//! - [`error`] / [`metrics`] - Provider errors and Prometheus counters

pub mod config;
pub mod context;
pub mod cursor;
pub mod customer;
pub mod error;
pub mod format;
pub mod jobs;
pub mod liveness;
pub mod metrics;
pub mod pool;
pub mod provider;
pub mod quota;
pub mod retry;
pub mod scheduler;
pub mod stats;
pub mod store;
pub mod throttle;
