// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Prometheus metrics for the case migrator
//!
//! - Items processed per job by outcome (transferred, skipped, failed, ...)
//! - Retries per job
//! - Time spent throttling and quota rejections per provider

use std::sync::Once;
use std::time::Duration;

use prometheus::{CounterVec, Opts, Registry, TextEncoder};

// Static metric initialization uses expect because these are compile-time
// constant definitions that cannot fail in practice.
//
// This module exists to scope the clippy allow attributes to just the metric definitions.
#[allow(clippy::expect_used)]
mod metrics_impl {
    use super::*;
    use lazy_static::lazy_static;

    lazy_static! {
        /// Registry for all migrator metrics
        pub static ref REGISTRY: Registry = Registry::new();

        /// Items processed per job by outcome
        pub static ref ITEMS_TOTAL: CounterVec = CounterVec::new(
            Opts::new("case_migrator_items_total", "Items processed by job and outcome"),
            &["job", "outcome"]
        ).expect("valid metric name and labels");

        /// Attempts repeated after a failure
        pub static ref RETRIES_TOTAL: CounterVec = CounterVec::new(
            Opts::new("case_migrator_retries_total", "Retried attempts by job"),
            &["job"]
        ).expect("valid metric name and labels");

        /// Seconds slept by the throttle before outbound calls
        pub static ref THROTTLE_SECONDS: CounterVec = CounterVec::new(
            Opts::new(
                "case_migrator_throttle_seconds_total",
                "Seconds spent throttling outbound calls by provider"
            ),
            &["provider"]
        ).expect("valid metric name and labels");

        /// Calls rejected with 429 Too Many Requests
        pub static ref QUOTA_REJECTIONS: CounterVec = CounterVec::new(
            Opts::new(
                "case_migrator_quota_rejections_total",
                "Calls rejected because the provider quota was spent"
            ),
            &["provider"]
        ).expect("valid metric name and labels");
    }
}

pub use metrics_impl::{ITEMS_TOTAL, QUOTA_REJECTIONS, REGISTRY, RETRIES_TOTAL, THROTTLE_SECONDS};

static REGISTER: Once = Once::new();

/// Register all metrics with the registry
///
/// Safe to call more than once; only the first call registers.
#[allow(clippy::expect_used)]
pub fn register_metrics() {
    REGISTER.call_once(|| {
        REGISTRY
            .register(Box::new(ITEMS_TOTAL.clone()))
            .expect("Failed to register ITEMS_TOTAL");
        REGISTRY
            .register(Box::new(RETRIES_TOTAL.clone()))
            .expect("Failed to register RETRIES_TOTAL");
        REGISTRY
            .register(Box::new(THROTTLE_SECONDS.clone()))
            .expect("Failed to register THROTTLE_SECONDS");
        REGISTRY
            .register(Box::new(QUOTA_REJECTIONS.clone()))
            .expect("Failed to register QUOTA_REJECTIONS");
    });
}

/// Get metrics in Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

/// Record the final outcome of one item
pub fn record_item(job: &str, outcome: &str) {
    ITEMS_TOTAL.with_label_values(&[job, outcome]).inc();
}

pub fn record_retries(job: &str, retries: u32) {
    if retries > 0 {
        RETRIES_TOTAL
            .with_label_values(&[job])
            .inc_by(f64::from(retries));
    }
}

pub fn record_throttle(provider: &str, waited: Duration) {
    THROTTLE_SECONDS
        .with_label_values(&[provider])
        .inc_by(waited.as_secs_f64());
}

pub fn record_quota_rejection(provider: &str) {
    QUOTA_REJECTIONS.with_label_values(&[provider]).inc();
}
