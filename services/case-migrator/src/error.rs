// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Errors raised while talking to a helpdesk provider

use std::time::Duration;

use thiserror::Error;

use crate::store::StoreError;

/// Failure of a single outbound call or of the per-item work built on it.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{method} {url} failed with {status} - {body}")]
    Status {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    /// The provider rejected the call because the request quota is spent.
    #[error("Too many requests, quota resets in {}s", reset_in.as_secs_f64())]
    QuotaExceeded { reset_in: Duration },

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Response missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid request path {path}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Local store error: {0}")]
    Store(#[from] StoreError),
}

impl TransferError {
    /// Provider-specified delay for a quota rejection.
    pub fn quota_reset(&self) -> Option<Duration> {
        match self {
            TransferError::QuotaExceeded { reset_in } => Some(*reset_in),
            _ => None,
        }
    }
}
