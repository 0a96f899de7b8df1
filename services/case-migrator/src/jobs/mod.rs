// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! The two migration legs
//!
//! [`ingest::IngestJob`] copies cases from the source helpdesk into the local
//! store and [`publish::PublishJob`] replays stored cases against the
//! destination. Each is a [`UnitOfWork`](crate::liveness::UnitOfWork): one
//! unit fetches a page of candidates and drives it through the worker pool.

pub mod ingest;
pub mod publish;

use thiserror::Error;

use crate::error::TransferError;
use crate::store::StoreError;

/// Errors that abort a single invocation of a job.
///
/// Per-item failures never surface here; they are recorded against the item.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Setup failed: {0}")]
    Setup(String),

    #[error("Local store error: {0}")]
    Store(#[from] StoreError),

    #[error("Provider error: {0}")]
    Provider(#[from] TransferError),
}
