// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Shared types for the case migrator.
//!
//! These are the records that travel between the two legs of a migration:
//! the ingest leg writes [`NewCase`]s pulled from the legacy helpdesk into the
//! local store, and the publish leg reads [`Case`]s back out and replays them
//! (with their [`Message`]s, in origin order) against the destination.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, VariantNames};

// ============================================================================
// Type Aliases
// ============================================================================

/// Case identifier assigned by the legacy (source) helpdesk
pub type SourceId = i64;

/// Ticket identifier assigned by the destination helpdesk
pub type DestinationId = i64;

/// Customer identifier assigned by the legacy helpdesk
pub type CustomerId = i64;

// ============================================================================
// Case Types
// ============================================================================

/// Kind of a sub-record attached to a case.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    VariantNames,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Internal note written by an agent
    Note,
    /// Reply exchanged with the customer
    Reply,
}

/// A note or reply belonging to exactly one case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    pub body: String,
    /// Originating address (agent or customer email)
    pub from: String,
    /// When the message was written on the source system
    pub origin_at: DateTime<Utc>,
}

/// A case as captured from the source, ready to be persisted locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCase {
    pub source_id: SourceId,
    pub email: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

impl NewCase {
    /// Sort messages into the order they must be replayed in.
    pub fn sort_messages(&mut self) {
        self.messages.sort_by_key(|m| m.origin_at);
    }
}

/// A locally stored case.
///
/// Rows created for a terminal ingest failure carry only `source_id` and
/// `failure`; everything captured from the source is optional for that reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Case {
    pub source_id: SourceId,
    pub email: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    /// Ticket id on the destination, set once published
    pub destination_id: Option<DestinationId>,
    /// Reason for a terminal failure, kept for audit
    pub failure: Option<String>,
    /// Messages in origin order
    pub messages: Vec<Message>,
}

/// Aggregate case counts shown on the status view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseCounts {
    pub total: u64,
    pub published: u64,
    pub pending: u64,
    pub failed: u64,
}

// ============================================================================
// Job Statistics
// ============================================================================

/// The two legs of a migration.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    VariantNames,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Source helpdesk to local store
    Ingest,
    /// Local store to destination helpdesk
    Publish,
}

/// Named job statistics persisted for the dashboard.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    VariantNames,
)]
#[strum(serialize_all = "snake_case")]
pub enum StatKey {
    /// Human readable run state ("running until ...", "stopped", ...)
    State,
    /// RFC 3339 timestamp of the active runner's last beat, empty when idle
    Heartbeat,
    /// Source total reported on the first fetch
    StartingEntries,
    /// Source total reported on the latest fetch
    CasesRemaining,
    Transferred,
    Skipped,
    Warnings,
    Failures,
    /// Set once the counters above have been seeded
    Initialized,
    /// Serialized resume cursor
    Cursor,
    /// Set when the job has finished for good
    Complete,
}

impl StatKey {
    /// Storage key for this statistic scoped to a job, e.g. `ingest.heartbeat`.
    pub fn scoped(self, job: JobKind) -> String {
        format!("{}.{}", job, self)
    }
}
