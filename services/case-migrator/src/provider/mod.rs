// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Helpdesk provider boundaries
//!
//! The ingest leg reads from a [`SourceApi`] and the publish leg writes to a
//! [`DestinationApi`]. Both production implementations sit on a
//! [`ThrottledClient`](crate::throttle::ThrottledClient) with their own quota.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use helpdesk_types::{CustomerId, DestinationId, Message, MessageKind, SourceId};

use crate::error::TransferError;

pub mod desk;
pub mod freshdesk;

/// Search filter for the source scan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaseFilter {
    /// Only cases created at or after this instant
    pub since_created_at: DateTime<Utc>,
    pub per_page: u32,
    /// 1-based page of the listing
    pub page: u32,
}

impl CaseFilter {
    /// Matches listed on the pages before this one.
    fn listed_before(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.per_page)
    }
}

/// A case as listed by the source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceCase {
    pub id: SourceId,
    pub created_at: DateTime<Utc>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub customer_id: Option<CustomerId>,
}

/// One page of a source search, oldest first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CasePage {
    pub items: Vec<SourceCase>,
    /// Matches of the filter across all pages
    pub total_count: u64,
}

impl CasePage {
    /// True when no match of `filter` lies beyond this page.
    pub fn is_last(&self, filter: &CaseFilter) -> bool {
        self.items.is_empty() || filter.listed_before() + self.items.len() as u64 >= self.total_count
    }
}

/// An address on file for a source customer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CustomerEmail {
    /// `home`, `work`, `other`, ...
    pub kind: String,
    pub value: Option<String>,
}

/// Read side of the legacy helpdesk.
#[async_trait]
pub trait SourceApi: Send + Sync {
    /// Cases matching `filter`, in ascending creation order.
    async fn search_cases(&self, filter: &CaseFilter) -> Result<CasePage, TransferError>;

    async fn customer_emails(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<CustomerEmail>, TransferError>;

    /// Messages of one kind attached to a case, already filtered to those
    /// worth migrating.
    async fn case_messages(
        &self,
        case_id: SourceId,
        kind: MessageKind,
    ) -> Result<Vec<Message>, TransferError>;

    /// Append a label to a case on the source.
    async fn label_case(&self, case_id: SourceId, label: &str) -> Result<(), TransferError>;
}

/// Ticket payload for the destination.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NewTicket {
    pub email: Option<String>,
    pub subject: String,
    pub status: u32,
    pub priority: u32,
    pub responder_id: Option<i64>,
    pub description: String,
    pub tags: Vec<String>,
}

/// Write side of the destination helpdesk.
#[async_trait]
pub trait DestinationApi: Send + Sync {
    async fn create_ticket(&self, ticket: &NewTicket) -> Result<DestinationId, TransferError>;

    /// Add a private note to a ticket.
    async fn add_note(&self, ticket_id: DestinationId, body: &str) -> Result<(), TransferError>;
}
