// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Desk.com API v2 source

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use helpdesk_types::{CustomerId, Message, MessageKind, SourceId};

use crate::error::TransferError;
use crate::provider::{CaseFilter, CasePage, CustomerEmail, SourceApi, SourceCase};
use crate::throttle::{ProviderRequest, QuotaHeaders, ThrottledClient};

pub const QUOTA_HEADERS: QuotaHeaders = QuotaHeaders {
    total: "X-Rate-Limit-Limit",
    remaining: "X-Rate-Limit-Remaining",
    reset: "X-Rate-Limit-Reset",
};

const MESSAGES_PER_PAGE: u32 = 100;

/// How to fetch one kind of case message and find who sent it.
struct MessageRoute {
    kind: MessageKind,
    endpoint: &'static str,
    embed: Option<&'static str>,
    sender: fn(&Value) -> Sender,
}

/// Sender lookup result for a raw message.
#[derive(Debug, PartialEq, Eq)]
enum Sender {
    Found(String),
    /// The sender field exists but is empty; the message is dropped
    Empty,
    /// The record the sender lives on is gone, use a placeholder
    Gone(&'static str),
}

static MESSAGE_ROUTES: [MessageRoute; 2] = [
    MessageRoute {
        kind: MessageKind::Note,
        endpoint: "notes",
        embed: Some("user"),
        sender: note_sender,
    },
    MessageRoute {
        kind: MessageKind::Reply,
        endpoint: "replies",
        embed: None,
        sender: reply_sender,
    },
];

fn route(kind: MessageKind) -> &'static MessageRoute {
    match kind {
        MessageKind::Note => &MESSAGE_ROUTES[0],
        MessageKind::Reply => &MESSAGE_ROUTES[1],
    }
}

/// Notes are attributed to the authoring agent's email.
fn note_sender(entry: &Value) -> Sender {
    match entry.pointer("/_embedded/user") {
        None | Some(Value::Null) => Sender::Gone("agent has been deleted"),
        Some(user) => string_field(user, "email"),
    }
}

/// Replies carry the sender address themselves.
fn reply_sender(entry: &Value) -> Sender {
    match entry.get("from") {
        None => Sender::Gone("could not find email of sender"),
        Some(_) => string_field(entry, "from"),
    }
}

fn string_field(value: &Value, field: &str) -> Sender {
    match value.get(field).and_then(Value::as_str) {
        Some(s) if !s.is_empty() => Sender::Found(s.to_string()),
        _ => Sender::Empty,
    }
}

/// Turn a raw note or reply into a [`Message`], dropping entries without a
/// body, sender, or timestamp.
fn extract_message(route: &MessageRoute, entry: &Value) -> Option<Message> {
    let body = entry.get("body").and_then(Value::as_str)?;
    if body.trim().is_empty() {
        return None;
    }
    let from = match (route.sender)(entry) {
        Sender::Found(from) => from,
        Sender::Gone(placeholder) => placeholder.to_string(),
        Sender::Empty => return None,
    };
    let origin_at = entry
        .get("created_at")
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())?
        .with_timezone(&Utc);

    Some(Message {
        kind: route.kind,
        body: body.to_string(),
        from,
        origin_at,
    })
}

// ============================================================================
// Response shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct Listing<T> {
    #[serde(default)]
    total_entries: u64,
    #[serde(rename = "_embedded")]
    embedded: Option<Entries<T>>,
}

#[derive(Debug, Deserialize)]
struct Entries<T> {
    #[serde(default = "Vec::new")]
    entries: Vec<T>,
}

impl<T> Listing<T> {
    fn into_entries(self) -> Vec<T> {
        self.embedded.map(|e| e.entries).unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct RawCase {
    id: SourceId,
    created_at: DateTime<Utc>,
    #[serde(default)]
    subject: Option<String>,
    #[serde(rename = "_links", default)]
    links: Option<CaseLinks>,
    #[serde(rename = "_embedded", default)]
    embedded: Option<CaseEmbeds>,
}

#[derive(Debug, Deserialize)]
struct CaseLinks {
    customer: Option<Link>,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
}

#[derive(Debug, Deserialize)]
struct CaseEmbeds {
    message: Option<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    subject: Option<String>,
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCustomer {
    #[serde(default)]
    emails: Vec<RawEmail>,
}

#[derive(Debug, Deserialize)]
struct RawEmail {
    #[serde(rename = "type")]
    kind: String,
    value: Option<String>,
}

impl From<RawCase> for SourceCase {
    fn from(raw: RawCase) -> Self {
        let message = raw.embedded.and_then(|e| e.message);
        let customer_id = raw
            .links
            .and_then(|l| l.customer)
            .and_then(|link| link.href.rsplit('/').next().and_then(|id| id.parse().ok()));
        SourceCase {
            id: raw.id,
            created_at: raw.created_at,
            subject: message
                .as_ref()
                .and_then(|m| m.subject.clone())
                .or(raw.subject),
            body: message.and_then(|m| m.body),
            customer_id,
        }
    }
}

// ============================================================================
// Client
// ============================================================================

pub struct DeskSource {
    client: ThrottledClient,
}

impl DeskSource {
    pub fn new(client: ThrottledClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SourceApi for DeskSource {
    async fn search_cases(&self, filter: &CaseFilter) -> Result<CasePage, TransferError> {
        let request = ProviderRequest::get("cases/search")
            .query("sort_field", "created_at")
            .query("sort_direction", "asc")
            .query("since_created_at", filter.since_created_at.timestamp())
            .query("channels", "email")
            .query("per_page", filter.per_page)
            .query("page", filter.page)
            .query("embed", "message");
        let listing: Listing<RawCase> = self.client.get_json(request).await?;
        let total_count = listing.total_entries;
        let items: Vec<SourceCase> = listing
            .into_entries()
            .into_iter()
            .map(SourceCase::from)
            .collect();
        debug!(count = items.len(), total_count, "Fetched case page");
        Ok(CasePage { items, total_count })
    }

    async fn customer_emails(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<CustomerEmail>, TransferError> {
        let customer: RawCustomer = self
            .client
            .get_json(ProviderRequest::get(format!("customers/{}", customer_id)))
            .await?;
        Ok(customer
            .emails
            .into_iter()
            .map(|e| CustomerEmail {
                kind: e.kind,
                value: e.value,
            })
            .collect())
    }

    async fn case_messages(
        &self,
        case_id: SourceId,
        kind: MessageKind,
    ) -> Result<Vec<Message>, TransferError> {
        let route = route(kind);
        let mut messages = Vec::new();
        let mut page = 1u32;

        loop {
            let mut request =
                ProviderRequest::get(format!("cases/{}/{}", case_id, route.endpoint))
                    .query("per_page", MESSAGES_PER_PAGE)
                    .query("page", page);
            if let Some(embed) = route.embed {
                request = request.query("embed", embed);
            }
            let listing: Listing<Value> = self.client.get_json(request).await?;
            let total = listing.total_entries;
            let entries = listing.into_entries();
            let fetched = entries.len();

            messages.extend(entries.iter().filter_map(|e| extract_message(route, e)));

            let seen = u64::from(page) * u64::from(MESSAGES_PER_PAGE);
            if fetched < MESSAGES_PER_PAGE as usize || seen >= total {
                break;
            }
            page += 1;
        }

        Ok(messages)
    }

    async fn label_case(&self, case_id: SourceId, label: &str) -> Result<(), TransferError> {
        self.client
            .send(ProviderRequest::patch(
                format!("cases/{}", case_id),
                json!({ "labels": [label], "label_action": "append" }),
            ))
            .await?;
        Ok(())
    }
}
