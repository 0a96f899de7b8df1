// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Freshdesk API v2 destination

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use helpdesk_types::DestinationId;

use crate::error::TransferError;
use crate::provider::{DestinationApi, NewTicket};
use crate::throttle::{ProviderRequest, QuotaHeaders, ThrottledClient};

pub const QUOTA_HEADERS: QuotaHeaders = QuotaHeaders {
    total: "X-Ratelimit-Total",
    remaining: "X-Ratelimit-Remaining",
    reset: "Retry-After",
};

#[derive(Debug, Deserialize)]
struct Created {
    id: Option<DestinationId>,
}

pub struct FreshdeskDestination {
    client: ThrottledClient,
}

impl FreshdeskDestination {
    pub fn new(client: ThrottledClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DestinationApi for FreshdeskDestination {
    async fn create_ticket(&self, ticket: &NewTicket) -> Result<DestinationId, TransferError> {
        let created: Created = self
            .client
            .send(ProviderRequest::post("tickets", serde_json::to_value(ticket)?))
            .await?
            .json()?;
        created.id.ok_or(TransferError::MissingField("id"))
    }

    async fn add_note(&self, ticket_id: DestinationId, body: &str) -> Result<(), TransferError> {
        self.client
            .send(ProviderRequest::post(
                format!("tickets/{}/notes", ticket_id),
                json!({ "body": body, "private": true }),
            ))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::quota::QuotaPolicy;
    use crate::throttle::ClientSettings;
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn destination(uri: &str) -> FreshdeskDestination {
        let client = ThrottledClient::new(ClientSettings {
            provider: "freshdesk",
            base_url: format!("{}/api/v2/", uri),
            username: "api-key".to_string(),
            password: "X".to_string(),
            timeout: Duration::from_secs(5),
            headers: QUOTA_HEADERS,
            policy: QuotaPolicy {
                default_delay_secs: 0.0,
                safety_margin: 0.0,
                ..QuotaPolicy::default()
            },
            fallback_reset: Duration::from_secs(60),
        })
        .unwrap();
        FreshdeskDestination::new(client)
    }

    fn ticket() -> NewTicket {
        NewTicket {
            email: Some("customer@example.com".to_string()),
            subject: "Refund - Original Desk Case 9".to_string(),
            status: 5,
            priority: 1,
            responder_id: None,
            description: "<b>hi</b>".to_string(),
            tags: vec!["COPIED-FROM-DESK".to_string()],
        }
    }

    #[tokio::test]
    async fn test_create_ticket_posts_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/tickets"))
            .and(body_json(json!({
                "email": "customer@example.com",
                "subject": "Refund - Original Desk Case 9",
                "status": 5,
                "priority": 1,
                "responder_id": null,
                "description": "<b>hi</b>",
                "tags": ["COPIED-FROM-DESK"]
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 4242})))
            .expect(1)
            .mount(&server)
            .await;

        let id = destination(&server.uri())
            .create_ticket(&ticket())
            .await
            .unwrap();
        assert_eq!(id, 4242);
    }

    #[tokio::test]
    async fn test_create_ticket_without_id_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/tickets"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({})))
            .mount(&server)
            .await;

        let err = destination(&server.uri())
            .create_ticket(&ticket())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::MissingField("id")));
    }

    #[tokio::test]
    async fn test_add_private_note() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/tickets/4242/notes"))
            .and(body_json(json!({"body": "note 1", "private": true})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 1})))
            .expect(1)
            .mount(&server)
            .await;

        destination(&server.uri())
            .add_note(4242, "note 1")
            .await
            .unwrap();
    }
}
