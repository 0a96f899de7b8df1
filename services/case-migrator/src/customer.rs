// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Permanent cache of source customer emails

use tracing::debug;

use helpdesk_types::CustomerId;

use crate::error::TransferError;
use crate::provider::{CustomerEmail, SourceApi};
use crate::store::CaseStore;

/// Address types in order of preference.
const PREFERRED_KINDS: [&str; 3] = ["home", "work", "other"];

/// Pick the preferred address from a customer's emails.
pub fn preferred_email(emails: &[CustomerEmail]) -> Option<String> {
    PREFERRED_KINDS.iter().find_map(|kind| {
        emails
            .iter()
            .filter(|e| e.kind == *kind)
            .find_map(|e| e.value.clone().filter(|v| !v.is_empty()))
    })
}

/// Resolves customer ids to emails, consulting the source at most once per
/// customer that has an address on file.
#[derive(Clone)]
pub struct CustomerEmailCache {
    store: CaseStore,
}

impl CustomerEmailCache {
    pub fn new(store: CaseStore) -> Self {
        Self { store }
    }

    pub async fn resolve(
        &self,
        customer_id: CustomerId,
        source: &dyn SourceApi,
    ) -> Result<Option<String>, TransferError> {
        if let Some(email) = self.store.customer_email(customer_id).await? {
            return Ok(Some(email));
        }

        let emails = source.customer_emails(customer_id).await?;
        match preferred_email(&emails) {
            Some(email) => {
                let stored = self
                    .store
                    .remember_customer_email(customer_id, &email)
                    .await?;
                Ok(Some(stored))
            }
            None => {
                debug!(customer_id, "Customer has no usable email");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use async_trait::async_trait;
    use helpdesk_types::{Message, MessageKind, SourceId};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::tempdir;

    use crate::provider::{CaseFilter, CasePage};

    fn email(kind: &str, value: Option<&str>) -> CustomerEmail {
        CustomerEmail {
            kind: kind.to_string(),
            value: value.map(str::to_string),
        }
    }

    #[test]
    fn test_preference_order() {
        let emails = vec![
            email("other", Some("other@example.com")),
            email("work", Some("work@example.com")),
            email("home", None),
        ];
        assert_eq!(preferred_email(&emails).as_deref(), Some("work@example.com"));
        assert_eq!(preferred_email(&[email("fax", Some("x"))]), None);
        assert_eq!(preferred_email(&[]), None);
    }

    struct CountingSource {
        emails: Vec<CustomerEmail>,
        lookups: AtomicU32,
    }

    #[async_trait]
    impl SourceApi for CountingSource {
        async fn search_cases(&self, _filter: &CaseFilter) -> Result<CasePage, TransferError> {
            Ok(CasePage::default())
        }

        async fn customer_emails(
            &self,
            _customer_id: CustomerId,
        ) -> Result<Vec<CustomerEmail>, TransferError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.emails.clone())
        }

        async fn case_messages(
            &self,
            _case_id: SourceId,
            _kind: MessageKind,
        ) -> Result<Vec<Message>, TransferError> {
            Ok(Vec::new())
        }

        async fn label_case(&self, _case_id: SourceId, _label: &str) -> Result<(), TransferError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_found_emails_are_cached() {
        let dir = tempdir().unwrap();
        let cache = CustomerEmailCache::new(CaseStore::open(&dir.path().join("t.db")).unwrap());
        let source = CountingSource {
            emails: vec![email("home", Some("home@example.com"))],
            lookups: AtomicU32::new(0),
        };

        for _ in 0..3 {
            let found = cache.resolve(12, &source).await.unwrap();
            assert_eq!(found.as_deref(), Some("home@example.com"));
        }
        assert_eq!(source.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_email_is_not_cached() {
        let dir = tempdir().unwrap();
        let cache = CustomerEmailCache::new(CaseStore::open(&dir.path().join("t.db")).unwrap());
        let source = CountingSource {
            emails: vec![],
            lookups: AtomicU32::new(0),
        };

        assert_eq!(cache.resolve(12, &source).await.unwrap(), None);
        assert_eq!(cache.resolve(12, &source).await.unwrap(), None);
        assert_eq!(source.lookups.load(Ordering::SeqCst), 2);
    }
}
