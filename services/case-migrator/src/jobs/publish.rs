// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Publish leg: local store to destination helpdesk
//!
//! Each unit takes the oldest unpublished cases from the store, creates a
//! ticket for each with its messages as private notes, and records the ticket
//! id. A case whose retries run out is marked failed and left for review.
//!
//! Delivery is at least once: if the ticket is created but recording its id
//! fails, the case is published again on a later run.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::sync::Mutex;
use tracing::{error, info};

use helpdesk_types::{Case, DestinationId, JobKind, SourceId, StatKey};

use crate::error::TransferError;
use crate::format::{Heading, format_body, ticket_subject};
use crate::jobs::JobError;
use crate::liveness::{RunToken, UnitOfWork, UnitOutcome};
use crate::metrics;
use crate::pool::{KeepGoing, ShardedWorkerPool};
use crate::provider::{DestinationApi, NewTicket};
use crate::retry::RetryPolicy;
use crate::stats::JobStats;
use crate::store::CaseStore;

const UNKNOWN_SENDER: &str = "unknown sender";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishSettings {
    pub concurrency: usize,
    pub page_size: usize,
    pub retry: RetryPolicy,
    /// Tag put on every ticket created by the migration
    pub ticket_tag: String,
    pub status: u32,
    pub priority: u32,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            concurrency: 5,
            page_size: 50,
            retry: RetryPolicy::new(3, std::time::Duration::from_secs(5)),
            ticket_tag: "COPIED-FROM-DESK".to_string(),
            status: 5,
            priority: 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum PublishOutcome {
    Published,
    Failed,
    /// Stopped before reaching a final outcome; picked up again later
    Abandoned,
}

/// How far a case got across attempts.
#[derive(Debug, Default)]
struct Progress {
    ticket_id: Option<DestinationId>,
    notes_posted: usize,
}

struct PublishShared {
    destination: Arc<dyn DestinationApi>,
    store: CaseStore,
    stats: JobStats,
    settings: PublishSettings,
}

/// The publish leg as a guarded unit of work.
pub struct PublishJob {
    shared: Arc<PublishShared>,
    pool: ShardedWorkerPool,
}

impl PublishJob {
    pub fn new(
        destination: Arc<dyn DestinationApi>,
        store: CaseStore,
        settings: PublishSettings,
    ) -> Self {
        Self {
            pool: ShardedWorkerPool::new(settings.concurrency),
            shared: Arc::new(PublishShared {
                destination,
                stats: JobStats::new(JobKind::Publish, store.clone()),
                store,
                settings,
            }),
        }
    }

    pub fn stats(&self) -> &JobStats {
        &self.shared.stats
    }
}

#[async_trait]
impl UnitOfWork for PublishJob {
    async fn run_unit(&self, token: &RunToken) -> Result<UnitOutcome, JobError> {
        let shared = &self.shared;
        if !token.keep_going() {
            return Ok(UnitOutcome::Progressed);
        }

        let counts = shared.store.counts().await?;
        shared.stats.seed(counts.pending).await?;
        shared
            .stats
            .record(StatKey::CasesRemaining, &counts.pending.to_string())
            .await;

        let cases = shared.store.scan_unpublished(shared.settings.page_size).await?;
        if cases.is_empty() {
            return Ok(UnitOutcome::Idle);
        }
        info!(
            entries = cases.len(),
            remaining = counts.pending,
            "Publishing page of cases"
        );

        let count = cases.len();
        let keep_going = token.predicate();
        let report = {
            let shared = Arc::clone(shared);
            let keep_going = Arc::clone(&keep_going);
            self.pool
                .run(cases, Arc::clone(&keep_going), move |index, case| {
                    let shared = Arc::clone(&shared);
                    let keep_going = Arc::clone(&keep_going);
                    async move { shared.process(index, count, case, keep_going).await }
                })
                .await
        };

        let published = report
            .results
            .iter()
            .filter(|(_, outcome)| *outcome == PublishOutcome::Published)
            .count();
        info!(
            published,
            attempted = report.results.len(),
            not_started = report.not_started,
            "Finished page"
        );
        Ok(UnitOutcome::Progressed)
    }
}

impl PublishShared {
    async fn process(
        self: Arc<Self>,
        index: usize,
        count: usize,
        case: Case,
        keep_going: KeepGoing,
    ) -> PublishOutcome {
        let source_id = case.source_id;
        let label = format!("case {}", source_id);
        let progress = Arc::new(Mutex::new(Progress::default()));
        let case = Arc::new(case);

        let attempted = self
            .settings
            .retry
            .run(
                &label,
                &*keep_going,
                |_| {
                    let shared = Arc::clone(&self);
                    let case = Arc::clone(&case);
                    let progress = Arc::clone(&progress);
                    async move { shared.publish_case(&case, &progress).await }
                },
                |err| {
                    let shared = Arc::clone(&self);
                    let progress = Arc::clone(&progress);
                    async move { shared.record_failure(source_id, err, &progress).await }
                },
            )
            .await;

        let retries = attempted.retries();
        self.stats.incr(StatKey::Warnings, retries).await;
        metrics::record_retries("publish", retries);

        let outcome = attempted.value.unwrap_or(PublishOutcome::Abandoned);
        metrics::record_item("publish", &outcome.to_string());
        if outcome == PublishOutcome::Published {
            self.stats.incr(StatKey::Transferred, 1).await;
            let ticket_id = progress.lock().await.ticket_id;
            info!(
                case_id = source_id,
                ticket_id = ?ticket_id,
                position = index + 1,
                of = count,
                "Copied case to destination"
            );
        }
        outcome
    }

    /// Create the ticket and post the notes, continuing from `progress`.
    async fn publish_case(
        &self,
        case: &Case,
        progress: &Mutex<Progress>,
    ) -> Result<PublishOutcome, TransferError> {
        let mut progress = progress.lock().await;

        let ticket_id = match progress.ticket_id {
            Some(id) => id,
            None => {
                let id = self
                    .destination
                    .create_ticket(&self.ticket_for(case))
                    .await?;
                progress.ticket_id = Some(id);
                id
            }
        };

        for message in case.messages.iter().skip(progress.notes_posted) {
            let body = format_body(
                Heading::Message(message.kind),
                &message.from,
                Some(message.origin_at),
                &message.body,
            );
            self.destination.add_note(ticket_id, &body).await?;
            progress.notes_posted += 1;
        }

        self.store.mark_published(case.source_id, ticket_id).await?;
        Ok(PublishOutcome::Published)
    }

    fn ticket_for(&self, case: &Case) -> NewTicket {
        let from = case.email.as_deref().unwrap_or(UNKNOWN_SENDER);
        NewTicket {
            email: case.email.clone(),
            subject: ticket_subject(case.subject.as_deref(), case.source_id),
            status: self.settings.status,
            priority: self.settings.priority,
            responder_id: None,
            description: format_body(
                Heading::Original,
                from,
                case.created_at,
                case.body.as_deref().unwrap_or_default(),
            ),
            tags: vec![self.settings.ticket_tag.clone()],
        }
    }

    async fn record_failure(
        &self,
        source_id: SourceId,
        err: TransferError,
        progress: &Mutex<Progress>,
    ) -> PublishOutcome {
        let reason = match progress.lock().await.ticket_id {
            Some(ticket_id) => format!("{} (partial ticket {} created)", err, ticket_id),
            None => err.to_string(),
        };
        error!(case_id = source_id, reason = %reason, "Case failed to publish");
        match self.store.mark_failed(source_id, &reason).await {
            Ok(()) => {
                self.stats.incr(StatKey::Failures, 1).await;
                PublishOutcome::Failed
            }
            Err(e) => {
                error!(case_id = source_id, error = %e, "Failed to record case failure");
                PublishOutcome::Abandoned
            }
        }
    }
}

/// Create a throwaway ticket with four notes so the destination's quota
/// headers can be observed.
pub async fn probe(destination: &dyn DestinationApi) -> Result<DestinationId, TransferError> {
    let ticket = NewTicket {
        email: Some(format!("rate-limit-probe-{}@example.com", Utc::now().timestamp())),
        subject: "this is a bogus ticket".to_string(),
        status: 5,
        priority: 1,
        responder_id: None,
        description: "this is a bogus ticket body".to_string(),
        tags: vec!["RATE-LIMIT-TEST".to_string()],
    };
    let ticket_id = destination.create_ticket(&ticket).await?;
    for n in 0..4 {
        destination
            .add_note(ticket_id, &format!("note {} added here", n))
            .await?;
    }
    info!(ticket_id, "Created rate limit probe ticket");
    Ok(ticket_id)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::liveness::{GuardOutcome, LivenessGuard, LivenessPolicy, RunState, StopReason};
    use chrono::{DateTime, TimeZone};
    use helpdesk_types::{Message, MessageKind, NewCase};
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 6, 1, 9, minute, 0).unwrap()
    }

    /// Records calls; note posts fail while `failing_notes` is positive.
    #[derive(Default)]
    struct FakeDestination {
        next_id: AtomicI64,
        tickets: StdMutex<Vec<NewTicket>>,
        notes: StdMutex<Vec<(DestinationId, String)>>,
        failing_notes: AtomicU32,
        failing_creates: AtomicU32,
    }

    fn server_error() -> TransferError {
        TransferError::Status {
            method: "POST".to_string(),
            url: "tickets".to_string(),
            status: 502,
            body: "bad gateway".to_string(),
        }
    }

    #[async_trait]
    impl DestinationApi for FakeDestination {
        async fn create_ticket(&self, ticket: &NewTicket) -> Result<DestinationId, TransferError> {
            if self.failing_creates.load(Ordering::SeqCst) > 0 {
                self.failing_creates.fetch_sub(1, Ordering::SeqCst);
                return Err(server_error());
            }
            self.tickets.lock().unwrap().push(ticket.clone());
            Ok(9000 + self.next_id.fetch_add(1, Ordering::SeqCst))
        }

        async fn add_note(&self, ticket_id: DestinationId, body: &str) -> Result<(), TransferError> {
            if self.failing_notes.load(Ordering::SeqCst) > 0 {
                self.failing_notes.fetch_sub(1, Ordering::SeqCst);
                return Err(server_error());
            }
            self.notes.lock().unwrap().push((ticket_id, body.to_string()));
            Ok(())
        }
    }

    struct Harness {
        _dir: TempDir,
        store: CaseStore,
        destination: Arc<FakeDestination>,
        job: PublishJob,
        guard: LivenessGuard,
    }

    fn harness(destination: FakeDestination, concurrency: usize) -> Harness {
        let dir = tempdir().unwrap();
        let store = CaseStore::open(&dir.path().join("test.db")).unwrap();
        let destination = Arc::new(destination);
        let job = PublishJob::new(
            destination.clone(),
            store.clone(),
            PublishSettings {
                concurrency,
                ..PublishSettings::default()
            },
        );
        let guard = LivenessGuard::new(
            job.stats().clone(),
            RunState::new(),
            LivenessPolicy {
                stale_after: Duration::from_secs(120),
                run_for: Duration::from_secs(60),
                idle_wait: Duration::from_secs(5),
            },
        );
        Harness {
            _dir: dir,
            store,
            destination,
            job,
            guard,
        }
    }

    async fn seed_case(store: &CaseStore, source_id: SourceId, notes: usize) {
        let messages = (0..notes)
            .map(|n| Message {
                kind: if n % 2 == 0 { MessageKind::Note } else { MessageKind::Reply },
                body: format!("message {}", n),
                from: "agent@example.com".to_string(),
                origin_at: at(n as u32 + 1),
            })
            .collect();
        store
            .insert(&NewCase {
                source_id,
                email: Some("customer@example.com".to_string()),
                subject: Some("Broken widget".to_string()),
                body: Some("It broke".to_string()),
                created_at: at(0),
                messages,
            })
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishes_ticket_with_notes_in_order() {
        let h = harness(FakeDestination::default(), 2);
        seed_case(&h.store, 10, 3).await;

        let outcome = h.guard.run(&h.job).await.unwrap();
        assert!(matches!(
            outcome,
            GuardOutcome::Finished {
                reason: StopReason::Deadline,
                ..
            }
        ));

        let case = h.store.get(10).await.unwrap();
        assert_eq!(case.destination_id, Some(9000));

        let tickets = h.destination.tickets.lock().unwrap();
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].subject, "Broken widget - Original Desk Case 10");
        assert_eq!(tickets[0].tags, vec!["COPIED-FROM-DESK".to_string()]);
        assert!(tickets[0]
            .description
            .starts_with("<b>Original message from customer@example.com.</br>\n"));

        let notes = h.destination.notes.lock().unwrap();
        let bodies: Vec<&str> = notes.iter().map(|(_, b)| b.as_str()).collect();
        assert_eq!(bodies.len(), 3);
        assert!(bodies[0].contains("Internal Note made by") && bodies[0].ends_with("message 0"));
        assert!(bodies[1].contains("Reply from") && bodies[1].ends_with("message 1"));
        assert!(bodies[2].ends_with("message 2"));
        assert_eq!(h.job.stats().counter(StatKey::Transferred).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_continues_where_attempt_stopped() {
        let destination = FakeDestination::default();
        destination.failing_notes.store(1, Ordering::SeqCst);
        let h = harness(destination, 2);
        seed_case(&h.store, 11, 2).await;

        h.guard.run(&h.job).await.unwrap();

        assert_eq!(h.destination.tickets.lock().unwrap().len(), 1);
        assert_eq!(h.destination.notes.lock().unwrap().len(), 2);
        assert_eq!(h.store.get(11).await.unwrap().destination_id, Some(9000));
        assert_eq!(h.job.stats().counter(StatKey::Warnings).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_case_is_marked_failed_and_not_retried() {
        let destination = FakeDestination::default();
        destination.failing_creates.store(3, Ordering::SeqCst);
        // One worker so the failures all land on the first case
        let h = harness(destination, 1);
        seed_case(&h.store, 12, 1).await;
        seed_case(&h.store, 13, 1).await;

        h.guard.run(&h.job).await.unwrap();

        let failed = h.store.failed_cases().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].source_id, 12);
        let published = h.store.counts().await.unwrap().published;
        assert_eq!(published, 1);
        assert_eq!(h.job.stats().counter(StatKey::Failures).await.unwrap(), 1);
        assert!(h.store.scan_unpublished(10).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_ticket_is_named_in_failure() {
        let destination = FakeDestination::default();
        destination.failing_notes.store(10, Ordering::SeqCst);
        let h = harness(destination, 2);
        seed_case(&h.store, 14, 1).await;

        h.guard.run(&h.job).await.unwrap();

        let failed = h.store.get(14).await.unwrap();
        assert!(failed.failure.unwrap().contains("partial ticket 9000"));
        assert_eq!(h.destination.tickets.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_probe_creates_ticket_and_four_notes() {
        let destination = FakeDestination::default();
        let id = probe(&destination).await.unwrap();

        let tickets = destination.tickets.lock().unwrap();
        assert_eq!(tickets[0].tags, vec!["RATE-LIMIT-TEST".to_string()]);
        let notes = destination.notes.lock().unwrap();
        assert_eq!(notes.len(), 4);
        assert!(notes.iter().all(|(t, _)| *t == id));
        assert_eq!(notes[3].1, "note 3 added here");
    }
}
