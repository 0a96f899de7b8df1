// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Ingest leg: source helpdesk to local store
//!
//! Each unit fetches the next page of source cases after the resume cursor,
//! copies every new case with its notes and replies into the local store
//! through the worker pool, and moves the cursor over the settled prefix of
//! the page. When a fetch turns up nothing worth copying and the source has
//! nothing beyond the page, the job is marked complete for good.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::{debug, error, info, warn};

use helpdesk_types::{JobKind, MessageKind, NewCase, SourceId, StatKey};

use crate::cursor::{CursorMark, ResumeCursor, settled_mark};
use crate::customer::CustomerEmailCache;
use crate::error::TransferError;
use crate::jobs::JobError;
use crate::liveness::{RunToken, UnitOfWork, UnitOutcome};
use crate::metrics;
use crate::pool::{KeepGoing, ShardedWorkerPool};
use crate::provider::{CaseFilter, CasePage, SourceApi, SourceCase};
use crate::retry::RetryPolicy;
use crate::stats::JobStats;
use crate::store::CaseStore;

/// Where a fresh ingest starts scanning: 2012-07-16T11:45:44Z.
const INITIAL_CURSOR_SECS: i64 = 1_342_439_144;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    pub concurrency: usize,
    pub page_size: u32,
    pub retry: RetryPolicy,
    /// Cases created after this instant are ignored
    pub created_before: Option<DateTime<Utc>>,
    /// Customer addresses whose cases are skipped
    pub excluded_senders: Vec<String>,
    pub initial_cursor: DateTime<Utc>,
    /// Label appended to each source case once it is stored
    pub tag_source: Option<String>,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            concurrency: 25,
            page_size: 50,
            retry: RetryPolicy::new(3, std::time::Duration::from_secs(10)),
            created_before: None,
            excluded_senders: vec!["notify@ringcentral.com".to_string()],
            initial_cursor: DateTime::from_timestamp(INITIAL_CURSOR_SECS, 0).unwrap_or_default(),
            tag_source: None,
        }
    }
}

/// Final outcome of one source case within a unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum IngestOutcome {
    /// Stored with its messages
    Ingested,
    /// A row for the case already exists
    AlreadyPresent,
    /// Settled by an earlier page
    BehindCursor,
    /// From an excluded sender
    Excluded,
    /// Created after the cutoff
    AfterCutoff,
    /// Terminal failure recorded
    Failed,
    /// Stopped before reaching a final outcome
    Abandoned,
}

impl IngestOutcome {
    /// Whether the case was new to this job, which keeps the job from
    /// declaring the source exhausted.
    pub fn is_valid(self) -> bool {
        matches!(
            self,
            IngestOutcome::Ingested
                | IngestOutcome::Excluded
                | IngestOutcome::Failed
                | IngestOutcome::Abandoned
        )
    }

    /// Whether the cursor may move past the case. Cases after the cutoff
    /// stay ahead of it so raising the cutoff later picks them up.
    pub fn is_settled(self) -> bool {
        !matches!(self, IngestOutcome::Abandoned | IngestOutcome::AfterCutoff)
    }
}

struct IngestShared {
    source: Arc<dyn SourceApi>,
    store: CaseStore,
    stats: JobStats,
    cursor: ResumeCursor,
    customers: CustomerEmailCache,
    settings: IngestSettings,
}

/// The ingest leg as a guarded unit of work.
pub struct IngestJob {
    shared: Arc<IngestShared>,
    pool: ShardedWorkerPool,
}

impl IngestJob {
    pub fn new(source: Arc<dyn SourceApi>, store: CaseStore, settings: IngestSettings) -> Self {
        let stats = JobStats::new(JobKind::Ingest, store.clone());
        let cursor = ResumeCursor::new(stats.clone(), settings.initial_cursor);
        Self {
            pool: ShardedWorkerPool::new(settings.concurrency),
            shared: Arc::new(IngestShared {
                source,
                customers: CustomerEmailCache::new(store.clone()),
                store,
                stats,
                cursor,
                settings,
            }),
        }
    }

    pub fn stats(&self) -> &JobStats {
        &self.shared.stats
    }

    pub fn cursor(&self) -> &ResumeCursor {
        &self.shared.cursor
    }

    /// Fetch the next page, waiting out quota rejections.
    ///
    /// Returns `None` when asked to stop while waiting.
    async fn fetch_page(
        &self,
        filter: &CaseFilter,
        token: &RunToken,
    ) -> Result<Option<CasePage>, JobError> {
        loop {
            match self.shared.source.search_cases(filter).await {
                Ok(page) => return Ok(Some(page)),
                Err(e) => match e.quota_reset() {
                    Some(reset_in) if token.keep_going() => {
                        warn!(
                            reset_secs = reset_in.as_secs_f64(),
                            "Too many requests fetching cases, waiting for reset"
                        );
                        tokio::time::sleep(reset_in).await;
                        if !token.keep_going() {
                            return Ok(None);
                        }
                    }
                    Some(_) => return Ok(None),
                    None => {
                        error!(error = %e, "Failed to fetch source cases");
                        return Err(e.into());
                    }
                },
            }
        }
    }
}

#[async_trait]
impl UnitOfWork for IngestJob {
    async fn run_unit(&self, token: &RunToken) -> Result<UnitOutcome, JobError> {
        let shared = &self.shared;
        if !token.keep_going() {
            return Ok(UnitOutcome::Progressed);
        }

        let mark = shared.cursor.load().await?;
        let mut filter = CaseFilter {
            since_created_at: mark.created_at,
            per_page: shared.settings.page_size,
            page: 1,
        };
        // The filter is inclusive at the mark, so a burst of cases sharing
        // its timestamp can fill whole pages that are already settled.
        let page = loop {
            let Some(page) = self.fetch_page(&filter, token).await? else {
                return Ok(UnitOutcome::Progressed);
            };
            let behind = !page.items.is_empty()
                && page.items.iter().all(|c| mark.covers(c.created_at, c.id));
            if behind && !page.is_last(&filter) && token.keep_going() {
                debug!(page = filter.page, "Page is behind the cursor, reading the next one");
                filter.page += 1;
                continue;
            }
            break page;
        };

        shared.stats.seed(page.total_count).await?;
        shared
            .stats
            .record(StatKey::CasesRemaining, &page.total_count.to_string())
            .await;
        info!(
            entries = page.items.len(),
            remaining = page.total_count,
            since = %mark.created_at,
            page = filter.page,
            "Transferring page of cases"
        );

        let last_page = page.is_last(&filter);
        let positions: Vec<(DateTime<Utc>, SourceId)> =
            page.items.iter().map(|c| (c.created_at, c.id)).collect();
        let count = page.items.len();

        let keep_going = token.predicate();
        let report = {
            let shared = Arc::clone(shared);
            let keep_going = Arc::clone(&keep_going);
            let mark = Arc::new(mark);
            self.pool
                .run(page.items, Arc::clone(&keep_going), move |index, case| {
                    let shared = Arc::clone(&shared);
                    let keep_going = Arc::clone(&keep_going);
                    let mark = Arc::clone(&mark);
                    async move { shared.process(index, count, case, &mark, keep_going).await }
                })
                .await
        };

        let mut settled = vec![false; count];
        let mut valid_found = false;
        let mut past_cutoff = false;
        for (index, outcome) in &report.results {
            settled[*index] = outcome.is_settled();
            valid_found |= outcome.is_valid();
            past_cutoff |= *outcome == IngestOutcome::AfterCutoff;
        }
        if report.not_started > 0 {
            valid_found = true;
        }

        let advanced = match settled_mark(&positions, &settled) {
            Some(next) => shared.cursor.advance(next).await?,
            None => false,
        };

        if !valid_found && !token.deadline_passed() && (last_page || past_cutoff) {
            info!("No valid cases found, transfer is complete");
            return Ok(UnitOutcome::Complete);
        }
        if !valid_found && !advanced {
            return Ok(UnitOutcome::Idle);
        }
        Ok(UnitOutcome::Progressed)
    }
}

impl IngestShared {
    async fn process(
        self: Arc<Self>,
        index: usize,
        count: usize,
        case: SourceCase,
        mark: &CursorMark,
        keep_going: KeepGoing,
    ) -> IngestOutcome {
        if mark.covers(case.created_at, case.id) {
            return IngestOutcome::BehindCursor;
        }

        let case_id = case.id;
        let label = format!("case {}", case_id);
        let attempted = self
            .settings
            .retry
            .run(
                &label,
                &*keep_going,
                |_| {
                    let shared = Arc::clone(&self);
                    let case = case.clone();
                    async move { shared.copy_case(&case).await }
                },
                |err| {
                    let shared = Arc::clone(&self);
                    async move { shared.record_failure(case_id, err).await }
                },
            )
            .await;

        let retries = attempted.retries();
        self.stats.incr(StatKey::Warnings, retries).await;
        metrics::record_retries("ingest", retries);

        let outcome = attempted.value.unwrap_or(IngestOutcome::Abandoned);
        metrics::record_item("ingest", &outcome.to_string());
        if outcome == IngestOutcome::Ingested {
            self.stats.incr(StatKey::Transferred, 1).await;
            info!(
                case_id = case.id,
                position = index + 1,
                of = count,
                created_at = %case.created_at,
                "Copied case to local store"
            );
        }
        outcome
    }

    /// Copy one case and its messages into the store.
    async fn copy_case(&self, case: &SourceCase) -> Result<IngestOutcome, TransferError> {
        if let Some(cutoff) = self.settings.created_before {
            if case.created_at > cutoff {
                return Ok(IngestOutcome::AfterCutoff);
            }
        }
        if self.store.exists(case.id).await? {
            return Ok(IngestOutcome::AlreadyPresent);
        }

        let email = match case.customer_id {
            Some(customer_id) => {
                self.customers
                    .resolve(customer_id, self.source.as_ref())
                    .await?
            }
            None => None,
        };
        if let Some(sender) = &email {
            if self
                .settings
                .excluded_senders
                .iter()
                .any(|x| x.eq_ignore_ascii_case(sender))
            {
                self.stats.incr(StatKey::Skipped, 1).await;
                info!(case_id = case.id, sender = %sender, "Skipping case from excluded sender");
                return Ok(IngestOutcome::Excluded);
            }
        }

        let mut messages = self.source.case_messages(case.id, MessageKind::Note).await?;
        messages.extend(self.source.case_messages(case.id, MessageKind::Reply).await?);

        let mut new_case = NewCase {
            source_id: case.id,
            email,
            subject: case.subject.clone(),
            body: case.body.clone(),
            created_at: case.created_at,
            messages,
        };
        new_case.sort_messages();

        if !self.store.insert(&new_case).await? {
            return Ok(IngestOutcome::AlreadyPresent);
        }

        if let Some(tag) = &self.settings.tag_source {
            if let Err(e) = self.source.label_case(case.id, tag).await {
                warn!(case_id = case.id, error = %e, "Failed to label source case");
            }
        }
        Ok(IngestOutcome::Ingested)
    }

    async fn record_failure(&self, source_id: SourceId, err: TransferError) -> IngestOutcome {
        error!(case_id = source_id, error = %err, "Case failed to transfer to local store");
        match self.store.mark_failed(source_id, &err.to_string()).await {
            Ok(()) => {
                self.stats.incr(StatKey::Failures, 1).await;
                IngestOutcome::Failed
            }
            Err(e) => {
                error!(case_id = source_id, error = %e, "Failed to record case failure");
                IngestOutcome::Abandoned
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::liveness::{GuardOutcome, LivenessGuard, LivenessPolicy, RunState, StopReason};
    use crate::provider::CustomerEmail;
    use chrono::TimeZone;
    use helpdesk_types::{CustomerId, Message};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 6, 1, 9, minute, 0).unwrap()
    }

    fn source_case(id: SourceId, minute: u32) -> SourceCase {
        SourceCase {
            id,
            created_at: at(minute),
            subject: Some(format!("Case {}", id)),
            body: Some("Help".to_string()),
            customer_id: Some(id * 10),
        }
    }

    /// In-memory source that honors the inclusive creation filter.
    #[derive(Default)]
    struct FakeSource {
        cases: Mutex<Vec<SourceCase>>,
        emails: HashMap<CustomerId, String>,
        failing_messages: Mutex<HashMap<SourceId, u32>>,
        quota_rejections: AtomicU32,
        searches: AtomicU32,
    }

    impl FakeSource {
        fn with_cases(cases: Vec<SourceCase>) -> Self {
            let emails = cases
                .iter()
                .map(|c| (c.id * 10, format!("customer{}@example.com", c.id)))
                .collect();
            Self {
                cases: Mutex::new(cases),
                emails,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl SourceApi for FakeSource {
        async fn search_cases(&self, filter: &CaseFilter) -> Result<CasePage, TransferError> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            if self.quota_rejections.load(Ordering::SeqCst) > 0 {
                self.quota_rejections.fetch_sub(1, Ordering::SeqCst);
                return Err(TransferError::QuotaExceeded {
                    reset_in: Duration::from_secs(12),
                });
            }
            let mut matching: Vec<SourceCase> = self
                .cases
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.created_at >= filter.since_created_at)
                .cloned()
                .collect();
            matching.sort_by_key(|c| c.created_at);
            let total_count = matching.len() as u64;
            let skip = (filter.page as usize - 1) * filter.per_page as usize;
            Ok(CasePage {
                items: matching
                    .into_iter()
                    .skip(skip)
                    .take(filter.per_page as usize)
                    .collect(),
                total_count,
            })
        }

        async fn customer_emails(
            &self,
            customer_id: CustomerId,
        ) -> Result<Vec<CustomerEmail>, TransferError> {
            Ok(self
                .emails
                .get(&customer_id)
                .map(|e| {
                    vec![CustomerEmail {
                        kind: "home".to_string(),
                        value: Some(e.clone()),
                    }]
                })
                .unwrap_or_default())
        }

        async fn case_messages(
            &self,
            case_id: SourceId,
            kind: MessageKind,
        ) -> Result<Vec<Message>, TransferError> {
            if let Some(left) = self.failing_messages.lock().unwrap().get_mut(&case_id) {
                if *left > 0 {
                    *left -= 1;
                    return Err(TransferError::Status {
                        method: "GET".to_string(),
                        url: format!("cases/{}/notes", case_id),
                        status: 500,
                        body: "oops".to_string(),
                    });
                }
            }
            Ok(vec![Message {
                kind,
                body: format!("{} body", kind),
                from: "agent@example.com".to_string(),
                origin_at: at(59),
            }])
        }

        async fn label_case(&self, _case_id: SourceId, _label: &str) -> Result<(), TransferError> {
            Ok(())
        }
    }

    fn settings(concurrency: usize) -> IngestSettings {
        IngestSettings {
            concurrency,
            page_size: 50,
            retry: RetryPolicy::new(3, Duration::from_secs(10)),
            excluded_senders: vec!["customer102@example.com".to_string()],
            initial_cursor: at(0),
            ..IngestSettings::default()
        }
    }

    struct Harness {
        _dir: TempDir,
        store: CaseStore,
        source: Arc<FakeSource>,
        job: IngestJob,
        guard: LivenessGuard,
    }

    fn harness(source: FakeSource, settings: IngestSettings) -> Harness {
        let dir = tempdir().unwrap();
        let store = CaseStore::open(&dir.path().join("test.db")).unwrap();
        let source = Arc::new(source);
        let job = IngestJob::new(source.clone(), store.clone(), settings);
        let guard = LivenessGuard::new(
            job.stats().clone(),
            RunState::new(),
            LivenessPolicy {
                stale_after: Duration::from_secs(120),
                run_for: Duration::from_secs(600),
                idle_wait: Duration::from_secs(5),
            },
        );
        Harness {
            _dir: dir,
            store,
            source,
            job,
            guard,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ingest_skips_excluded_sender_and_advances_cursor() {
        let h = harness(
            FakeSource::with_cases(vec![
                source_case(101, 1),
                source_case(102, 2),
                source_case(103, 3),
            ]),
            settings(1),
        );

        let outcome = h.guard.run(&h.job).await.unwrap();
        assert!(matches!(
            outcome,
            GuardOutcome::Finished {
                reason: StopReason::Complete,
                ..
            }
        ));

        let counts = h.store.counts().await.unwrap();
        assert_eq!(counts.total, 2);
        assert!(h.store.exists(101).await.unwrap());
        assert!(!h.store.exists(102).await.unwrap());
        assert!(h.store.exists(103).await.unwrap());
        assert_eq!(h.job.stats().counter(StatKey::Skipped).await.unwrap(), 1);
        assert_eq!(h.job.stats().counter(StatKey::Transferred).await.unwrap(), 2);
        assert_eq!(h.job.cursor().load().await.unwrap().created_at, at(3));

        let stored = h.store.get(101).await.unwrap();
        assert_eq!(stored.email.as_deref(), Some("customer101@example.com"));
        assert_eq!(stored.messages.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rerun_over_overlapping_pages_never_duplicates() {
        for shards in [1, 3, 25] {
            let cases: Vec<SourceCase> = (0..12).map(|i| source_case(200 + i, 5)).collect();
            let h = harness(FakeSource::with_cases(cases), settings(shards));

            h.guard.run(&h.job).await.unwrap();
            h.job.stats().reopen().await.unwrap();
            // Rewind so every case comes back as already present
            h.store
                .set_stat_json(&h.job.stats().key(StatKey::Cursor), &CursorMark::at(at(0)))
                .await
                .unwrap();
            h.guard.run(&h.job).await.unwrap();
            assert!(h.job.stats().is_complete().await.unwrap());

            let counts = h.store.counts().await.unwrap();
            assert_eq!(counts.total, 12, "shards = {}", shards);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_item_failure_is_recorded_and_batch_continues() {
        let source = FakeSource::with_cases(vec![source_case(301, 1), source_case(302, 2)]);
        source.failing_messages.lock().unwrap().insert(301, 10);
        let h = harness(source, settings(2));

        h.guard.run(&h.job).await.unwrap();

        let failed = h.store.failed_cases().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].source_id, 301);
        assert!(h.store.get(302).await.unwrap().failure.is_none());
        assert_eq!(h.job.stats().counter(StatKey::Failures).await.unwrap(), 1);
        assert_eq!(h.job.stats().counter(StatKey::Warnings).await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_recovers_within_budget() {
        let source = FakeSource::with_cases(vec![source_case(401, 1)]);
        source.failing_messages.lock().unwrap().insert(401, 2);
        let h = harness(source, settings(1));

        h.guard.run(&h.job).await.unwrap();
        assert!(h.store.exists(401).await.unwrap());
        assert!(h.store.failed_cases().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cases_after_cutoff_are_not_valid() {
        let h = harness(
            FakeSource::with_cases(vec![source_case(501, 1), source_case(502, 30)]),
            IngestSettings {
                created_before: Some(at(10)),
                ..settings(1)
            },
        );

        h.guard.run(&h.job).await.unwrap();
        assert!(h.store.exists(501).await.unwrap());
        assert!(!h.store.exists(502).await.unwrap());
        assert!(h.job.stats().is_complete().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_fetch_waits_out_quota() {
        let source = FakeSource::with_cases(vec![source_case(601, 1)]);
        source.quota_rejections.store(2, Ordering::SeqCst);
        let h = harness(source, settings(1));
        let start = tokio::time::Instant::now();

        h.guard.run(&h.job).await.unwrap();
        assert!(h.store.exists(601).await.unwrap());
        assert!(start.elapsed() >= Duration::from_secs(24));
    }

    /// Completion is decided from one fetch; cases that show up at the source
    /// afterwards are not ingested until the job is reopened.
    #[tokio::test(start_paused = true)]
    async fn test_completion_races_late_arrivals() {
        let h = harness(FakeSource::with_cases(vec![source_case(701, 1)]), settings(1));
        h.guard.run(&h.job).await.unwrap();
        assert!(h.job.stats().is_complete().await.unwrap());

        h.source.cases.lock().unwrap().push(source_case(702, 2));
        assert_eq!(h.guard.run(&h.job).await.unwrap(), GuardOutcome::AlreadyComplete);
        assert!(!h.store.exists(702).await.unwrap());

        h.job.stats().reopen().await.unwrap();
        h.guard.run(&h.job).await.unwrap();
        assert!(h.store.exists(702).await.unwrap());
    }

    /// A full page of known cases that is not the last page must not end the
    /// job: the rest of the source is still unread.
    #[tokio::test(start_paused = true)]
    async fn test_known_page_before_end_does_not_complete() {
        let cases: Vec<SourceCase> = (0..4).map(|i| source_case(800 + i, i as u32 + 1)).collect();
        let h = harness(
            FakeSource::with_cases(cases.clone()),
            IngestSettings {
                page_size: 2,
                ..settings(1)
            },
        );
        // The first page is already stored by an earlier migration
        for case in &cases[..2] {
            h.store
                .insert(&NewCase {
                    source_id: case.id,
                    email: None,
                    subject: None,
                    body: None,
                    created_at: case.created_at,
                    messages: Vec::new(),
                })
                .await
                .unwrap();
        }

        h.guard.run(&h.job).await.unwrap();
        assert!(h.store.exists(802).await.unwrap());
        assert!(h.store.exists(803).await.unwrap());
        assert!(h.job.stats().is_complete().await.unwrap());
    }

    /// More cases share one creation second than fit on a page; once the
    /// first page is settled the scan must move on to the rest of the burst.
    #[tokio::test(start_paused = true)]
    async fn test_same_second_burst_larger_than_page() {
        let h = harness(
            FakeSource::with_cases(vec![
                source_case(900, 1),
                source_case(901, 1),
                source_case(903, 1),
                source_case(902, 2),
            ]),
            IngestSettings {
                page_size: 2,
                ..settings(1)
            },
        );

        let outcome = h.guard.run(&h.job).await.unwrap();
        assert!(matches!(
            outcome,
            GuardOutcome::Finished {
                reason: StopReason::Complete,
                ..
            }
        ));
        for id in [900, 901, 902, 903] {
            assert!(h.store.exists(id).await.unwrap(), "case {}", id);
        }
        assert_eq!(h.job.cursor().load().await.unwrap().created_at, at(2));
        assert!(h.source.searches.load(Ordering::SeqCst) < 10);
    }

    #[test]
    fn test_outcome_classification() {
        assert!(IngestOutcome::Excluded.is_valid());
        assert!(!IngestOutcome::AlreadyPresent.is_valid());
        assert!(!IngestOutcome::AfterCutoff.is_valid());
        assert!(!IngestOutcome::Abandoned.is_settled());
        assert!(!IngestOutcome::AfterCutoff.is_settled());
        assert!(IngestOutcome::Failed.is_settled());
        assert_eq!(IngestOutcome::AfterCutoff.to_string(), "after_cutoff");
    }
}
