// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! High-water mark of the ingest scan
//!
//! The source is scanned in creation order and its filter is inclusive at the
//! mark's timestamp, so items created in the same second as the mark come back
//! on the next fetch. The mark therefore carries the ids already settled at
//! that timestamp as well; anything older, or listed, is behind the cursor.
//!
//! After every page the cursor moves over the longest prefix of the page whose
//! items all reached a final outcome (stored, skipped, or recorded as failed),
//! so a restart never skips an item that was still in flight.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use helpdesk_types::{SourceId, StatKey};

use crate::stats::JobStats;
use crate::store::StoreError;

/// Position in the source's creation order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorMark {
    pub created_at: DateTime<Utc>,
    /// Settled items created exactly at `created_at`
    #[serde(default)]
    pub settled_ids: BTreeSet<SourceId>,
}

impl CursorMark {
    pub fn at(created_at: DateTime<Utc>) -> Self {
        Self {
            created_at,
            settled_ids: BTreeSet::new(),
        }
    }

    /// Whether an item is behind the cursor and needs no further work.
    pub fn covers(&self, created_at: DateTime<Utc>, source_id: SourceId) -> bool {
        created_at < self.created_at
            || (created_at == self.created_at && self.settled_ids.contains(&source_id))
    }

    /// Fold a newer mark into this one. Returns whether anything changed.
    fn merge(&mut self, newer: CursorMark) -> bool {
        if newer.created_at > self.created_at {
            *self = newer;
            true
        } else if newer.created_at == self.created_at {
            let before = self.settled_ids.len();
            self.settled_ids.extend(newer.settled_ids);
            self.settled_ids.len() != before
        } else {
            false
        }
    }
}

/// Durable resume cursor of one job.
#[derive(Clone)]
pub struct ResumeCursor {
    stats: JobStats,
    initial: DateTime<Utc>,
}

impl ResumeCursor {
    /// `initial` is where a job that never recorded a mark starts scanning.
    pub fn new(stats: JobStats, initial: DateTime<Utc>) -> Self {
        Self { stats, initial }
    }

    pub async fn load(&self) -> Result<CursorMark, StoreError> {
        let stored: Option<CursorMark> = self
            .stats
            .store()
            .stat_json(&self.stats.key(StatKey::Cursor))
            .await?;
        Ok(stored.unwrap_or_else(|| CursorMark::at(self.initial)))
    }

    /// Move the cursor forward over `mark`; never moves it back.
    ///
    /// Returns whether the stored mark changed.
    pub async fn advance(&self, mark: CursorMark) -> Result<bool, StoreError> {
        let mut current = self.load().await?;
        if !current.merge(mark) {
            return Ok(false);
        }
        self.stats
            .store()
            .set_stat_json(&self.stats.key(StatKey::Cursor), &current)
            .await?;
        debug!(
            job = %self.stats.job(),
            created_at = %current.created_at,
            settled_at_mark = current.settled_ids.len(),
            "Cursor advanced"
        );
        Ok(true)
    }
}

/// Mark covering the leading run of settled items of a page.
///
/// `page` holds `(created_at, source_id)` of each item in fetch order and
/// `settled[i]` whether item `i` reached a final outcome.
pub fn settled_mark(page: &[(DateTime<Utc>, SourceId)], settled: &[bool]) -> Option<CursorMark> {
    let prefix: Vec<(DateTime<Utc>, SourceId)> = page
        .iter()
        .zip(settled)
        .take_while(|(_, done)| **done)
        .map(|(item, _)| *item)
        .collect();
    let newest = prefix.iter().map(|(at, _)| *at).max()?;
    Some(CursorMark {
        created_at: newest,
        settled_ids: prefix
            .iter()
            .filter(|(at, _)| *at == newest)
            .map(|(_, id)| *id)
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::store::CaseStore;
    use chrono::TimeZone;
    use helpdesk_types::JobKind;
    use tempfile::tempdir;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 1, 1, 0, minute, 0).unwrap()
    }

    fn mark(minute: u32, ids: &[SourceId]) -> CursorMark {
        CursorMark {
            created_at: at(minute),
            settled_ids: ids.iter().copied().collect(),
        }
    }

    #[test]
    fn test_settled_mark_stops_at_first_gap() {
        let page = [(at(1), 10), (at(2), 11), (at(2), 12), (at(4), 13)];
        assert_eq!(
            settled_mark(&page, &[true, true, false, true]),
            Some(mark(2, &[11]))
        );
        assert_eq!(settled_mark(&page, &[false, true, true, true]), None);
        assert_eq!(
            settled_mark(&page, &[true, true, true, false]),
            Some(mark(2, &[11, 12]))
        );
        // Items never started have no result and count as unsettled
        assert_eq!(settled_mark(&page, &[true]), Some(mark(1, &[10])));
    }

    #[test]
    fn test_covers() {
        let m = mark(5, &[7]);
        assert!(m.covers(at(4), 99));
        assert!(m.covers(at(5), 7));
        assert!(!m.covers(at(5), 8));
        assert!(!m.covers(at(6), 7));
    }

    #[tokio::test]
    async fn test_cursor_is_monotonic() {
        let dir = tempdir().unwrap();
        let store = CaseStore::open(&dir.path().join("test.db")).unwrap();
        let initial = Utc.with_ymd_and_hms(2012, 7, 16, 11, 45, 44).unwrap();
        let cursor = ResumeCursor::new(JobStats::new(JobKind::Ingest, store), initial);

        assert_eq!(cursor.load().await.unwrap(), CursorMark::at(initial));

        assert!(cursor.advance(mark(5, &[50])).await.unwrap());
        assert!(!cursor.advance(mark(3, &[70])).await.unwrap());
        assert!(!cursor.advance(mark(5, &[50])).await.unwrap());
        assert!(cursor.advance(mark(5, &[51])).await.unwrap());
        assert_eq!(cursor.load().await.unwrap(), mark(5, &[50, 51]));

        assert!(cursor.advance(mark(6, &[1])).await.unwrap());
        assert_eq!(cursor.load().await.unwrap(), mark(6, &[1]));
    }
}
