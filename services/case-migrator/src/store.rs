// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! SQLite-based local case store
//!
//! Holds the intermediate copy of every migrated case between the two legs,
//! the customer email cache, and the job statistics shown on the dashboard.
//! A case row is unique by source id; that constraint plus a lookup before
//! each insert is what keeps ingest idempotent.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::Mutex;

use helpdesk_types::{
    Case, CaseCounts, CustomerId, DestinationId, Message, MessageKind, NewCase, SourceId,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Case not found: {0}")]
    NotFound(SourceId),
    #[error("Count out of range: {0}")]
    CountOutOfRange(#[from] std::num::TryFromIntError),
}

/// SQLite-backed store shared by both migration legs
#[derive(Clone)]
pub struct CaseStore {
    conn: Arc<Mutex<Connection>>,
}

impl CaseStore {
    /// Open (or create) the store at `db_path`, initializing the schema
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS cases (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_id INTEGER NOT NULL UNIQUE,
                email TEXT,
                subject TEXT,
                body TEXT,
                created_at TEXT,
                destination_id INTEGER,
                failed TEXT,
                ingested_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                case_source_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                body TEXT NOT NULL,
                sender TEXT NOT NULL,
                origin_at TEXT NOT NULL,
                FOREIGN KEY (case_source_id) REFERENCES cases(source_id)
            );

            CREATE TABLE IF NOT EXISTS customers (
                source_customer_id INTEGER PRIMARY KEY,
                email TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS stats (
                stat TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_cases_unpublished
                ON cases(created_at) WHERE destination_id IS NULL AND failed IS NULL;
            CREATE INDEX IF NOT EXISTS idx_messages_case ON messages(case_source_id, origin_at);
            "#,
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // ------------------------------------------------------------------
    // Cases
    // ------------------------------------------------------------------

    /// Check whether a case (ingested or terminally failed) is already stored
    pub async fn exists(&self, source_id: SourceId) -> Result<bool, StoreError> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM cases WHERE source_id = ?",
            params![source_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Insert a case and its messages in one transaction.
    ///
    /// Returns false, writing nothing, when a row for the source id exists.
    pub async fn insert(&self, case: &NewCase) -> Result<bool, StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            r#"INSERT OR IGNORE INTO cases (source_id, email, subject, body, created_at)
               VALUES (?, ?, ?, ?, ?)"#,
            params![
                case.source_id,
                case.email,
                case.subject,
                case.body,
                case.created_at
            ],
        )?;
        if inserted == 0 {
            return Ok(false);
        }

        insert_messages(&tx, case.source_id, &case.messages)?;
        tx.commit()?;
        Ok(true)
    }

    /// Append messages to a stored case
    pub async fn insert_children(
        &self,
        source_id: SourceId,
        messages: &[Message],
    ) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let found: Option<i64> = tx
            .query_row(
                "SELECT id FROM cases WHERE source_id = ?",
                params![source_id],
                |row| row.get(0),
            )
            .optional()?;
        if found.is_none() {
            return Err(StoreError::NotFound(source_id));
        }
        let count = insert_messages(&tx, source_id, messages)?;
        tx.commit()?;
        Ok(count)
    }

    /// Record the destination ticket for a case
    pub async fn mark_published(
        &self,
        source_id: SourceId,
        destination_id: DestinationId,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let rows_affected = conn.execute(
            "UPDATE cases SET destination_id = ? WHERE source_id = ?",
            params![destination_id, source_id],
        )?;
        if rows_affected == 0 {
            return Err(StoreError::NotFound(source_id));
        }
        Ok(())
    }

    /// Record a terminal failure.
    ///
    /// A case that never made it into the store gets a failure-only row so
    /// later ingest runs treat it as already handled.
    pub async fn mark_failed(&self, source_id: SourceId, reason: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO cases (source_id, failed) VALUES (?, ?)
               ON CONFLICT(source_id) DO UPDATE SET failed = excluded.failed"#,
            params![source_id, reason],
        )?;
        Ok(())
    }

    /// Oldest cases that are neither published nor failed, with messages
    pub async fn scan_unpublished(&self, limit: usize) -> Result<Vec<Case>, StoreError> {
        let conn = self.conn.lock().await;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = conn.prepare(
            r#"SELECT source_id, email, subject, body, created_at, destination_id, failed
               FROM cases
               WHERE destination_id IS NULL AND failed IS NULL
               ORDER BY created_at ASC, source_id ASC
               LIMIT ?"#,
        )?;
        let mut cases = stmt
            .query_map(params![limit], case_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        for case in &mut cases {
            case.messages = load_messages(&conn, case.source_id)?;
        }
        Ok(cases)
    }

    /// Cases carrying a failure reason, for manual review
    pub async fn failed_cases(&self) -> Result<Vec<Case>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"SELECT source_id, email, subject, body, created_at, destination_id, failed
               FROM cases WHERE failed IS NOT NULL ORDER BY source_id"#,
        )?;
        let cases = stmt
            .query_map([], case_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(cases)
    }

    /// Fetch a single case with its messages
    pub async fn get(&self, source_id: SourceId) -> Result<Case, StoreError> {
        let conn = self.conn.lock().await;
        let mut case = conn
            .query_row(
                r#"SELECT source_id, email, subject, body, created_at, destination_id, failed
                   FROM cases WHERE source_id = ?"#,
                params![source_id],
                case_from_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(source_id),
                other => StoreError::Sqlite(other),
            })?;
        case.messages = load_messages(&conn, source_id)?;
        Ok(case)
    }

    pub async fn counts(&self) -> Result<CaseCounts, StoreError> {
        let conn = self.conn.lock().await;
        let (total, published, failed): (i64, i64, i64) = conn.query_row(
            r#"SELECT COUNT(*),
                      COALESCE(SUM(destination_id IS NOT NULL), 0),
                      COALESCE(SUM(destination_id IS NULL AND failed IS NOT NULL), 0)
               FROM cases"#,
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        let total = u64::try_from(total)?;
        let published = u64::try_from(published)?;
        let failed = u64::try_from(failed)?;
        Ok(CaseCounts {
            total,
            published,
            failed,
            pending: total.saturating_sub(published + failed),
        })
    }

    // ------------------------------------------------------------------
    // Customer email cache
    // ------------------------------------------------------------------

    pub async fn customer_email(
        &self,
        customer_id: CustomerId,
    ) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().await;
        let email = conn
            .query_row(
                "SELECT email FROM customers WHERE source_customer_id = ?",
                params![customer_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(email)
    }

    /// Remember a customer's email unless a mapping already exists.
    ///
    /// Returns the stored mapping, which is the earlier one on a race.
    pub async fn remember_customer_email(
        &self,
        customer_id: CustomerId,
        email: &str,
    ) -> Result<String, StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO customers (source_customer_id, email) VALUES (?, ?)",
            params![customer_id, email],
        )?;
        let stored = conn.query_row(
            "SELECT email FROM customers WHERE source_customer_id = ?",
            params![customer_id],
            |row| row.get(0),
        )?;
        Ok(stored)
    }

    // ------------------------------------------------------------------
    // Job statistics
    // ------------------------------------------------------------------

    pub async fn stat(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().await;
        let value = conn
            .query_row(
                "SELECT value FROM stats WHERE stat = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub async fn set_stat(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO stats (stat, value) VALUES (?1, ?2)
               ON CONFLICT(stat) DO UPDATE SET value = ?2, updated_at = datetime('now')"#,
            params![key, value],
        )?;
        Ok(())
    }

    /// Add `by` to a numeric stat, treating a missing or non-numeric value as
    /// zero. Returns the new value.
    pub async fn increment_stat(&self, key: &str, by: i64) -> Result<i64, StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO stats (stat, value) VALUES (?1, CAST(?2 AS TEXT))
               ON CONFLICT(stat) DO UPDATE
               SET value = CAST(CAST(value AS INTEGER) + ?2 AS TEXT),
                   updated_at = datetime('now')"#,
            params![key, by],
        )?;
        let value: String = conn.query_row(
            "SELECT value FROM stats WHERE stat = ?",
            params![key],
            |row| row.get(0),
        )?;
        Ok(value.parse().unwrap_or(0))
    }

    /// Blank a stat only if it still holds `expected`. Returns whether it did.
    pub async fn clear_stat_if(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().await;
        let rows_affected = conn.execute(
            r#"UPDATE stats SET value = '', updated_at = datetime('now')
               WHERE stat = ? AND value = ?"#,
            params![key, expected],
        )?;
        Ok(rows_affected > 0)
    }

    /// All stats whose key starts with `prefix`, ordered by key
    pub async fn stats(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"SELECT stat, value FROM stats
               WHERE substr(stat, 1, length(?1)) = ?1
               ORDER BY stat"#,
        )?;
        let rows = stmt
            .query_map(params![prefix], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub async fn stat_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.stat(key).await? {
            Some(raw) if !raw.is_empty() => Ok(Some(serde_json::from_str(&raw)?)),
            _ => Ok(None),
        }
    }

    pub async fn set_stat_json<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value)?;
        self.set_stat(key, &raw).await
    }
}

fn insert_messages(
    conn: &Connection,
    source_id: SourceId,
    messages: &[Message],
) -> Result<usize, StoreError> {
    let mut stmt = conn.prepare(
        r#"INSERT INTO messages (case_source_id, kind, body, sender, origin_at)
           VALUES (?, ?, ?, ?, ?)"#,
    )?;
    for message in messages {
        stmt.execute(params![
            source_id,
            message.kind.to_string(),
            message.body,
            message.from,
            message.origin_at,
        ])?;
    }
    Ok(messages.len())
}

fn load_messages(conn: &Connection, source_id: SourceId) -> Result<Vec<Message>, StoreError> {
    let mut stmt = conn.prepare(
        r#"SELECT kind, body, sender, origin_at FROM messages
           WHERE case_source_id = ? ORDER BY origin_at ASC, id ASC"#,
    )?;
    let messages = stmt
        .query_map(params![source_id], |row| {
            let kind: String = row.get(0)?;
            let kind = kind.parse::<MessageKind>().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;
            Ok(Message {
                kind,
                body: row.get(1)?,
                from: row.get(2)?,
                origin_at: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(messages)
}

fn case_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Case> {
    let created_at: Option<DateTime<Utc>> = row.get(4)?;
    Ok(Case {
        source_id: row.get(0)?,
        email: row.get(1)?,
        subject: row.get(2)?,
        body: row.get(3)?,
        created_at,
        destination_id: row.get(5)?,
        failure: row.get(6)?,
        messages: Vec::new(),
    })
}
