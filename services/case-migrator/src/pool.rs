// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Sharded worker pool
//!
//! A page of items is split into N interleaved shards (item `i` goes to shard
//! `i mod N`) and each shard is drained in index order by its own task. Workers
//! check a shared stop predicate before every item, so a deadline or a
//! superseded runner stops the whole pool at the next item boundary without
//! interrupting calls already in flight.

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info_span};

/// Shared "keep going" predicate polled by workers between items.
pub type KeepGoing = Arc<dyn Fn() -> bool + Send + Sync>;

/// Outcome of running a batch through the pool.
#[derive(Debug)]
pub struct PoolReport<R> {
    /// Per-item results sorted by item index
    pub results: Vec<(usize, R)>,
    /// Items with no result, because the pool was asked to stop or a worker
    /// was lost mid-shard. Release builds abort on panic, so only test builds
    /// ever see the latter.
    pub not_started: usize,
}

#[derive(Clone, Copy, Debug)]
pub struct ShardedWorkerPool {
    shards: usize,
}

impl ShardedWorkerPool {
    /// Create a pool of `shards` workers; zero is treated as one.
    pub fn new(shards: usize) -> Self {
        Self {
            shards: shards.max(1),
        }
    }

    pub fn shards(&self) -> usize {
        self.shards
    }

    /// Split `items` into interleaved shards, keeping each item's index.
    pub fn partition<T>(&self, items: Vec<T>) -> Vec<Vec<(usize, T)>> {
        let mut shards: Vec<Vec<(usize, T)>> = (0..self.shards).map(|_| Vec::new()).collect();
        for (index, item) in items.into_iter().enumerate() {
            shards[index % self.shards].push((index, item));
        }
        shards
    }

    /// Run `per_item` over every item, one concurrent worker per shard, and
    /// wait for all workers to finish.
    pub async fn run<T, R, F, Fut>(
        &self,
        items: Vec<T>,
        keep_going: KeepGoing,
        per_item: F,
    ) -> PoolReport<R>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(usize, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        let total = items.len();
        let per_item = Arc::new(per_item);
        let mut workers: JoinSet<Vec<(usize, R)>> = JoinSet::new();

        for (shard, work) in self.partition(items).into_iter().enumerate() {
            if work.is_empty() {
                continue;
            }
            let per_item = Arc::clone(&per_item);
            let keep_going = Arc::clone(&keep_going);
            workers.spawn(
                async move {
                    let mut done = Vec::with_capacity(work.len());
                    for (index, item) in work {
                        if !keep_going() {
                            debug!(index, "Stop requested, leaving rest of shard");
                            break;
                        }
                        let result = per_item(index, item).await;
                        done.push((index, result));
                    }
                    done
                }
                .instrument(info_span!("worker", shard)),
            );
        }

        let mut results = Vec::with_capacity(total);
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(done) => results.extend(done),
                Err(e) => error!(error = %e, "Worker task lost"),
            }
        }
        results.sort_by_key(|(index, _)| *index);

        PoolReport {
            not_started: total - results.len(),
            results,
        }
    }
}
