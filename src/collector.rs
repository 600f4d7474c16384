//! Fan-out over (topic × adapter), fan-in with fingerprint deduplication.
//!
//! Every invocation runs on a bounded pool via `buffer_unordered`; results
//! are admitted in completion order and the first item with a given
//! fingerprint wins. The seen-set is owned by the fan-in loop alone.

use crate::checkpoint::{CheckpointStore, RunScope, Stage};
use crate::models::{DateWindow, Item};
use crate::sources::SourceAdapter;
use futures::FutureExt;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Persisted output of the collection stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionSnapshot {
    /// Topics and window the items were collected for.
    pub scope: RunScope,
    pub items: Vec<Item>,
    pub fingerprints: Vec<String>,
}

/// First-seen-wins filter over [`Item::fingerprint`].
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<String>,
    dropped: usize,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` when `item` had not been seen before.
    pub fn admit(&mut self, item: &Item) -> bool {
        if self.seen.insert(item.fingerprint()) {
            true
        } else {
            self.dropped += 1;
            false
        }
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn into_fingerprints(self) -> Vec<String> {
        let mut fps: Vec<String> = self.seen.into_iter().collect();
        fps.sort_unstable();
        fps
    }
}

pub struct Collector {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    workers: usize,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
}

impl Collector {
    pub fn new(adapters: Vec<Arc<dyn SourceAdapter>>, workers: usize) -> Self {
        Self {
            adapters,
            workers: workers.max(1),
            checkpoints: None,
        }
    }

    pub fn with_checkpoints(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    /// Collect deduplicated items for every topic from every adapter.
    ///
    /// Returns a stored `data_collection` snapshot instead when one exists
    /// for the same topics and window and holds at least one item. Empty
    /// results are never stored.
    #[instrument(level = "info", skip_all, fields(topics = topics.len(), adapters = self.adapters.len()))]
    pub async fn collect(&self, topics: &[String], window: &DateWindow) -> Vec<Item> {
        let scope = RunScope::new(topics, window);
        if let Some(items) = self.resume(&scope) {
            return items;
        }

        let t0 = Instant::now();
        let jobs: Vec<(Arc<dyn SourceAdapter>, &str)> = topics
            .iter()
            .flat_map(|topic| {
                self.adapters
                    .iter()
                    .map(move |adapter| (Arc::clone(adapter), topic.as_str()))
            })
            .collect();
        let job_count = jobs.len();

        let mut results = stream::iter(jobs)
            .map(|(adapter, topic)| async move {
                let kind = adapter.kind();
                let outcome = AssertUnwindSafe(adapter.fetch(topic, window))
                    .catch_unwind()
                    .await;
                (kind, topic, outcome)
            })
            .buffer_unordered(self.workers);

        let mut dedup = Deduplicator::new();
        let mut items: Vec<Item> = Vec::new();

        while let Some((kind, topic, outcome)) = results.next().await {
            let batch = match outcome {
                Ok(batch) => batch,
                Err(_) => {
                    error!(source = %kind, topic, "Source adapter panicked; skipping");
                    continue;
                }
            };
            let fetched = batch.len();
            let before = items.len();
            items.extend(batch.into_iter().filter(|item| dedup.admit(item)));
            debug!(source = %kind, topic, fetched, admitted = items.len() - before, "Merged source results");
        }

        info!(
            jobs = job_count,
            count = items.len(),
            duplicates = dedup.dropped(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Collection finished"
        );

        if items.is_empty() {
            debug!("Nothing collected; no checkpoint written");
        } else if let Some(store) = &self.checkpoints {
            let snapshot = CollectionSnapshot {
                scope,
                items: items.clone(),
                fingerprints: dedup.into_fingerprints(),
            };
            if let Err(e) = store.save_as(Stage::DataCollection, &snapshot) {
                error!(error = %e, "Failed to save collection checkpoint");
            }
        }

        items
    }

    fn resume(&self, scope: &RunScope) -> Option<Vec<Item>> {
        let store = self.checkpoints.as_ref()?;
        let snapshot = store.load_as::<CollectionSnapshot>(Stage::DataCollection)?;
        if snapshot.scope != *scope {
            warn!(
                stored_topics = ?snapshot.scope.topics,
                stored_start = %snapshot.scope.start_date,
                stored_end = %snapshot.scope.end_date,
                "Collection checkpoint is for a different run; collecting again"
            );
            return None;
        }
        if snapshot.items.is_empty() {
            debug!("Collection checkpoint holds no items; collecting again");
            return None;
        }
        info!(count = snapshot.items.len(), "Resuming from collection checkpoint");
        Some(snapshot.items)
    }
}
