//! Batched, parallel LLM scoring.
//!
//! Items are split into contiguous batches, each batch becomes one prompt,
//! and up to `workers` prompts are in flight at once. Completions arrive in
//! any order; each one fills the slot for its batch index, and the output is
//! read from the slots once every batch is done, so the result always has
//! the input order.
//!
//! A failed call or a short answer never fails the run: the affected items
//! get [`Assessment::fallback`].

use crate::llm::{AskAsync, LlmService};
use crate::models::{Assessment, Item, SCORE_WEIGHTS, ScoreRecord};
use crate::utils::clip;
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Characters of snippet quoted per item.
pub const SUMMARY_CHARS: usize = 200;

#[derive(Serialize)]
struct PromptItem<'a> {
    index: usize,
    title: &'a str,
    summary: &'a str,
    source: &'a str,
    published: &'a str,
}

/// Render the scoring prompt for one batch.
///
/// The item list is the last section, introduced by `Items:` on its own line
/// and encoded as one compact JSON array.
pub fn build_prompt(batch: &[Item], topics: &[String]) -> String {
    let listing: Vec<PromptItem<'_>> = batch
        .iter()
        .enumerate()
        .map(|(index, item)| PromptItem {
            index,
            title: &item.title,
            summary: clip(&item.snippet, SUMMARY_CHARS),
            source: item.source.as_str(),
            published: &item.date_published,
        })
        .collect();
    let listing = serde_json::to_string(&listing).unwrap_or_else(|_| "[]".to_string());
    let [wr, wi, wt, wl] = SCORE_WEIGHTS;

    format!(
        "Assess the following items for an analysis of these topics: {topics}.\n\
         \n\
         Rate every item on four dimensions, each a number between 0 and 1:\n\
         - relevance: how closely the item matches the topics\n\
         - importance: how significant the information is\n\
         - timeliness: how recent and current it is\n\
         - reliability: how trustworthy the source is\n\
         \n\
         Composite score = {wr}*relevance + {wi}*importance + {wt}*timeliness + {wl}*reliability.\n\
         Add a one-sentence brief_analysis per item.\n\
         \n\
         Reply with a JSON array only, one object per item, in the same order as the items:\n\
         [{{\"index\": 0, \"relevance\": 0.8, \"importance\": 0.7, \"timeliness\": 0.9, \"reliability\": 0.8, \"score\": 0.79, \"brief_analysis\": \"...\"}}]\n\
         \n\
         Items:\n{listing}",
        topics = topics.join(", "),
    )
}

pub struct Scorer<'a, A> {
    llm: &'a LlmService<A>,
    batch_size: usize,
    workers: usize,
}

impl<'a, A> Scorer<'a, A>
where
    A: AskAsync<Response = String>,
{
    pub fn new(llm: &'a LlmService<A>, batch_size: usize, workers: usize) -> Self {
        Self {
            llm,
            batch_size: batch_size.max(1),
            workers: workers.max(1),
        }
    }

    /// Score every item. Same length and order as `items`.
    #[instrument(level = "info", skip_all, fields(items = items.len(), batch_size = self.batch_size, workers = self.workers))]
    pub async fn score(&self, items: Vec<Item>, topics: &[String]) -> Vec<Item> {
        if items.is_empty() {
            return items;
        }
        let t0 = Instant::now();
        let total = items.len();

        let batches: Vec<Vec<Item>> = {
            let chunks = items.into_iter().chunks(self.batch_size);
            chunks.into_iter().map(|c| c.collect()).collect()
        };
        let batch_count = batches.len();

        let mut slots: Vec<Option<Vec<Item>>> = (0..batch_count).map(|_| None).collect();
        let mut completions = stream::iter(batches.into_iter().enumerate())
            .map(|(idx, batch)| self.score_batch(idx, batch, topics))
            .buffer_unordered(self.workers);

        while let Some((idx, scored)) = completions.next().await {
            slots[idx] = Some(scored);
        }

        let scored: Vec<Item> = slots.into_iter().flatten().flatten().collect();
        info!(
            total,
            batches = batch_count,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Scoring finished"
        );
        scored
    }

    async fn score_batch(&self, idx: usize, mut batch: Vec<Item>, topics: &[String]) -> (usize, Vec<Item>) {
        let worker = idx % self.workers;
        let prompt = build_prompt(&batch, topics);
        debug!(batch = idx, worker, size = batch.len(), "Scoring batch");

        match self.llm.score(&prompt, batch.len()).await {
            Ok(records) => {
                if records.len() < batch.len() {
                    warn!(
                        batch = idx,
                        worker,
                        expected = batch.len(),
                        got = records.len(),
                        "Short scoring answer; defaulting the rest"
                    );
                }
                apply(&mut batch, records);
            }
            Err(e) => {
                warn!(batch = idx, worker, error = %e, "Batch scoring failed; using default scores");
                for item in &mut batch {
                    item.assessment = Some(Assessment::fallback());
                }
            }
        }
        (idx, batch)
    }
}

/// Attach records to items by position; items past the end get the fallback.
fn apply(batch: &mut [Item], records: Vec<ScoreRecord>) {
    let mut records = records.into_iter();
    for item in batch.iter_mut() {
        let assessment = records
            .next()
            .map(Assessment::from)
            .unwrap_or_else(Assessment::fallback);
        item.assessment = Some(assessment);
    }
}
