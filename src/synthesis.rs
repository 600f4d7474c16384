//! Narrative summary of a run.
//!
//! The LLM gets the statistics, the date range covered, the top items and
//! the key points, and writes free text. When it cannot (no credential, a
//! failed call, an empty answer) a deterministic summary is built from the
//! statistics and key points alone.

use crate::analysis::top_by_score;
use crate::llm::{AskAsync, LlmService};
use crate::models::{Item, Statistics};
use crate::utils::clip;
use itertools::Itertools;
use std::fmt::Write;
use tracing::{info, instrument, warn};

pub struct Synthesizer<'a, A> {
    llm: &'a LlmService<A>,
    top_n: usize,
}

fn source_breakdown(stats: &Statistics) -> String {
    stats
        .source_distribution
        .iter()
        .map(|(source, count)| format!("{source}: {count}"))
        .join(", ")
}

fn date_range(stats: &Statistics) -> Option<String> {
    // BTreeMap keys are ISO days, so lexical order is chronological
    let first = stats.date_distribution.keys().next()?;
    let last = stats.date_distribution.keys().next_back()?;
    Some(if first == last {
        first.clone()
    } else {
        format!("{first} to {last}")
    })
}

/// Summary used when the LLM cannot write one.
pub fn fallback_summary(stats: &Statistics, key_points: &[String]) -> String {
    let mut out = format!(
        "Collected and retained {} items with an average score of {:.2}.",
        stats.total_count, stats.average_score
    );
    if !stats.source_distribution.is_empty() {
        let _ = write!(out, " Sources: {}.", source_breakdown(stats));
    }
    if let Some(range) = date_range(stats) {
        let _ = write!(out, " Publication dates span {range}.");
    }
    if !key_points.is_empty() {
        out.push_str("\n\nKey points:\n");
        out.push_str(&key_points.iter().map(|p| format!("- {p}")).join("\n"));
    }
    out
}

impl<'a, A> Synthesizer<'a, A>
where
    A: AskAsync<Response = String>,
{
    pub fn new(llm: &'a LlmService<A>, top_n: usize) -> Self {
        Self { llm, top_n }
    }

    fn prompt(&self, items: &[Item], stats: &Statistics, key_points: &[String]) -> String {
        let mut p = String::from(
            "Write a concise analytical overview (three to five paragraphs) of the \
             information below. Cover the main themes, notable developments and \
             how the sources compare.\n\n",
        );
        let _ = writeln!(p, "Total items: {}", stats.total_count);
        let _ = writeln!(p, "Average score: {:.2}", stats.average_score);
        let _ = writeln!(p, "Sources: {}", source_breakdown(stats));
        if let Some(range) = date_range(stats) {
            let _ = writeln!(p, "Date range: {range}");
        }

        p.push_str("\nTop items:\n");
        for (i, item) in top_by_score(items, self.top_n).iter().enumerate() {
            let _ = writeln!(
                p,
                "{}. {} ({}, score {:.2}): {}",
                i + 1,
                item.title,
                item.source_name,
                item.score(),
                clip(&item.snippet, 200)
            );
        }

        if !key_points.is_empty() {
            p.push_str("\nKey points:\n");
            for point in key_points {
                let _ = writeln!(p, "- {point}");
            }
        }
        p
    }

    /// Overall analysis text; never fails.
    #[instrument(level = "info", skip_all, fields(items = items.len(), top_n = self.top_n))]
    pub async fn synthesize(&self, items: &[Item], stats: &Statistics, key_points: &[String]) -> String {
        let prompt = self.prompt(items, stats, key_points);
        match self.llm.complete(&prompt).await {
            Ok(Some(text)) if !text.trim().is_empty() => {
                info!(chars = text.len(), "Synthesized overall analysis");
                text.trim().to_string()
            }
            Ok(Some(_)) => {
                warn!("Empty synthesis answer; using template");
                fallback_summary(stats, key_points)
            }
            Ok(None) => {
                info!("LLM not configured; using template summary");
                fallback_summary(stats, key_points)
            }
            Err(e) => {
                warn!(error = %e, "Synthesis failed; using template");
                fallback_summary(stats, key_points)
            }
        }
    }
}
