//! Stage orchestration: collect → score → filter → analyze → synthesize.
//!
//! The pipeline stops early with an explicit [`RunOutcome`] when collection
//! finds nothing or nothing passes the score threshold. A stored `analysis`
//! checkpoint short-circuits everything after collection.

use crate::analysis::{compute_statistics, extract_key_points, filter_by_score, identify_relationships};
use crate::checkpoint::{CheckpointStore, RunScope, Stage};
use crate::collector::Collector;
use crate::config::AnalysisConfig;
use crate::llm::{AskAsync, LlmService};
use crate::models::{AnalysisResult, DateWindow, Item};
use crate::scorer::Scorer;
use crate::synthesis::Synthesizer;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    NoItemsCollected,
    /// Every item scored below the threshold.
    NoItemsPassedFilter { scored: Vec<Item> },
    Completed(Box<AnalysisResult>),
}

/// Stored form of the `analysis` checkpoint.
#[derive(Debug, Serialize, Deserialize)]
struct AnalysisSnapshot {
    scope: RunScope,
    result: AnalysisResult,
}

pub struct Pipeline<A> {
    collector: Collector,
    llm: LlmService<A>,
    analysis: AnalysisConfig,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
}

impl<A> Pipeline<A>
where
    A: AskAsync<Response = String>,
{
    pub fn new(collector: Collector, llm: LlmService<A>, analysis: AnalysisConfig) -> Self {
        Self {
            collector,
            llm,
            analysis,
            checkpoints: None,
        }
    }

    /// Use `store` for the `analysis` checkpoint. The collector carries its
    /// own handle for `data_collection`.
    pub fn with_checkpoints(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    #[instrument(level = "info", skip_all, fields(topics = ?topics, start = %window.start_date(), end = %window.end_date()))]
    pub async fn run(&self, topics: &[String], window: &DateWindow) -> RunOutcome {
        let t0 = Instant::now();

        let collected = self.collector.collect(topics, window).await;
        if collected.is_empty() {
            warn!("No items collected; stopping");
            return RunOutcome::NoItemsCollected;
        }
        info!(count = collected.len(), "Collection stage done");

        let scope = RunScope::new(topics, window);
        if let Some(store) = &self.checkpoints {
            match store.load_as::<AnalysisSnapshot>(Stage::Analysis) {
                Some(snapshot) if snapshot.scope == scope => {
                    info!(filtered = snapshot.result.filtered_items.len(), "Resuming from analysis checkpoint");
                    return RunOutcome::Completed(Box::new(snapshot.result));
                }
                Some(_) => warn!("Analysis checkpoint is for a different run; scoring again"),
                None => {}
            }
        }

        let scorer = Scorer::new(&self.llm, self.analysis.batch_size, self.analysis.workers);
        let scored = scorer.score(collected, topics).await;

        let filtered = filter_by_score(&scored, self.analysis.min_score);
        info!(
            scored = scored.len(),
            kept = filtered.len(),
            min_score = self.analysis.min_score,
            "Applied score threshold"
        );
        if filtered.is_empty() {
            warn!("No items passed the score threshold; stopping");
            return RunOutcome::NoItemsPassedFilter { scored };
        }

        let key_points = if self.analysis.key_points {
            extract_key_points(&self.llm, &filtered).await
        } else {
            Vec::new()
        };
        let relationships = identify_relationships(&filtered);
        let statistics = compute_statistics(&filtered);
        let overall_analysis = if self.analysis.overall_analysis {
            Synthesizer::new(&self.llm, self.analysis.top_n)
                .synthesize(&filtered, &statistics, &key_points)
                .await
        } else {
            String::new()
        };

        let mut result = AnalysisResult {
            scored_items: scored,
            filtered_items: filtered,
            key_points,
            relationships,
            statistics,
            overall_analysis,
            analysis_time: Local::now(),
        };

        if let Some(store) = &self.checkpoints {
            let snapshot = AnalysisSnapshot { scope, result };
            if let Err(e) = store.save_as(Stage::Analysis, &snapshot) {
                error!(error = %e, "Failed to save analysis checkpoint");
            }
            result = snapshot.result;
        }

        info!(
            filtered = result.filtered_items.len(),
            key_points = result.key_points.len(),
            average_score = result.statistics.average_score,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Pipeline run complete"
        );
        RunOutcome::Completed(Box::new(result))
    }

    /// Drop every checkpoint after a fully successful run.
    pub fn finish(&self) {
        if let Some(store) = &self.checkpoints {
            store.clear_stage(Stage::DataCollection);
            store.clear_stage(Stage::Analysis);
            info!("Cleared checkpoints");
        }
    }
}
