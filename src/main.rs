//! # zhilan
//!
//! Collects information on a set of topics from web search, news and
//! academic sources, scores every item with an LLM, and writes the filtered,
//! aggregated analysis as JSON for downstream report tools.
//!
//! ## Usage
//!
//! ```sh
//! zhilan -c config.yaml -o ./results
//! ```
//!
//! ## Architecture
//!
//! 1. **Collection**: every topic against every enabled source, deduplicated
//! 2. **Scoring**: batched LLM assessment (parallel, `analysis.workers` at a time)
//! 3. **Analysis**: threshold filter, statistics, key points, overall summary
//! 4. **Output**: one JSON file per run; checkpoints cleared on success

use chrono::Local;
use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};
use zhilan::checkpoint::{CheckpointStore, FileCheckpointStore, Stage};
use zhilan::cli::Cli;
use zhilan::collector::Collector;
use zhilan::config::AppConfig;
use zhilan::llm::LlmService;
use zhilan::outputs::json;
use zhilan::pipeline::{Pipeline, RunOutcome};
use zhilan::sources::build_adapters;
use zhilan::utils::ensure_writable_dir;

/// Fold command-line overrides into the loaded config.
fn apply_overrides(config: &mut AppConfig, args: &Cli) {
    if let Some(topics) = &args.topics {
        config.collection.topics = topics.clone();
    }
    if let Some(range) = &args.time_range {
        config.collection.time_range = range.clone();
    }
    if let Some(dir) = &args.output_dir {
        config.output.dir = dir.clone();
    }
    if let Some(key) = &args.llm_api_key {
        config.api.llm.api_key = key.clone();
    }
    if let Some(key) = &args.newsapi_key {
        config.api.newsapi.api_key = key.clone();
    }
    if args.no_checkpoint {
        config.checkpoint.enabled = false;
    }
}

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!(version = env!("CARGO_PKG_VERSION"), "zhilan starting up");

    // Parse CLI
    let args = Cli::parse();
    debug!(config = %args.config, fresh = args.fresh, no_checkpoint = args.no_checkpoint, "Parsed CLI arguments");

    // ---- Load config ----
    let mut config = AppConfig::load(&args.config)?;
    apply_overrides(&mut config, &args);
    config.validate()?;
    let topics = config.topics();
    let window = config.time_window(Local::now().naive_local())?;
    info!(
        topics = ?topics,
        start = %window.start_date(),
        end = %window.end_date(),
        "Resolved collection window"
    );

    // Early check: ensure output dir is writable
    if let Err(e) = ensure_writable_dir(&config.output.dir).await {
        error!(
            path = %config.output.dir,
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    // ---- Checkpoints ----
    let checkpoints: Option<Arc<dyn CheckpointStore>> = if config.checkpoint.enabled {
        let store: Arc<dyn CheckpointStore> = Arc::new(FileCheckpointStore::new(&config.checkpoint.dir));
        if args.fresh {
            store.clear_stage(Stage::DataCollection);
            store.clear_stage(Stage::Analysis);
            info!(dir = %config.checkpoint.dir, "Cleared checkpoints for a fresh run");
        }
        Some(store)
    } else {
        info!("Checkpointing disabled");
        None
    };

    // ---- Build pipeline ----
    let adapters = build_adapters(&config)?;
    if adapters.is_empty() {
        warn!("No source adapters enabled; nothing will be collected");
    }
    let llm = LlmService::from_config(&config.api.llm, &config.retry)?;

    let mut collector = Collector::new(adapters, config.collection.workers);
    if let Some(store) = &checkpoints {
        collector = collector.with_checkpoints(Arc::clone(store));
    }
    let mut pipeline = Pipeline::new(collector, llm, config.analysis.clone());
    if let Some(store) = &checkpoints {
        pipeline = pipeline.with_checkpoints(Arc::clone(store));
    }

    // ---- Run ----
    match pipeline.run(&topics, &window).await {
        RunOutcome::NoItemsCollected => {
            warn!("No data collected; nothing to analyze");
        }
        RunOutcome::NoItemsPassedFilter { scored } => {
            warn!(
                scored = scored.len(),
                min_score = config.analysis.min_score,
                "No items met the score threshold; consider lowering analysis.min_score"
            );
        }
        RunOutcome::Completed(result) => {
            match json::write_analysis(&result, &config.output.dir).await {
                Ok(path) => {
                    info!(path = %path.display(), "Analysis written");
                    pipeline.finish();
                }
                Err(e) => {
                    error!(error = %e, "Failed to write analysis JSON; checkpoints kept for resume");
                    return Err(e.into());
                }
            }
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_replace_config_values() {
        let mut config = AppConfig::from_yaml("collection:\n  topics: [a]\napi: {}\n").unwrap();
        let args = Cli::parse_from([
            "zhilan",
            "--topics",
            "b,c",
            "--time-range",
            "today",
            "-o",
            "/tmp/x",
            "--no-checkpoint",
            "--llm-api-key",
            "sk-test",
        ]);
        apply_overrides(&mut config, &args);
        assert_eq!(config.topics(), vec!["b", "c"]);
        assert_eq!(config.collection.time_range, "today");
        assert_eq!(config.output.dir, "/tmp/x");
        assert_eq!(config.api.llm.api_key, "sk-test");
        assert!(!config.checkpoint.enabled);
    }

    #[test]
    fn test_topics_flag_fills_empty_config_topics() {
        let mut config = AppConfig::parse("collection:\n  topics: []\napi: {}\n").unwrap();
        let args = Cli::parse_from(["zhilan", "--topics", "rust"]);
        apply_overrides(&mut config, &args);
        assert!(config.validate().is_ok());
        assert_eq!(config.topics(), vec!["rust"]);
    }
}
