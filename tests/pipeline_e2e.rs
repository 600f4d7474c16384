//! End-to-end run over scripted sources and a scripted model.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use zhilan::Result;
use zhilan::checkpoint::{CheckpointStore, FileCheckpointStore, Stage};
use zhilan::collector::Collector;
use zhilan::config::AnalysisConfig;
use zhilan::llm::{AskAsync, LlmService};
use zhilan::models::{DateWindow, Item, SourceKind};
use zhilan::outputs::json::write_analysis;
use zhilan::pipeline::{Pipeline, RunOutcome};
use zhilan::sources::SourceAdapter;

struct Scripted {
    kind: SourceKind,
    count: usize,
}

#[async_trait]
impl SourceAdapter for Scripted {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn fetch(&self, query: &str, _window: &DateWindow) -> Vec<Item> {
        (0..self.count)
            .map(|i| {
                Item::new(
                    format!("{query} {} #{i}", self.kind),
                    format!("https://{}.example.org/{query}/{i}", self.kind),
                    "snippet",
                    self.kind,
                    "Example",
                    "2025-06-12",
                )
            })
            .collect()
    }
}

/// Answers scoring prompts with one `0.65` record per listed item.
struct Steady {
    calls: Arc<AtomicUsize>,
}

impl AskAsync for Steady {
    type Response = String;

    async fn ask(&self, text: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(listing) = text.split("Items:\n").nth(1) {
            let n = serde_json::from_str::<Vec<serde_json::Value>>(listing)
                .map(|v| v.len())
                .unwrap_or(0);
            let records = vec![r#"{"score": 0.65, "brief_analysis": "ok"}"#; n].join(",");
            return Ok(format!("```json\n[{records}]\n```"));
        }
        if text.contains("key points") {
            return Ok("- first\n- second".to_string());
        }
        Ok("Steady week.".to_string())
    }
}

fn window() -> DateWindow {
    let end = NaiveDate::from_ymd_opt(2025, 6, 15)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap();
    DateWindow::new(end - chrono::Duration::days(7), end)
}

#[tokio::test]
async fn test_full_run_writes_analysis_and_clears_checkpoints() {
    let root = std::env::temp_dir().join(format!("zhilan-e2e-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&root);
    let store: Arc<dyn CheckpointStore> = Arc::new(FileCheckpointStore::new(root.join("checkpoints")));

    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
        Arc::new(Scripted { kind: SourceKind::WebSearch, count: 13 }),
        Arc::new(Scripted { kind: SourceKind::Academic, count: 10 }),
    ];
    let calls = Arc::new(AtomicUsize::new(0));
    let analysis = AnalysisConfig {
        min_score: 0.6,
        ..AnalysisConfig::default()
    };
    let pipeline = Pipeline::new(
        Collector::new(adapters, 3).with_checkpoints(store.clone()),
        LlmService::new(Steady { calls: calls.clone() }, true),
        analysis,
    )
    .with_checkpoints(store.clone());

    let RunOutcome::Completed(result) = pipeline.run(&["rust".to_string()], &window()).await else {
        panic!("expected a completed run");
    };

    assert_eq!(result.scored_items.len(), 23);
    assert_eq!(result.filtered_items.len(), 23);
    assert_eq!(result.statistics.total_count, 23);
    assert!((result.statistics.average_score - 0.65).abs() < 1e-9);
    assert_eq!(result.statistics.score_distribution["0.6-0.7"], 23);
    assert_eq!(result.statistics.source_distribution.values().sum::<usize>(), 23);
    assert_eq!(result.key_points, vec!["first", "second"]);
    assert_eq!(result.overall_analysis, "Steady week.");
    // three scoring batches of 10, one key-point call, one synthesis call
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert!(store.load(Stage::Analysis.as_str()).is_some());

    let out_dir = root.join("out").to_string_lossy().to_string();
    let path = write_analysis(&result, &out_dir).await.unwrap();
    assert!(path.exists());

    pipeline.finish();
    assert!(store.load(Stage::DataCollection.as_str()).is_none());
    assert!(store.load(Stage::Analysis.as_str()).is_none());

    let _ = std::fs::remove_dir_all(&root);
}
