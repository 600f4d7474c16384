//! Post-scoring analysis: threshold filter, statistics, key points and
//! relationships.

use crate::llm::{AskAsync, LlmService};
use crate::models::{Item, Relationship, Statistics};
use crate::utils::{clip, parse_publish_date};
use itertools::Itertools;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

/// Score buckets reported in [`Statistics::score_distribution`], as
/// `(label, lower bound)`. The last bucket is closed at 1.0.
pub const SCORE_BUCKETS: [(&str, f64); 4] = [
    ("0.6-0.7", 0.6),
    ("0.7-0.8", 0.7),
    ("0.8-0.9", 0.8),
    ("0.9-1.0", 0.9),
];

/// Items quoted in the key-points request.
pub const KEY_POINT_ITEMS: usize = 20;

/// Keep items scoring at least `min_score`, preserving order.
pub fn filter_by_score(items: &[Item], min_score: f64) -> Vec<Item> {
    items
        .iter()
        .filter(|i| i.score() >= min_score)
        .cloned()
        .collect()
}

fn bucket_for(score: f64) -> Option<&'static str> {
    SCORE_BUCKETS
        .iter()
        .rev()
        .find(|(_, lower)| score >= *lower)
        .map(|(label, _)| *label)
}

/// Distributions and mean over `items`.
pub fn compute_statistics(items: &[Item]) -> Statistics {
    let mut source_distribution = BTreeMap::new();
    let mut date_distribution = BTreeMap::new();
    let mut score_distribution: BTreeMap<String, usize> = SCORE_BUCKETS
        .iter()
        .map(|(label, _)| (label.to_string(), 0))
        .collect();

    for item in items {
        *source_distribution
            .entry(item.source.as_str().to_string())
            .or_insert(0) += 1;
        if let Some(day) = parse_publish_date(&item.date_published) {
            *date_distribution
                .entry(day.format("%Y-%m-%d").to_string())
                .or_insert(0) += 1;
        }
        if let Some(label) = bucket_for(item.score()) {
            *score_distribution.entry(label.to_string()).or_insert(0) += 1;
        }
    }

    let average_score = if items.is_empty() {
        0.0
    } else {
        items.iter().map(Item::score).sum::<f64>() / items.len() as f64
    };

    Statistics {
        total_count: items.len(),
        source_distribution,
        date_distribution,
        score_distribution,
        average_score,
    }
}

/// Highest-scored first; ties keep their original order.
pub fn top_by_score(items: &[Item], n: usize) -> Vec<&Item> {
    items
        .iter()
        .sorted_by(|a, b| b.score().total_cmp(&a.score()))
        .take(n)
        .collect()
}

/// Chars of each item's snippet quoted in the key-points request.
const KEY_POINT_SNIPPET_CHARS: usize = 300;

fn key_points_prompt(items: &[&Item]) -> String {
    let listing = items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            format!(
                "{}. {} [{}, score {:.2}]\n   {}",
                i + 1,
                item.title,
                item.source_name,
                item.score(),
                clip(&item.snippet, KEY_POINT_SNIPPET_CHARS)
            )
        })
        .join("\n");
    format!(
        "Based on the following highest-rated items, list the 5 to 10 most important \
         key points. Write each key point on its own line starting with \"- \".\n\n{listing}"
    )
}

/// Lines starting with `-` or `*`, marker stripped.
pub fn parse_bullets(answer: &str) -> Vec<String> {
    answer
        .lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix('-').or_else(|| line.strip_prefix('*')))
        .map(|rest| rest.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Ask the LLM for key points over the top items. Empty when the service is
/// unconfigured or the call fails.
#[instrument(level = "info", skip_all, fields(items = items.len()))]
pub async fn extract_key_points<A>(llm: &LlmService<A>, items: &[Item]) -> Vec<String>
where
    A: AskAsync<Response = String>,
{
    if items.is_empty() {
        return Vec::new();
    }
    let top = top_by_score(items, KEY_POINT_ITEMS);
    match llm.complete(&key_points_prompt(&top)).await {
        Ok(Some(answer)) => {
            let points = parse_bullets(&answer);
            info!(count = points.len(), "Extracted key points");
            points
        }
        Ok(None) => {
            debug!("LLM not configured; skipping key points");
            Vec::new()
        }
        Err(e) => {
            warn!(error = %e, "Key point extraction failed");
            Vec::new()
        }
    }
}

/// Links between filtered items.
///
/// Not implemented yet; always empty.
pub fn identify_relationships(items: &[Item]) -> Vec<Relationship> {
    debug!(items = items.len(), "Relationship identification not implemented; returning none");
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::models::{Assessment, SourceKind};

    fn scored(title: &str, kind: SourceKind, date: &str, score: f64) -> Item {
        let mut item = Item::new(title, format!("https://e.com/{title}"), "", kind, "E", date);
        item.assessment = Some(Assessment {
            relevance: score,
            importance: score,
            timeliness: score,
            reliability: score,
            score,
            brief_analysis: format!("about {title}"),
        });
        item
    }

    struct Answer(&'static str);

    impl AskAsync for Answer {
        type Response = String;

        async fn ask(&self, _text: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct Broken;

    impl AskAsync for Broken {
        type Response = String;

        async fn ask(&self, _text: &str) -> Result<String> {
            Err(Error::Malformed("nope".into()))
        }
    }

    #[test]
    fn test_filter_is_order_preserving_subsequence() {
        let items = vec![
            scored("a", SourceKind::News, "", 0.9),
            scored("b", SourceKind::News, "", 0.59),
            scored("c", SourceKind::News, "", 0.6),
            scored("d", SourceKind::News, "", 0.1),
        ];
        let kept = filter_by_score(&items, 0.6);
        let titles: Vec<_> = kept.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["a", "c"]);
        assert!(kept.iter().all(|i| i.score() >= 0.6));
    }

    #[test]
    fn test_statistics_buckets_and_mean() {
        let items = vec![
            scored("a", SourceKind::News, "2025-06-10T08:00:00Z", 0.75),
            scored("b", SourceKind::WebSearch, "2025-06-10", 0.9),
            scored("c", SourceKind::Academic, "yesterday", 0.6),
        ];
        let stats = compute_statistics(&items);
        assert_eq!(stats.total_count, 3);
        assert_eq!(stats.score_distribution["0.6-0.7"], 1);
        assert_eq!(stats.score_distribution["0.7-0.8"], 1);
        assert_eq!(stats.score_distribution["0.8-0.9"], 0);
        assert_eq!(stats.score_distribution["0.9-1.0"], 1);
        assert_eq!(stats.source_distribution["news"], 1);
        assert_eq!(stats.source_distribution["academic"], 1);
        assert_eq!(stats.date_distribution.len(), 1);
        assert_eq!(stats.date_distribution["2025-06-10"], 2);
        assert!((stats.average_score - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_statistics_on_empty_input() {
        let stats = compute_statistics(&[]);
        assert_eq!(stats.total_count, 0);
        assert_eq!(stats.average_score, 0.0);
        assert_eq!(stats.score_distribution.len(), 4);
        assert!(stats.score_distribution.values().all(|&n| n == 0));
    }

    #[test]
    fn test_perfect_score_lands_in_top_bucket() {
        assert_eq!(bucket_for(1.0), Some("0.9-1.0"));
        assert_eq!(bucket_for(0.8), Some("0.8-0.9"));
        assert_eq!(bucket_for(0.3), None);
    }

    #[test]
    fn test_top_by_score_is_stable() {
        let items = vec![
            scored("a", SourceKind::News, "", 0.7),
            scored("b", SourceKind::News, "", 0.9),
            scored("c", SourceKind::News, "", 0.7),
        ];
        let titles: Vec<_> = top_by_score(&items, 3).iter().map(|i| i.title.clone()).collect();
        assert_eq!(titles, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_key_points_prompt_quotes_snippets() {
        let mut item = scored("Launch", SourceKind::News, "2025-06-10", 0.8);
        item.snippet = format!("{}{}", "a".repeat(KEY_POINT_SNIPPET_CHARS), "TAIL");
        let prompt = key_points_prompt(&[&item]);
        assert!(prompt.contains("1. Launch [E, score 0.80]"));
        assert!(prompt.contains(&"a".repeat(KEY_POINT_SNIPPET_CHARS)));
        assert!(!prompt.contains("TAIL"));
        assert!(!prompt.contains("about Launch"));
    }

    #[test]
    fn test_parse_bullets() {
        let answer = "Key points:\n- First point\n  * Second point \n-\nplain line\n- Third";
        assert_eq!(parse_bullets(answer), vec!["First point", "Second point", "Third"]);
    }

    #[tokio::test]
    async fn test_key_points_from_service() {
        let llm = LlmService::new(Answer("- one\n- two"), true);
        let items = vec![scored("a", SourceKind::News, "", 0.8)];
        assert_eq!(extract_key_points(&llm, &items).await, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_key_points_degrade_to_empty() {
        let items = vec![scored("a", SourceKind::News, "", 0.8)];
        let unconfigured = LlmService::new(Answer("- one"), false);
        assert!(extract_key_points(&unconfigured, &items).await.is_empty());
        let broken = LlmService::new(Broken, true);
        assert!(extract_key_points(&broken, &items).await.is_empty());
    }

    #[test]
    fn test_relationships_placeholder() {
        let items = vec![scored("a", SourceKind::News, "", 0.8)];
        assert!(identify_relationships(&items).is_empty());
    }
}
