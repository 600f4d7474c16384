//! Data models shared by every pipeline stage.
//!
//! - [`Item`]: one collected record, normalized across sources
//! - [`Assessment`] / [`ScoreRecord`]: scores attached by the scorer, and the
//!   raw shape the scoring service answers with
//! - [`DateWindow`]: the collection time range
//! - [`Statistics`], [`Relationship`], [`AnalysisResult`]: aggregate output
//!   handed to report and visualization collaborators

use chrono::{DateTime, Local, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Score assigned to every dimension when a batch could not be scored.
pub const DEFAULT_SCORE: f64 = 0.5;

/// Score returned for every dimension when no scoring credential is configured.
pub const PLACEHOLDER_SCORE: f64 = 0.7;

/// Composite weights: relevance, importance, timeliness, reliability.
pub const SCORE_WEIGHTS: [f64; 4] = [0.3, 0.3, 0.2, 0.2];

/// The kind of upstream source an item was collected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    WebSearch,
    News,
    Academic,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::WebSearch => "web_search",
            SourceKind::News => "news",
            SourceKind::Academic => "academic",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One piece of collected information.
///
/// Created by a source adapter, enriched once by the scorer (which fills
/// [`Item::assessment`]), and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub title: String,
    /// Canonical link; may be empty when the source gave none.
    pub url: String,
    pub snippet: String,
    pub source: SourceKind,
    /// Publisher or site name.
    pub source_name: String,
    /// ISO-8601 where the source provides it, otherwise the source's own text.
    pub date_published: String,
    /// Academic records only; at most five names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    /// Academic records only; space-separated category codes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment: Option<Assessment>,
}

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\p{L}\p{N}]+").expect("valid regex"));

impl Item {
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        snippet: impl Into<String>,
        source: SourceKind,
        source_name: impl Into<String>,
        date_published: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            snippet: snippet.into(),
            source,
            source_name: source_name.into(),
            date_published: date_published.into(),
            authors: Vec::new(),
            categories: None,
            assessment: None,
        }
    }

    /// Composite score, or `0.0` for an item that has not been scored.
    pub fn score(&self) -> f64 {
        self.assessment.as_ref().map(|a| a.score).unwrap_or(0.0)
    }

    /// SHA-256 over the normalized `(title, url)` pair, hex encoded.
    ///
    /// Titles are compared case-insensitively with punctuation and whitespace
    /// runs collapsed; URLs ignore case and a trailing slash.
    pub fn fingerprint(&self) -> String {
        let title = NON_WORD
            .replace_all(&self.title.to_lowercase(), " ")
            .trim()
            .to_string();
        let url = self.url.trim().to_lowercase();
        let url = url.trim_end_matches('/');

        let mut hasher = Sha256::new();
        hasher.update(title.as_bytes());
        hasher.update([0x1f]);
        hasher.update(url.as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

/// Scores attached to an item by the scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub relevance: f64,
    pub importance: f64,
    pub timeliness: f64,
    pub reliability: f64,
    /// Weighted composite, see [`Assessment::composite`].
    pub score: f64,
    pub brief_analysis: String,
}

impl Assessment {
    /// `0.3·relevance + 0.3·importance + 0.2·timeliness + 0.2·reliability`
    pub fn composite(relevance: f64, importance: f64, timeliness: f64, reliability: f64) -> f64 {
        let [wr, wi, wt, wl] = SCORE_WEIGHTS;
        wr * relevance + wi * importance + wt * timeliness + wl * reliability
    }

    /// Assessment used when a batch fails or the service returned too few entries.
    pub fn fallback() -> Self {
        Self {
            relevance: DEFAULT_SCORE,
            importance: DEFAULT_SCORE,
            timeliness: DEFAULT_SCORE,
            reliability: DEFAULT_SCORE,
            score: DEFAULT_SCORE,
            brief_analysis: "default score: scoring service unavailable".to_string(),
        }
    }
}

/// One entry of the scoring service's reply, before validation.
///
/// Every field is optional because the reply comes from a language model.
/// Records are matched to items by position, so any `index` the model echoes
/// is ignored. Numbers given as strings are accepted; any other value for a
/// numeric field reads as missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    #[serde(default, deserialize_with = "lenient_number")]
    pub relevance: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub importance: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub timeliness: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub reliability: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub score: Option<f64>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub brief_analysis: Option<String>,
}

fn lenient_number<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_text<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}

impl ScoreRecord {
    /// The fixed record returned without a network call when the scoring
    /// credential is missing.
    pub fn placeholder() -> Self {
        Self {
            relevance: Some(PLACEHOLDER_SCORE),
            importance: Some(PLACEHOLDER_SCORE),
            timeliness: Some(PLACEHOLDER_SCORE),
            reliability: Some(PLACEHOLDER_SCORE),
            score: Some(PLACEHOLDER_SCORE),
            brief_analysis: Some("placeholder score: scoring service not configured".to_string()),
        }
    }
}

impl From<ScoreRecord> for Assessment {
    /// The service's composite is trusted as-is; it is only computed locally
    /// when the reply left it out.
    fn from(r: ScoreRecord) -> Self {
        let unit = |v: Option<f64>| v.filter(|x| x.is_finite()).unwrap_or(DEFAULT_SCORE).clamp(0.0, 1.0);
        let relevance = unit(r.relevance);
        let importance = unit(r.importance);
        let timeliness = unit(r.timeliness);
        let reliability = unit(r.reliability);
        let score = match r.score.filter(|x| x.is_finite()) {
            Some(s) => s.clamp(0.0, 1.0),
            None => Assessment::composite(relevance, importance, timeliness, reliability),
        };
        Self {
            relevance,
            importance,
            timeliness,
            reliability,
            score,
            brief_analysis: r.brief_analysis.unwrap_or_default(),
        }
    }
}

/// The resolved collection time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl DateWindow {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    /// Whole days between start and end (truncated, never negative).
    pub fn span_days(&self) -> i64 {
        (self.end - self.start).num_days().max(0)
    }

    pub fn start_date(&self) -> String {
        self.start.format("%Y-%m-%d").to_string()
    }

    pub fn end_date(&self) -> String {
        self.end.format("%Y-%m-%d").to_string()
    }
}

/// A link between two filtered items. Produced by
/// [`crate::analysis::identify_relationships`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Index into `filtered_items`.
    pub from: usize,
    /// Index into `filtered_items`.
    pub to: usize,
    pub kind: String,
    pub weight: f64,
}

/// Derived distributions over the filtered items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_count: usize,
    pub source_distribution: BTreeMap<String, usize>,
    /// Keyed by `YYYY-MM-DD`.
    pub date_distribution: BTreeMap<String, usize>,
    /// Keyed by bucket label (`0.6-0.7` … `0.9-1.0`).
    pub score_distribution: BTreeMap<String, usize>,
    pub average_score: f64,
}

/// Aggregate output of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Every scored item, in collection order.
    pub scored_items: Vec<Item>,
    /// `scored_items` with `score >= min_score`, same order.
    pub filtered_items: Vec<Item>,
    pub key_points: Vec<String>,
    pub relationships: Vec<Relationship>,
    pub statistics: Statistics,
    pub overall_analysis: String,
    pub analysis_time: DateTime<Local>,
}
