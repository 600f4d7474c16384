//! YAML configuration for a pipeline run.
//!
//! The configuration is loaded once in `main`, validated, and then handed by
//! reference to each component constructor. `collection` and `api` are
//! required sections; every other section falls back to defaults.

use crate::error::ConfigError;
use crate::models::DateWindow;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration as StdDuration;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub project: ProjectConfig,
    pub collection: CollectionConfig,
    pub api: ApiConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub name: String,
    pub version: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: "zhilan".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub topics: Vec<String>,
    /// `today`, `last_3_days`, `last_week`, `last_month`, `last_<N>_days` or `custom`.
    #[serde(default = "default_time_range")]
    pub time_range: String,
    #[serde(default)]
    pub custom_start_date: Option<String>,
    #[serde(default)]
    pub custom_end_date: Option<String>,
    /// Concurrent adapter invocations.
    #[serde(default = "default_collector_workers")]
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub web_search: WebSearchConfig,
    #[serde(default)]
    pub newsapi: NewsApiConfig,
    #[serde(default)]
    pub arxiv: ArxivConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSearchConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub max_results: usize,
    /// Passed as `setlang`.
    pub market: String,
    pub page_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://www.bing.com/search".to_string(),
            max_results: 50,
            market: "en-US".to_string(),
            page_delay_ms: 1000,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NewsApiConfig {
    pub enabled: bool,
    pub api_key: String,
    pub endpoint: String,
    pub language: String,
    pub page_size: usize,
    pub timeout_secs: u64,
}

impl Default for NewsApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: "YOUR_NEWSAPI_KEY".to_string(),
            endpoint: "https://newsapi.org/v2/everything".to_string(),
            language: "en".to_string(),
            page_size: 50,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArxivConfig {
    pub enabled: bool,
    pub endpoint: String,
    /// Preferred metadata schema; `oai_dc` is the fallback.
    pub metadata_format: String,
    pub default_sets: Vec<String>,
    /// Per-set cap on accepted records.
    pub max_records: usize,
    pub page_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for ArxivConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://oaipmh.arxiv.org/oai".to_string(),
            metadata_format: "arXiv".to_string(),
            default_sets: vec!["cs".to_string()],
            max_records: 100,
            page_delay_ms: 1000,
            timeout_secs: 60,
        }
    }
}

/// Wire format spoken by the LLM endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// OpenAI-compatible chat completions.
    OpenAi,
    /// DashScope text-generation API (`input` / `parameters` / `output`).
    DashScope,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: String,
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::OpenAi,
            api_key: "YOUR_LLM_API_KEY".to_string(),
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 2000,
            temperature: 0.7,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub min_score: f64,
    pub batch_size: usize,
    /// Concurrent scoring batches.
    pub workers: usize,
    /// Items quoted in the synthesis request.
    pub top_n: usize,
    pub key_points: bool,
    pub overall_analysis: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_score: 0.6,
            batch_size: 10,
            workers: 5,
            top_n: 15,
            key_points: true,
            overall_analysis: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub enabled: bool,
    pub dir: String,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: "checkpoints".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: "results".to_string(),
        }
    }
}

fn default_time_range() -> String {
    "last_week".to_string()
}

fn default_collector_workers() -> usize {
    3
}

/// The date-range selector from `collection.time_range`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeRange {
    /// From local midnight to now.
    Today,
    LastDays(u32),
    Custom,
}

impl FromStr for TimeRange {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "today" => Ok(TimeRange::Today),
            "last_3_days" => Ok(TimeRange::LastDays(3)),
            "last_week" => Ok(TimeRange::LastDays(7)),
            "last_month" => Ok(TimeRange::LastDays(30)),
            "custom" => Ok(TimeRange::Custom),
            other => other
                .strip_prefix("last_")
                .and_then(|rest| rest.strip_suffix("_days"))
                .and_then(|n| n.parse::<u32>().ok())
                .filter(|n| *n > 0)
                .map(TimeRange::LastDays)
                .ok_or_else(|| ConfigError::UnknownTimeRange(other.to_string())),
        }
    }
}

fn parse_day(value: &str) -> Result<NaiveDate, ConfigError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| ConfigError::InvalidDate {
        value: value.to_string(),
    })
}

impl AppConfig {
    /// Read and parse a YAML config file.
    ///
    /// Validation is left to the caller so command-line overrides can fill
    /// in values first; call [`AppConfig::validate`] before using the config.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::parse(&raw)?;
        info!(
            topics = config.collection.topics.len(),
            time_range = %config.collection.time_range,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse without validating.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(raw)?;
        debug!(
            web_search = config.api.web_search.enabled,
            newsapi = config.api.newsapi.enabled,
            arxiv = config.api.arxiv.enabled,
            "Parsed configuration"
        );
        Ok(config)
    }

    /// Parse and validate.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config = Self::parse(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collection.topics.iter().all(|t| t.trim().is_empty()) {
            return Err(ConfigError::NoTopics);
        }
        self.collection.time_range.parse::<TimeRange>()?;
        let positive = [
            ("collection.workers", self.collection.workers),
            ("analysis.batch_size", self.analysis.batch_size),
            ("analysis.workers", self.analysis.workers),
            ("retry.max_attempts", self.retry.max_attempts),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        if !(0.0..=1.0).contains(&self.analysis.min_score) {
            return Err(ConfigError::Invalid {
                key: "analysis.min_score",
                reason: format!("{} is outside [0, 1]", self.analysis.min_score),
            });
        }
        Ok(())
    }

    /// Non-empty, trimmed topics.
    pub fn topics(&self) -> Vec<String> {
        self.collection
            .topics
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    }

    /// Resolve `collection.time_range` against `now`.
    pub fn time_window(&self, now: NaiveDateTime) -> Result<DateWindow, ConfigError> {
        let mode: TimeRange = self.collection.time_range.parse()?;
        let window = match mode {
            TimeRange::Today => DateWindow::new(now.date().and_time(NaiveTime::MIN), now),
            TimeRange::LastDays(n) => DateWindow::new(now - Duration::days(i64::from(n)), now),
            TimeRange::Custom => {
                let start = self
                    .collection
                    .custom_start_date
                    .as_deref()
                    .ok_or(ConfigError::MissingCustomDate("custom_start_date"))?;
                let end = self
                    .collection
                    .custom_end_date
                    .as_deref()
                    .ok_or(ConfigError::MissingCustomDate("custom_end_date"))?;
                let start = parse_day(start)?;
                let end = parse_day(end)?;
                if start > end {
                    return Err(ConfigError::InvertedRange {
                        start: start.to_string(),
                        end: end.to_string(),
                    });
                }
                DateWindow::new(start.and_time(NaiveTime::MIN), end.and_time(NaiveTime::MIN))
            }
        };
        Ok(window)
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> StdDuration {
        StdDuration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> StdDuration {
        StdDuration::from_millis(self.max_delay_ms)
    }
}
