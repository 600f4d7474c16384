//! NewsAPI `everything` adapter.
//!
//! One request per query. The payload is deserialized into lenient structs
//! because NewsAPI leaves most article fields nullable.

use super::SourceAdapter;
use crate::config::NewsApiConfig;
use crate::error::{Error, Result};
use crate::http::Transport;
use crate::models::{DateWindow, Item, SourceKind};
use crate::utils::is_placeholder_key;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// NewsAPI rejects page sizes above this.
pub const MAX_PAGE_SIZE: usize = 50;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewsResponse {
    status: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    articles: Vec<Article>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Article {
    #[serde(default)]
    source: Option<ArticleSource>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    published_at: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArticleSource {
    #[serde(default)]
    name: Option<String>,
}

pub struct NewsAdapter {
    transport: Arc<dyn Transport>,
    endpoint: String,
    api_key: String,
    language: String,
    page_size: usize,
}

impl NewsAdapter {
    pub fn new(transport: Arc<dyn Transport>, config: &NewsApiConfig) -> Self {
        Self {
            transport,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            language: config.language.clone(),
            page_size: config.page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    async fn try_fetch(&self, query: &str, window: &DateWindow) -> Result<Vec<Item>> {
        let params = [
            ("q", query.to_string()),
            ("apiKey", self.api_key.clone()),
            ("from", window.start_date()),
            ("to", window.end_date()),
            ("language", self.language.clone()),
            ("sortBy", "relevancy".to_string()),
            ("pageSize", self.page_size.to_string()),
        ];
        let body = self.transport.get(&self.endpoint, &params).await?;
        parse_articles(&body)
    }
}

#[async_trait]
impl SourceAdapter for NewsAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::News
    }

    #[instrument(level = "info", skip_all, fields(%query))]
    async fn fetch(&self, query: &str, window: &DateWindow) -> Vec<Item> {
        if is_placeholder_key(&self.api_key) {
            warn!("NewsAPI key not configured; skipping");
            return Vec::new();
        }
        match self.try_fetch(query, window).await {
            Ok(items) => {
                info!(count = items.len(), "Collected news articles");
                items
            }
            Err(e) => {
                error!(error = %e, "News fetch failed");
                Vec::new()
            }
        }
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

pub(crate) fn parse_articles(body: &str) -> Result<Vec<Item>> {
    let resp: NewsResponse = serde_json::from_str(body)?;
    if resp.status == "error" {
        return Err(Error::Api {
            status: 200,
            message: format!(
                "{}: {}",
                resp.code.unwrap_or_default(),
                resp.message.unwrap_or_default()
            ),
        });
    }

    let items = resp
        .articles
        .into_iter()
        .map(|a| {
            let snippet = non_empty(a.description)
                .or_else(|| non_empty(a.content))
                .unwrap_or_default();
            let published = non_empty(a.published_at).unwrap_or_else(|| Utc::now().to_rfc3339());
            let source_name = a
                .source
                .and_then(|s| non_empty(s.name))
                .unwrap_or_else(|| "Unknown".to_string());
            Item::new(
                a.title.unwrap_or_default().trim(),
                a.url.unwrap_or_default(),
                snippet,
                SourceKind::News,
                source_name,
                published,
            )
        })
        .collect();
    Ok(items)
}
