//! Bing web search scraper.
//!
//! Results are read from the regular HTML results page, ten per page, until
//! `max_results` is reached or a page comes back short. Recency is pushed to
//! the search engine through its `filters` parameter, chosen from the span of
//! the collection window.
//!
//! # Result block
//!
//! ```text
//! li.b_algo
//!   h2 a[href]        title + link (record skipped when either is missing)
//!   p | div.b_caption snippet
//!   span.news_dt      publication date (defaults to now)
//!   cite              display URL, its host becomes the source name
//! ```

use super::SourceAdapter;
use crate::config::WebSearchConfig;
use crate::error::Result;
use crate::http::Transport;
use crate::models::{DateWindow, Item, SourceKind};
use crate::utils::collapse_whitespace;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument};
use url::Url;

/// Results per page served by the search engine.
pub const PAGE_SIZE: usize = 10;

static RESULT_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("li.b_algo").expect("valid selector"));
static LINK_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("h2 a").expect("valid selector"));
static PARA_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("p").expect("valid selector"));
static CAPTION_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.b_caption").expect("valid selector"));
static DATE_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("span.news_dt").expect("valid selector"));
static CITE_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("cite").expect("valid selector"));

pub struct WebSearchAdapter {
    transport: Arc<dyn Transport>,
    endpoint: String,
    market: String,
    max_results: usize,
    page_delay: Duration,
}

impl WebSearchAdapter {
    pub fn new(transport: Arc<dyn Transport>, config: &WebSearchConfig) -> Self {
        Self {
            transport,
            endpoint: config.endpoint.clone(),
            market: config.market.clone(),
            max_results: config.max_results,
            page_delay: Duration::from_millis(config.page_delay_ms),
        }
    }

    async fn try_fetch(&self, query: &str, window: &DateWindow) -> Result<Vec<Item>> {
        let filter = recency_filter(window);
        let mut items: Vec<Item> = Vec::new();
        let mut offset = 0usize;

        // Bounded by offset too: pages of skipped blocks add no items.
        while offset < self.max_results && items.len() < self.max_results {
            if offset > 0 && !self.page_delay.is_zero() {
                tokio::time::sleep(self.page_delay).await;
            }

            let params = [
                ("q", query.to_string()),
                ("first", (offset + 1).to_string()),
                ("FORM", "PERE".to_string()),
                ("setlang", self.market.clone()),
                ("filters", filter.clone()),
            ];
            let body = self.transport.get(&self.endpoint, &params).await?;
            let page = parse_results(&body);
            debug!(offset, parsed = page.blocks, kept = page.items.len(), "Parsed results page");

            if page.blocks == 0 {
                break;
            }
            let remaining = self.max_results - items.len();
            items.extend(page.items.into_iter().take(remaining));
            if page.blocks < PAGE_SIZE {
                break;
            }
            offset += PAGE_SIZE;
        }

        Ok(items)
    }
}

#[async_trait]
impl SourceAdapter for WebSearchAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::WebSearch
    }

    #[instrument(level = "info", skip_all, fields(%query))]
    async fn fetch(&self, query: &str, window: &DateWindow) -> Vec<Item> {
        match self.try_fetch(query, window).await {
            Ok(items) => {
                info!(count = items.len(), "Collected web search results");
                items
            }
            Err(e) => {
                error!(error = %e, "Web search failed");
                Vec::new()
            }
        }
    }
}

/// The `filters` value for a window: day, week or month presets, otherwise an
/// explicit range in days since the Unix epoch.
pub fn recency_filter(window: &DateWindow) -> String {
    let code = match window.span_days() {
        0..=1 => "ez1".to_string(),
        2..=7 => "ez2".to_string(),
        8..=31 => "ez3".to_string(),
        _ => format!(
            "ez5_{}_{}",
            days_since_epoch(window.start.date()),
            days_since_epoch(window.end.date())
        ),
    };
    format!("ex1:\"{code}\"")
}

fn days_since_epoch(day: NaiveDate) -> i64 {
    (day - NaiveDate::default()).num_days()
}

pub(crate) struct ResultsPage {
    /// Result blocks seen, including skipped ones; drives pagination.
    pub blocks: usize,
    pub items: Vec<Item>,
}

/// Parse one results page. Kept synchronous so the DOM never lives across an await.
pub(crate) fn parse_results(html: &str) -> ResultsPage {
    let document = Html::parse_document(html);
    let mut blocks = 0usize;
    let mut items = Vec::new();

    for block in document.select(&RESULT_SEL) {
        blocks += 1;
        if let Some(item) = parse_block(block) {
            items.push(item);
        }
    }

    ResultsPage { blocks, items }
}

fn parse_block(block: ElementRef<'_>) -> Option<Item> {
    let link = block.select(&LINK_SEL).next()?;
    let title = collapse_whitespace(&link.text().collect::<String>());
    let href = link.value().attr("href").unwrap_or_default().trim();
    if title.is_empty() || href.is_empty() {
        return None;
    }

    let snippet = block
        .select(&PARA_SEL)
        .next()
        .or_else(|| block.select(&CAPTION_SEL).next())
        .map(|e| collapse_whitespace(&e.text().collect::<String>()))
        .unwrap_or_default();

    let date = block
        .select(&DATE_SEL)
        .next()
        .map(|e| collapse_whitespace(&e.text().collect::<String>()))
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| Utc::now().to_rfc3339());

    let source_name = block
        .select(&CITE_SEL)
        .next()
        .and_then(|c| host_of(&c.text().collect::<String>()))
        .or_else(|| host_of(href))
        .unwrap_or_else(|| "Unknown".to_string());

    Some(Item::new(title, href, snippet, SourceKind::WebSearch, source_name, date))
}

/// Host part of a URL or a display URL such as `example.com › path`.
fn host_of(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('/') {
        return None;
    }
    let candidate = raw.split_whitespace().next().unwrap_or(raw);
    let with_scheme = if candidate.contains("://") {
        candidate.to_string()
    } else {
        format!("https://{candidate}")
    };
    Url::parse(&with_scheme)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .filter(|h| h.contains('.'))
}
