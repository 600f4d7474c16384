//! Source adapters: one per upstream kind.
//!
//! Each adapter turns `(query, window)` into normalized [`Item`]s. Adapters
//! never fail past their boundary: network, HTTP or parse failures are
//! logged and produce an empty result so one flaky source cannot sink a run.
//!
//! | Source | Module | Method |
//! |--------|--------|--------|
//! | Bing | [`web_search`] | HTML scraping, paged |
//! | NewsAPI | [`news`] | JSON `everything` endpoint |
//! | arXiv | [`academic`] | OAI-PMH `ListRecords` harvesting |

pub mod academic;
pub mod news;
pub mod web_search;

use crate::config::AppConfig;
use crate::error::Result;
use crate::http::ReqwestTransport;
use crate::models::{DateWindow, Item, SourceKind};
use crate::retry::RetryPolicy;
use crate::utils::is_placeholder_key;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub use academic::AcademicAdapter;
pub use news::NewsAdapter;
pub use web_search::WebSearchAdapter;

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Fetch items matching `query` inside `window`. Empty on any failure.
    async fn fetch(&self, query: &str, window: &DateWindow) -> Vec<Item>;
}

/// Build every adapter enabled in `config`, each with its own transport.
///
/// NewsAPI is skipped with a warning when its key is still a placeholder.
pub fn build_adapters(config: &AppConfig) -> Result<Vec<Arc<dyn SourceAdapter>>> {
    let policy = RetryPolicy::from_config(&config.retry);
    let api = &config.api;
    let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();

    if api.web_search.enabled {
        let transport = ReqwestTransport::new(
            Duration::from_secs(api.web_search.timeout_secs),
            policy.clone(),
        )?;
        adapters.push(Arc::new(WebSearchAdapter::new(
            Arc::new(transport),
            &api.web_search,
        )));
    }

    if api.newsapi.enabled {
        if is_placeholder_key(&api.newsapi.api_key) {
            warn!("NewsAPI enabled without a usable key; skipping news source");
        } else {
            let transport = ReqwestTransport::new(
                Duration::from_secs(api.newsapi.timeout_secs),
                policy.clone(),
            )?;
            adapters.push(Arc::new(NewsAdapter::new(Arc::new(transport), &api.newsapi)));
        }
    }

    if api.arxiv.enabled {
        let transport =
            ReqwestTransport::new(Duration::from_secs(api.arxiv.timeout_secs), policy)?;
        adapters.push(Arc::new(AcademicAdapter::new(Arc::new(transport), &api.arxiv)));
    }

    info!(
        count = adapters.len(),
        kinds = ?adapters.iter().map(|a| a.kind()).collect::<Vec<_>>(),
        "Built source adapters"
    );
    Ok(adapters)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_adapters_respects_flags_and_keys() {
        let yaml = r#"
collection:
  topics: [rust]
api:
  web_search: { enabled: true }
  newsapi: { enabled: true, api_key: "YOUR_NEWSAPI_KEY" }
  arxiv: { enabled: false }
"#;
        let cfg = AppConfig::from_yaml(yaml).unwrap();
        let adapters = build_adapters(&cfg).unwrap();
        let kinds: Vec<_> = adapters.iter().map(|a| a.kind()).collect();
        assert_eq!(kinds, vec![SourceKind::WebSearch]);
    }

    #[test]
    fn test_build_adapters_includes_keyed_news() {
        let yaml = r#"
collection:
  topics: [rust]
api:
  web_search: { enabled: false }
  newsapi: { enabled: true, api_key: "abc123" }
  arxiv: { enabled: true }
"#;
        let cfg = AppConfig::from_yaml(yaml).unwrap();
        let kinds: Vec<_> = build_adapters(&cfg)
            .unwrap()
            .iter()
            .map(|a| a.kind())
            .collect();
        assert_eq!(kinds, vec![SourceKind::News, SourceKind::Academic]);
    }
}
