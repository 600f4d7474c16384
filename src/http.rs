//! HTTP GET seam used by every source adapter.
//!
//! Adapters only ever need "GET this URL with these query parameters and
//! give me the body". Keeping that behind [`Transport`] lets tests replay
//! canned pages and count requests without touching the network.

use crate::error::{Error, Result};
use crate::retry::{RetryPolicy, retry};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use std::time::Duration;
use tracing::{debug, instrument};

/// Browser-like user agent; the web-search endpoint serves a stripped page otherwise.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch `url` with `query` appended and return the body as text.
    /// Non-success statuses are errors.
    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<String>;
}

/// [`Transport`] backed by a shared `reqwest::Client`, retried per [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl ReqwestTransport {
    /// Build a client whose requests time out after `request_timeout`.
    pub fn new(request_timeout: Duration, policy: RetryPolicy) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,application/json;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9,zh-CN;q=0.8"));

        let client = reqwest::Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(10))
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client, policy })
    }

    async fn get_once(&self, url: &str, query: &[(&str, String)]) -> Result<String> {
        let resp = self.client.get(url).query(query).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                message: crate::utils::truncate_for_log(&body, 200),
            });
        }
        Ok(resp.text().await?)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<String> {
        let body = retry(&self.policy, "http_get", move || self.get_once(url, query)).await?;
        debug!(bytes = body.len(), "GET completed");
        Ok(body)
    }
}
