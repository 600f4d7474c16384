//! LLM access: a chat client, a retry decorator and the service facade the
//! analysis stages talk to.
//!
//! # Architecture
//!
//! - [`AskAsync`]: core trait, "send a prompt, get an answer"
//! - [`ChatClient`]: HTTP implementation for OpenAI-compatible and DashScope endpoints
//! - [`RetryAsk`]: decorator adding backoff and jitter to any [`AskAsync`]
//! - [`LlmService`]: knows whether a credential is configured and turns raw
//!   answers into [`ScoreRecord`]s
//!
//! Without a credential the service never touches the network: scoring
//! returns fixed placeholder records and free-text completion returns `None`.

use crate::config::{LlmConfig, LlmProvider, RetryConfig};
use crate::error::{Error, Result};
use crate::models::ScoreRecord;
use crate::retry::{RetryPolicy, retry};
use crate::utils::{is_placeholder_key, truncate_for_log};
use serde::Serialize;
use serde_json::{Value, json};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

const SYSTEM_PROMPT: &str = "You are a professional information analyst. \
Answer precisely and follow the requested output format exactly.";

/// Trait for async LLM interaction.
///
/// Implementors send text to an LLM and return its answer. Decorators such as
/// [`RetryAsk`] wrap another implementor.
pub trait AskAsync {
    /// The type of response returned by the LLM.
    type Response;

    /// Send text to the LLM and receive a response.
    ///
    /// # Arguments
    ///
    /// * `text` - The user prompt
    ///
    /// # Returns
    ///
    /// The LLM's response, or an error if the request failed.
    async fn ask(&self, text: &str) -> Result<Self::Response>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// HTTP chat client speaking one of the [`LlmProvider`] wire formats.
pub struct ChatClient {
    http: reqwest::Client,
    provider: LlmProvider,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatClient")
            .field("provider", &self.provider)
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl ChatClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            provider: config.provider,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    fn request_body(&self, text: &str) -> Value {
        let messages = [
            ChatMessage {
                role: "system",
                content: SYSTEM_PROMPT,
            },
            ChatMessage {
                role: "user",
                content: text,
            },
        ];
        match self.provider {
            LlmProvider::OpenAi => json!({
                "model": self.model,
                "messages": messages,
                "temperature": self.temperature,
                "max_tokens": self.max_tokens,
            }),
            LlmProvider::DashScope => json!({
                "model": self.model,
                "input": { "messages": messages },
                "parameters": {
                    "temperature": self.temperature,
                    "max_tokens": self.max_tokens,
                    "result_format": "message",
                },
            }),
        }
    }
}

/// Pull the answer text out of a provider response body.
pub(crate) fn response_text(provider: LlmProvider, body: &Value) -> Result<String> {
    let text = match provider {
        LlmProvider::OpenAi => body.pointer("/choices/0/message/content"),
        LlmProvider::DashScope => body
            .pointer("/output/choices/0/message/content")
            .or_else(|| body.pointer("/output/text")),
    };
    text.and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            Error::Malformed(format!(
                "no answer text in response: {}",
                truncate_for_log(&body.to_string(), 200)
            ))
        })
}

impl AskAsync for ChatClient {
    type Response = String;

    #[instrument(level = "info", skip_all, fields(model = %self.model))]
    async fn ask(&self, text: &str) -> Result<Self::Response> {
        let t0 = Instant::now();
        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(text))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(
                status = status.as_u16(),
                elapsed_ms = t0.elapsed().as_millis() as u64,
                "API call failed"
            );
            return Err(Error::Api {
                status: status.as_u16(),
                message: truncate_for_log(&body, 300),
            });
        }

        let body: Value = resp.json().await?;
        let answer = response_text(self.provider, &body)?;
        debug!(
            elapsed_ms = t0.elapsed().as_millis() as u64,
            chars = answer.len(),
            "API call succeeded"
        );
        Ok(answer)
    }
}

/// Wrapper that adds exponential backoff retry logic to any [`AskAsync`] implementation.
///
/// The delay between attempts follows the shared [`RetryPolicy`]:
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
/// ```
pub struct RetryAsk<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T> RetryAsk<T>
where
    T: AskAsync,
{
    /// # Example
    ///
    /// ```ignore
    /// let client = ChatClient::new(&config.api.llm)?;
    /// let api = RetryAsk::new(client, RetryPolicy::default());
    /// ```
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl<T> fmt::Debug for RetryAsk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAsk")
            .field("max_attempts", &self.policy.max_attempts)
            .field("base_delay", &self.policy.base_delay)
            .field("max_delay", &self.policy.max_delay)
            .finish()
    }
}

impl<T> AskAsync for RetryAsk<T>
where
    T: AskAsync,
{
    type Response = T::Response;

    #[instrument(level = "info", skip_all)]
    async fn ask(&self, text: &str) -> Result<Self::Response> {
        retry(&self.policy, "ask", move || self.inner.ask(text)).await
    }
}

/// Find the JSON array in a model answer and parse it as score records.
///
/// Takes the text from the first `[` to the last `]`. A missing or
/// unparsable array yields an empty list. Each element is converted on its
/// own: one that is not a record keeps its position as an empty record.
pub fn extract_json_array(raw: &str) -> Vec<ScoreRecord> {
    let (Some(start), Some(end)) = (raw.find('['), raw.rfind(']')) else {
        warn!(answer = %truncate_for_log(raw, 200), "No JSON array in scoring answer");
        return Vec::new();
    };
    if end < start {
        warn!(answer = %truncate_for_log(raw, 200), "No JSON array in scoring answer");
        return Vec::new();
    }
    match serde_json::from_str::<Vec<Value>>(&raw[start..=end]) {
        Ok(values) => values
            .into_iter()
            .enumerate()
            .map(|(position, value)| {
                serde_json::from_value(value).unwrap_or_else(|e| {
                    warn!(position, error = %e, "Unusable score record; using defaults");
                    ScoreRecord::default()
                })
            })
            .collect(),
        Err(e) => {
            warn!(error = %e, answer = %truncate_for_log(raw, 200), "Malformed scoring array");
            Vec::new()
        }
    }
}

/// Facade over an [`AskAsync`] client that degrades when no credential is set.
#[derive(Debug)]
pub struct LlmService<A> {
    client: A,
    configured: bool,
}

impl LlmService<RetryAsk<ChatClient>> {
    /// Build the production service from config.
    ///
    /// A placeholder API key yields an unconfigured service; no request will
    /// ever be sent.
    pub fn from_config(llm: &LlmConfig, retry: &RetryConfig) -> Result<Self> {
        let configured = !is_placeholder_key(&llm.api_key);
        if !configured {
            warn!("LLM API key not configured; scoring falls back to placeholder values");
        }
        let policy = RetryPolicy::from_config(retry)
            .with_attempt_timeout(Duration::from_secs(llm.timeout_secs.saturating_add(5)));
        let client = RetryAsk::new(ChatClient::new(llm)?, policy);
        Ok(Self::new(client, configured))
    }
}

impl<A> LlmService<A>
where
    A: AskAsync<Response = String>,
{
    pub fn new(client: A, configured: bool) -> Self {
        Self { client, configured }
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    /// Free-text completion; `Ok(None)` when unconfigured.
    pub async fn complete(&self, prompt: &str) -> Result<Option<String>> {
        if !self.configured {
            return Ok(None);
        }
        self.client.ask(prompt).await.map(Some)
    }

    /// Ask for one score record per item.
    ///
    /// # Arguments
    ///
    /// * `prompt` - Fully rendered scoring prompt
    /// * `expected` - Number of items the prompt describes
    ///
    /// # Returns
    ///
    /// Parsed records in answer order; possibly fewer than `expected`. When
    /// unconfigured, exactly `expected` placeholder records.
    pub async fn score(&self, prompt: &str, expected: usize) -> Result<Vec<ScoreRecord>> {
        if !self.configured {
            info!(expected, "Returning placeholder scores");
            return Ok(vec![ScoreRecord::placeholder(); expected]);
        }
        let answer = self.client.ask(prompt).await?;
        let records = extract_json_array(&answer);
        if records.len() != expected {
            debug!(expected, got = records.len(), "Score count mismatch");
        }
        Ok(records)
    }
}
