//! Typed errors for collection, scoring and configuration.
//!
//! Everything that can go wrong inside an adapter call or a scoring batch is
//! an [`Error`]; those are contained at the stage boundary and logged. Only
//! [`ConfigError`] is meant to reach the caller, since it describes a setup
//! that cannot run at all.

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by HTTP transports, the LLM client and payload parsing.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport-level failure (connect, TLS, body read, status).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote service answered with a non-success status or an error payload.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A single attempt exceeded its time budget.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The payload parsed but did not have the expected shape.
    #[error("unexpected response: {0}")]
    Malformed(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Fatal configuration problems. These stop the run before any stage starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Also covers missing required sections (`collection`, `api`).
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("unknown time range mode: {0}")]
    UnknownTimeRange(String),

    #[error("custom time range requires `{0}`")]
    MissingCustomDate(&'static str),

    #[error("invalid date `{value}`: expected YYYY-MM-DD")]
    InvalidDate { value: String },

    #[error("start date {start} is after end date {end}")]
    InvertedRange { start: String, end: String },

    #[error("no topics configured")]
    NoTopics,

    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}
