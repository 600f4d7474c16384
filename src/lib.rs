//! Multi-source information collection and LLM scoring pipeline.
//!
//! The binary in `main.rs` wires these modules together; the library is
//! exposed so the pipeline can be driven from tests or other tools.

pub mod analysis;
pub mod checkpoint;
pub mod cli;
pub mod collector;
pub mod config;
pub mod error;
pub mod http;
pub mod llm;
pub mod models;
pub mod outputs;
pub mod pipeline;
pub mod retry;
pub mod scorer;
pub mod sources;
pub mod synthesis;
pub mod utils;

pub use error::{ConfigError, Error, Result};
