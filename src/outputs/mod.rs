//! Output writers for finished runs.
//!
//! - [`json`]: writes the [`crate::models::AnalysisResult`] consumed by the
//!   report and visualization tools

pub mod json;
