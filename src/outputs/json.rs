//! JSON output of an [`AnalysisResult`] for report and visualization tools.
//!
//! # Output Structure
//!
//! Files are grouped by the local date of the analysis:
//! ```text
//! output_dir/
//! └── 2025-05-06/
//!     ├── analysis_081502.json
//!     └── analysis_173044.json
//! ```

use crate::error::Result;
use crate::models::AnalysisResult;
use std::path::PathBuf;
use tokio::fs;
use tracing::{error, info, instrument};

/// Path the result will be written to, derived from its analysis time.
pub fn output_path(result: &AnalysisResult, output_dir: &str) -> PathBuf {
    let date = result.analysis_time.format("%Y-%m-%d").to_string();
    let stamp = result.analysis_time.format("%H%M%S").to_string();
    PathBuf::from(output_dir)
        .join(date)
        .join(format!("analysis_{stamp}.json"))
}

/// Write an [`AnalysisResult`] as pretty JSON with a date-based directory structure.
///
/// # Arguments
///
/// * `result` - The completed analysis to serialize
/// * `output_dir` - Base directory for JSON output
///
/// # Returns
///
/// The path of the written file, or an error if directory creation or file
/// writing fails.
#[instrument(level = "info", skip_all, fields(output_dir = %output_dir))]
pub async fn write_analysis(result: &AnalysisResult, output_dir: &str) -> Result<PathBuf> {
    let json = serde_json::to_string_pretty(result)?;
    let path = output_path(result, output_dir);

    if let Some(dir) = path.parent() {
        info!(dir = %dir.display(), "Ensuring JSON directory exists");
        if let Err(e) = fs::create_dir_all(dir).await {
            error!(dir = %dir.display(), error = %e, "Failed to create JSON dir");
            return Err(e.into());
        }
    }

    fs::write(&path, json).await?;
    info!(
        path = %path.display(),
        items = result.filtered_items.len(),
        "Wrote analysis JSON"
    );
    Ok(path)
}
