//! Command-line interface definitions.
//!
//! Every option overrides the matching value from the YAML config. API keys
//! can also come from the environment.

use clap::Parser;

/// Command-line arguments for the zhilan pipeline.
///
/// # Examples
///
/// ```sh
/// # Run with config.yaml in the working directory
/// zhilan
///
/// # Different topics and range, ignore any stored checkpoints
/// zhilan --topics "rust,webassembly" --time-range last_3_days --fresh
///
/// # Keys from the environment
/// LLM_API_KEY=sk-... NEWSAPI_KEY=... zhilan -c prod.yaml -o ./results
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, default_value = "config.yaml")]
    pub config: String,

    /// Output directory for the JSON analysis (overrides `output.dir`)
    #[arg(short, long)]
    pub output_dir: Option<String>,

    /// Comma-separated topics (overrides `collection.topics`)
    #[arg(short, long, value_delimiter = ',')]
    pub topics: Option<Vec<String>>,

    /// Time range such as `today`, `last_week` or `last_10_days`
    #[arg(long)]
    pub time_range: Option<String>,

    /// Disable checkpoint loading and saving
    #[arg(long)]
    pub no_checkpoint: bool,

    /// Clear stored checkpoints before running
    #[arg(long)]
    pub fresh: bool,

    /// LLM API key (overrides `api.llm.api_key`)
    #[arg(long, env = "LLM_API_KEY", hide_env_values = true)]
    pub llm_api_key: Option<String>,

    /// NewsAPI key (overrides `api.newsapi.api_key`)
    #[arg(long, env = "NEWSAPI_KEY", hide_env_values = true)]
    pub newsapi_key: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["zhilan"]);
        assert_eq!(cli.config, "config.yaml");
        assert!(cli.output_dir.is_none());
        assert!(cli.topics.is_none());
        assert!(!cli.no_checkpoint);
        assert!(!cli.fresh);
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "zhilan",
            "-c",
            "prod.yaml",
            "-o",
            "/tmp/results",
            "--topics",
            "rust,llm agents",
            "--time-range",
            "last_3_days",
            "--fresh",
            "--no-checkpoint",
        ]);

        assert_eq!(cli.config, "prod.yaml");
        assert_eq!(cli.output_dir.as_deref(), Some("/tmp/results"));
        assert_eq!(cli.topics.unwrap(), vec!["rust", "llm agents"]);
        assert_eq!(cli.time_range.as_deref(), Some("last_3_days"));
        assert!(cli.fresh);
        assert!(cli.no_checkpoint);
    }
}
