// src/config.rs
use clap::{builder::FalseyValueParser, Parser};
use std::{env, path::PathBuf, time::Duration};

use crate::tables::Quarter;

pub const DEFAULT_BASE_URL: &str = "https://fis.fda.gov/content/Exports";
pub const DEFAULT_QUARTERS: [&str; 2] = ["2025Q1", "2025Q2"];

/// Command-line arguments. Every flag can also be set from the environment.
#[derive(Parser, Debug, Clone)]
#[command(name = "faers-etl", about = "Download, merge, validate and load FDA FAERS quarterly data")]
pub struct Args {
    /// Directory receiving the extracted `.txt` tables
    #[arg(long, env = "FAERS_RAW_DIR", default_value = "data/raw")]
    pub raw_dir: PathBuf,

    /// Directory receiving `merged_*.csv`
    #[arg(long, env = "FAERS_PROCESSED_DIR", default_value = "data/processed")]
    pub processed_dir: PathBuf,

    /// Directory receiving validation reports
    #[arg(long, env = "FAERS_REPORT_DIR", default_value = "data/gx_reports")]
    pub report_dir: PathBuf,

    /// Directory holding the run ledger
    #[arg(long, env = "FAERS_HISTORY_DIR", default_value = "data/history")]
    pub history_dir: PathBuf,

    /// Directory for rolling log files
    #[arg(long, env = "FAERS_LOG_DIR", default_value = "logs")]
    pub log_dir: PathBuf,

    /// Base URL of the FAERS export server
    #[arg(long, env = "FAERS_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Quarters to download, e.g. `2025Q1,2025Q2`
    #[arg(
        long = "quarter",
        env = "FAERS_QUARTERS",
        value_delimiter = ',',
        default_values_t = DEFAULT_QUARTERS.map(|q| q.parse::<Quarter>().expect("default quarter"))
    )]
    pub quarters: Vec<Quarter>,

    /// Download attempts per archive
    #[arg(long, env = "FAERS_RETRY_ATTEMPTS", default_value_t = 3)]
    pub retry_attempts: u32,

    /// Seconds to sleep between download attempts
    #[arg(long, env = "FAERS_RETRY_DELAY_SECS", default_value_t = 5)]
    pub retry_delay_secs: u64,

    /// HTTP timeout in seconds
    #[arg(long, env = "FAERS_HTTP_TIMEOUT_SECS", default_value_t = 120)]
    pub http_timeout_secs: u64,

    /// Skip TLS certificate verification on the download client
    #[arg(long, env = "FAERS_ACCEPT_INVALID_CERTS", value_parser = FalseyValueParser::new())]
    pub accept_invalid_certs: bool,

    /// Rows per chunk while merging raw files
    #[arg(long, env = "FAERS_CHUNK_ROWS", default_value_t = 100_000)]
    pub chunk_rows: usize,

    /// Rows per insert while loading into the warehouse
    #[arg(long, env = "FAERS_LOAD_CHUNK_ROWS", default_value_t = 16_384)]
    pub load_chunk_rows: usize,

    /// Load merged CSVs into the warehouse (also `RUN_SNOWFLAKE_LOAD=1`)
    #[arg(long)]
    pub load: bool,

    /// Run dbt deps/run/test afterwards (also `RUN_DBT=1`)
    #[arg(long)]
    pub dbt: bool,

    /// dbt project directory
    #[arg(long, env = "FAERS_DBT_PROJECT_DIR", default_value = ".")]
    pub dbt_project_dir: PathBuf,

    #[arg(long, env = "FAERS_SKIP_DOWNLOAD", value_parser = FalseyValueParser::new())]
    pub skip_download: bool,

    #[arg(long, env = "FAERS_SKIP_TRANSFORM", value_parser = FalseyValueParser::new())]
    pub skip_transform: bool,

    #[arg(long, env = "FAERS_SKIP_VALIDATE", value_parser = FalseyValueParser::new())]
    pub skip_validate: bool,
}

/// Fixed-delay retry policy for network calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(5),
        }
    }
}

/// Resolved configuration handed to every stage.
#[derive(Debug, Clone)]
pub struct Settings {
    pub raw_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub report_dir: PathBuf,
    pub history_dir: PathBuf,
    pub log_dir: PathBuf,
    pub base_url: String,
    pub quarters: Vec<Quarter>,
    pub retry: RetryPolicy,
    pub http_timeout: Duration,
    pub accept_invalid_certs: bool,
    pub chunk_rows: usize,
    pub load_chunk_rows: usize,
    pub run_load: bool,
    pub run_dbt: bool,
    pub dbt_project_dir: PathBuf,
    pub skip_download: bool,
    pub skip_transform: bool,
    pub skip_validate: bool,
}

impl Settings {
    /// Build settings from parsed args. `RUN_SNOWFLAKE_LOAD` and `RUN_DBT`
    /// only count when set to exactly `1`.
    pub fn from_args(args: Args) -> Self {
        Self {
            raw_dir: args.raw_dir,
            processed_dir: args.processed_dir,
            report_dir: args.report_dir,
            history_dir: args.history_dir,
            log_dir: args.log_dir,
            base_url: args.base_url,
            quarters: args.quarters,
            retry: RetryPolicy {
                attempts: args.retry_attempts.max(1),
                delay: Duration::from_secs(args.retry_delay_secs),
            },
            http_timeout: Duration::from_secs(args.http_timeout_secs),
            accept_invalid_certs: args.accept_invalid_certs,
            chunk_rows: args.chunk_rows.max(1),
            load_chunk_rows: args.load_chunk_rows.max(1),
            run_load: args.load || env_flag("RUN_SNOWFLAKE_LOAD"),
            run_dbt: args.dbt || env_flag("RUN_DBT"),
            dbt_project_dir: args.dbt_project_dir,
            skip_download: args.skip_download,
            skip_transform: args.skip_transform,
            skip_validate: args.skip_validate,
        }
    }

    /// Defaults rooted at `base`, with `data/` and `logs/` underneath.
    pub fn rooted_at(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        let data = base.join("data");
        Self {
            raw_dir: data.join("raw"),
            processed_dir: data.join("processed"),
            report_dir: data.join("gx_reports"),
            history_dir: data.join("history"),
            log_dir: base.join("logs"),
            base_url: DEFAULT_BASE_URL.to_string(),
            quarters: DEFAULT_QUARTERS
                .iter()
                .filter_map(|q| q.parse().ok())
                .collect(),
            retry: RetryPolicy::default(),
            http_timeout: Duration::from_secs(120),
            accept_invalid_certs: false,
            chunk_rows: 100_000,
            load_chunk_rows: 16_384,
            run_load: false,
            run_dbt: false,
            dbt_project_dir: base,
            skip_download: false,
            skip_transform: false,
            skip_validate: false,
        }
    }
}

pub fn env_flag(name: &str) -> bool {
    env::var(name).map(|v| v.trim() == "1").unwrap_or(false)
}
