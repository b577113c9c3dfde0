// src/pipeline.rs
use anyhow::{Context, Result};
use chrono::Utc;
use std::time::Instant;
use tracing::{info, instrument, warn};

use crate::{
    config::Settings,
    fetch::{self, list_txt_files},
    history::{MergedRow, TableHistory},
    load::{self, LoadSummary, SnowflakeClient},
    process::{self, MergeOptions, MergeStats},
    validate::{self, ValidationReport},
};

/// What one `run_etl` did.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub raw_files: usize,
    pub merged: Vec<MergeStats>,
    pub validation: Vec<ValidationReport>,
    pub loaded: Vec<LoadSummary>,
}

/// download → merge/transform → history → validate → optional load.
#[instrument(level = "info", skip_all)]
pub async fn run_etl(settings: &Settings) -> Result<RunSummary> {
    let started = Instant::now();
    let mut summary = RunSummary::default();

    // ─── 1) download ────────────────────────────────────────────────
    let raw_files = if settings.skip_download {
        info!("download skipped");
        if settings.raw_dir.is_dir() {
            list_txt_files(&settings.raw_dir)?
        } else {
            warn!(dir = %settings.raw_dir.display(), "raw directory does not exist");
            Vec::new()
        }
    } else {
        let client = fetch::build_client(settings)?;
        fetch::download_faers_data(&client, settings).await?
    };
    summary.raw_files = raw_files.len();
    info!(files = raw_files.len(), "raw files ready");

    // ─── 2) merge & transform ───────────────────────────────────────
    if settings.skip_transform {
        info!("transform skipped");
    } else {
        let raw_dir = settings.raw_dir.clone();
        let out_dir = settings.processed_dir.clone();
        let options = MergeOptions {
            chunk_rows: settings.chunk_rows,
            load_ts: Utc::now(),
        };
        summary.merged = tokio::task::spawn_blocking(move || {
            process::merge_and_transform(&raw_dir, &out_dir, &options)
        })
        .await
        .context("merge task panicked")??;

        // ─── 3) history ─────────────────────────────────────────────
        let history = TableHistory::<MergedRow>::new_merged(&settings.history_dir)?;
        for stats in &summary.merged {
            history.add(&MergedRow::from(stats))?;
        }
    }

    // ─── 4) validate ────────────────────────────────────────────────
    if settings.skip_validate {
        info!("validation skipped");
    } else {
        let processed = settings.processed_dir.clone();
        let reports = settings.report_dir.clone();
        summary.validation =
            tokio::task::spawn_blocking(move || validate::validate_all(&processed, &reports))
                .await
                .context("validation task panicked")??;
        let failed = summary.validation.iter().filter(|r| !r.success).count();
        if failed > 0 {
            warn!(failed, total = summary.validation.len(), "validation finished with failures");
        }
    }

    // ─── 5) load ────────────────────────────────────────────────────
    if settings.run_load {
        let processed = settings.processed_dir.clone();
        let chunk_rows = settings.load_chunk_rows;
        summary.loaded = tokio::task::spawn_blocking(move || -> Result<Vec<LoadSummary>> {
            let warehouse = SnowflakeClient::from_env()?;
            load::load_all(&warehouse, &processed, chunk_rows)
        })
        .await
        .context("load task panicked")??;
    } else {
        info!("warehouse load disabled (set RUN_SNOWFLAKE_LOAD=1 or --load)");
    }

    info!(elapsed = ?started.elapsed(), "ETL finished");
    Ok(summary)
}
