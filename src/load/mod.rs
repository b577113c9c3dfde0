// src/load/mod.rs
use anyhow::{Context, Result};
use glob::glob;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::{tables::FaersTable, validate::table_name_of};

pub mod snowflake;

pub use snowflake::{SnowflakeClient, SnowflakeConfig};

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("environment variable {0} is not set")]
    MissingEnv(String),

    #[error("statement failed ({status} {code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("unexpected response: {0}")]
    Unexpected(String),
}

/// The statements the loader needs from a warehouse.
pub trait Warehouse {
    fn database(&self) -> &str;
    fn schema(&self) -> &str;
    fn execute(&self, sql: &str) -> Result<(), WarehouseError>;
    /// Insert `rows` (each `columns.len()` wide). Returns rows inserted.
    fn insert_rows(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<String>],
    ) -> Result<u64, WarehouseError>;
    fn count_rows(&self, table: &str) -> Result<u64, WarehouseError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSummary {
    pub table: String,
    pub rows_loaded: u64,
    pub chunks_ok: usize,
    pub chunks_failed: usize,
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub(crate) fn insert_sql(schema: &str, table: &str, columns: &[String]) -> String {
    let cols = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let params = vec!["?"; columns.len()].join(", ");
    format!("INSERT INTO {}.{} ({}) VALUES ({})", schema, table, cols, params)
}

/// Statements that (re)create `table` with one STRING column per header.
pub fn create_statements(
    database: &str,
    schema: &str,
    table: &str,
    columns: &[String],
) -> Vec<String> {
    let cols = columns
        .iter()
        .map(|c| format!("{} STRING", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");
    vec![
        format!("CREATE SCHEMA IF NOT EXISTS {}.{}", database, schema),
        format!("DROP TABLE IF EXISTS {}.{}", schema, table),
        format!("CREATE TABLE {}.{} ({})", schema, table, cols),
    ]
}

/// Replace `table` with the contents of `csv_path`.
///
/// Table DDL failures are fatal. A failed insert chunk is logged with its
/// index and skipped; the remaining chunks still load.
#[instrument(level = "info", skip(warehouse, csv_path), fields(file = %csv_path.display()))]
pub fn load_csv<W: Warehouse + ?Sized>(
    warehouse: &W,
    csv_path: &Path,
    table: &str,
    chunk_rows: usize,
) -> Result<LoadSummary> {
    let table = table.to_uppercase();
    let mut rdr = csv::Reader::from_path(csv_path)
        .with_context(|| format!("opening {}", csv_path.display()))?;
    let columns: Vec<String> = rdr
        .headers()?
        .iter()
        .map(|h| h.trim().to_uppercase())
        .collect();

    for sql in create_statements(warehouse.database(), warehouse.schema(), &table, &columns) {
        warehouse
            .execute(&sql)
            .with_context(|| format!("preparing table {}", table))?;
    }
    info!(%table, columns = columns.len(), "table recreated");

    let mut summary = LoadSummary {
        table: table.clone(),
        rows_loaded: 0,
        chunks_ok: 0,
        chunks_failed: 0,
    };
    let chunk_rows = chunk_rows.max(1);
    let mut chunk: Vec<Vec<String>> = Vec::with_capacity(chunk_rows);
    let mut index = 0usize;
    let mut records = rdr.records();

    loop {
        let next = records.next();
        let done = next.is_none();
        if let Some(record) = next {
            let record = record.with_context(|| format!("reading {}", csv_path.display()))?;
            chunk.push(record.iter().map(str::to_string).collect());
        }
        if chunk.len() >= chunk_rows || (done && !chunk.is_empty()) {
            match warehouse.insert_rows(&table, &columns, &chunk) {
                Ok(n) => {
                    summary.rows_loaded += n;
                    summary.chunks_ok += 1;
                }
                Err(e) => {
                    error!(%table, chunk = index, rows = chunk.len(), error = %e, "chunk failed to load");
                    summary.chunks_failed += 1;
                }
            }
            index += 1;
            chunk.clear();
        }
        if done {
            break;
        }
    }

    info!(
        %table,
        rows = summary.rows_loaded,
        ok = summary.chunks_ok,
        failed = summary.chunks_failed,
        "load finished"
    );
    Ok(summary)
}

/// Load every `merged_*.csv` in `processed_dir`, then log the row count of
/// each canonical table.
pub fn load_all<W: Warehouse + ?Sized>(
    warehouse: &W,
    processed_dir: &Path,
    chunk_rows: usize,
) -> Result<Vec<LoadSummary>> {
    let pattern = format!("{}/merged_*.csv", processed_dir.display());
    let mut files: Vec<PathBuf> = glob(&pattern)?.filter_map(Result::ok).collect();
    files.sort();

    let mut summaries = Vec::with_capacity(files.len());
    for path in files {
        let Some(table) = table_name_of(&path) else {
            continue;
        };
        summaries.push(load_csv(warehouse, &path, &table, chunk_rows)?);
    }
    verify_counts(warehouse);
    Ok(summaries)
}

/// `SELECT COUNT(*)` each canonical table and log the result.
pub fn verify_counts<W: Warehouse + ?Sized>(warehouse: &W) -> Vec<(FaersTable, Option<u64>)> {
    FaersTable::ALL
        .iter()
        .map(|&table| match warehouse.count_rows(table.code()) {
            Ok(n) => {
                info!(%table, rows = n, "warehouse count");
                (table, Some(n))
            }
            Err(e) => {
                warn!(%table, error = %e, "could not count rows");
                (table, None)
            }
        })
        .collect()
}
