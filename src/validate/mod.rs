// src/validate/mod.rs
use anyhow::{Context, Result};
use glob::glob;
use serde::Serialize;
use serde_json::{json, Value};
use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};
use tracing::{info, instrument, warn};

use crate::tables::{FaersTable, DEFAULT_ROW_ENVELOPE};

/// Rows loaded for row-level expectations.
pub const SAMPLE_ROWS: usize = 100_000;

/// Outcome of a single expectation.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExpectationResult {
    pub expectation: String,
    pub success: bool,
    pub expected: Value,
    pub observed: Value,
}

/// Validation outcome of one merged table, written as `gx_{TABLE}.json`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ValidationReport {
    pub table: String,
    pub source: String,
    pub success: bool,
    pub row_count: u64,
    pub sampled_rows: usize,
    pub results: Vec<ExpectationResult>,
}

impl ValidationReport {
    pub fn failed(&self) -> impl Iterator<Item = &ExpectationResult> {
        self.results.iter().filter(|r| !r.success)
    }
}

/// What a merged table is checked against.
#[derive(Debug, Clone)]
pub struct TableExpectations {
    pub min_rows: u64,
    pub max_rows: u64,
    /// `None` accepts whatever columns are present.
    pub columns: Option<Vec<String>>,
}

impl TableExpectations {
    /// Catalogue expectations for `table_name`, or the fallback envelope for
    /// tables outside the catalogue.
    pub fn for_table(table_name: &str) -> Self {
        match FaersTable::from_code(table_name) {
            Some(t) => {
                let (min_rows, max_rows) = t.row_envelope();
                Self {
                    min_rows,
                    max_rows,
                    columns: Some(t.expected_columns().iter().map(|c| c.to_string()).collect()),
                }
            }
            None => Self {
                min_rows: DEFAULT_ROW_ENVELOPE.0,
                max_rows: DEFAULT_ROW_ENVELOPE.1,
                columns: None,
            },
        }
    }
}

/// Table name of a merged output: the stem without `merged_`, upper-cased.
pub fn table_name_of(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    stem.strip_prefix("merged_").map(str::to_uppercase)
}

/// Validate every `merged_*.csv` in `processed_dir` and write one JSON report
/// per table into `report_dir`. Failed expectations are logged, not raised.
#[instrument(level = "info", skip(processed_dir, report_dir), fields(dir = %processed_dir.display()))]
pub fn validate_all(processed_dir: &Path, report_dir: &Path) -> Result<Vec<ValidationReport>> {
    fs::create_dir_all(report_dir)
        .with_context(|| format!("creating {}", report_dir.display()))?;

    let pattern = format!("{}/merged_*.csv", processed_dir.display());
    let mut files: Vec<PathBuf> = glob(&pattern)
        .with_context(|| format!("bad glob pattern {}", pattern))?
        .filter_map(Result::ok)
        .collect();
    files.sort();
    if files.is_empty() {
        warn!("no merged files to validate");
    }

    let mut reports = Vec::with_capacity(files.len());
    for path in files {
        let Some(table) = table_name_of(&path) else {
            continue;
        };
        info!(%table, "validating {}", path.display());
        let expectations = TableExpectations::for_table(&table);
        let report = validate_file(&path, &table, &expectations)?;
        write_report(&report, report_dir)?;

        if report.success {
            info!(%table, rows = report.row_count, "validation passed");
        } else {
            for failed in report.failed() {
                warn!(
                    %table,
                    expectation = %failed.expectation,
                    expected = %failed.expected,
                    observed = %failed.observed,
                    "expectation failed"
                );
            }
        }
        reports.push(report);
    }
    Ok(reports)
}

/// Run the expectations against one merged CSV.
pub fn validate_file(
    path: &Path,
    table: &str,
    expectations: &TableExpectations,
) -> Result<ValidationReport> {
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let header: Vec<String> = rdr
        .headers()
        .with_context(|| format!("reading header of {}", path.display()))?
        .iter()
        .map(str::to_string)
        .collect();
    let primaryid = header.iter().position(|h| h == "primaryid");
    let caseid = header.iter().position(|h| h == "caseid");

    let mut row_count = 0u64;
    let mut sampled_rows = 0usize;
    let mut both_keys_empty = 0u64;
    let mut record = csv::StringRecord::new();
    while rdr
        .read_record(&mut record)
        .with_context(|| format!("reading {} at row {}", path.display(), row_count))?
    {
        row_count += 1;
        if sampled_rows < SAMPLE_ROWS {
            sampled_rows += 1;
            if let (Some(p), Some(c)) = (primaryid, caseid) {
                if is_null(record.get(p)) && is_null(record.get(c)) {
                    both_keys_empty += 1;
                }
            }
        }
    }

    let mut results = vec![ExpectationResult {
        expectation: "row_count_between".into(),
        success: (expectations.min_rows..=expectations.max_rows).contains(&row_count),
        expected: json!({ "min": expectations.min_rows, "max": expectations.max_rows }),
        observed: json!(row_count),
    }];

    if let Some(expected) = &expectations.columns {
        let missing: Vec<&String> = expected.iter().filter(|c| !header.contains(c)).collect();
        results.push(ExpectationResult {
            expectation: "columns_include".into(),
            success: missing.is_empty(),
            expected: json!(expected),
            observed: json!({ "columns": header, "missing": missing }),
        });
    }

    if primaryid.is_some() && caseid.is_some() {
        results.push(ExpectationResult {
            expectation: "keys_not_both_empty".into(),
            success: both_keys_empty == 0,
            expected: json!(0),
            observed: json!(both_keys_empty),
        });
    }

    Ok(ValidationReport {
        table: table.to_string(),
        source: path.display().to_string(),
        success: results.iter().all(|r| r.success),
        row_count,
        sampled_rows,
        results,
    })
}

fn is_null(value: Option<&str>) -> bool {
    value.map(|v| v.trim().is_empty()).unwrap_or(true)
}

/// Write `gx_{TABLE}.json`, pretty-printed, via tmp file and rename.
pub fn write_report(report: &ValidationReport, report_dir: &Path) -> Result<PathBuf> {
    let path = report_dir.join(format!("gx_{}.json", report.table));
    let tmp_path = report_dir.join(format!(".gx_{}.json.tmp", report.table));
    let mut tmp = File::create(&tmp_path)
        .with_context(|| format!("creating {}", tmp_path.display()))?;
    serde_json::to_writer_pretty(&mut tmp, report).context("serializing report")?;
    tmp.write_all(b"\n")?;
    fs::rename(&tmp_path, &path)
        .with_context(|| format!("renaming {} -> {}", tmp_path.display(), path.display()))?;
    Ok(path)
}
