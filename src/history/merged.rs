use anyhow::{anyhow, Result};
use arrow::{
    array::{ArrayRef, StringArray, TimestampMicrosecondArray, UInt64Array},
    datatypes::{DataType as ArrowDataType, Field, Schema as ArrowSchema, TimeUnit},
    record_batch::RecordBatch,
};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::{path::PathBuf, sync::Arc};

use crate::{
    history::table_history::{string_column, timestamp_column, HistoryRow, TableHistory},
    process::MergeStats,
};

/// One merged table, as recorded after `merge_and_transform`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedRow {
    pub table: String,
    /// Input file names joined with `,`.
    pub files: String,
    pub rows_in: u64,
    pub rows_out: u64,
    pub dropped_missing_keys: u64,
    pub dropped_duplicates: u64,
    pub merge_start: DateTime<Utc>,
    pub merge_end: DateTime<Utc>,
}

impl From<&MergeStats> for MergedRow {
    fn from(stats: &MergeStats) -> Self {
        Self {
            table: stats.table.code().to_string(),
            files: stats.files.join(","),
            rows_in: stats.rows_in,
            rows_out: stats.rows_out,
            dropped_missing_keys: stats.dropped_missing_keys,
            dropped_duplicates: stats.dropped_duplicates,
            merge_start: stats.started,
            merge_end: stats.finished,
        }
    }
}

fn micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

fn from_micros(us: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_micros(us)
        .single()
        .ok_or_else(|| anyhow!("timestamp {} out of range", us))
}

fn u64_column(batch: &RecordBatch, idx: usize) -> Result<&UInt64Array> {
    batch
        .column(idx)
        .as_any()
        .downcast_ref::<UInt64Array>()
        .ok_or_else(|| anyhow!("history column {} is not a u64 column", idx))
}

impl HistoryRow for MergedRow {
    const KEY_COLUMN: usize = 0;
    const TIME_COLUMN: usize = 7;

    fn partition_date(&self) -> NaiveDate {
        self.merge_end.date_naive()
    }

    fn schema() -> ArrowSchema {
        let ts = ArrowDataType::Timestamp(TimeUnit::Microsecond, None);
        ArrowSchema::new(vec![
            Field::new("table", ArrowDataType::Utf8, false),
            Field::new("files", ArrowDataType::Utf8, false),
            Field::new("rows_in", ArrowDataType::UInt64, false),
            Field::new("rows_out", ArrowDataType::UInt64, false),
            Field::new("dropped_missing_keys", ArrowDataType::UInt64, false),
            Field::new("dropped_duplicates", ArrowDataType::UInt64, false),
            Field::new("merge_start", ts.clone(), false),
            Field::new("merge_end", ts, false),
        ])
    }

    fn to_arrays(&self) -> Vec<ArrayRef> {
        vec![
            Arc::new(StringArray::from(vec![self.table.clone()])),
            Arc::new(StringArray::from(vec![self.files.clone()])),
            Arc::new(UInt64Array::from(vec![self.rows_in])),
            Arc::new(UInt64Array::from(vec![self.rows_out])),
            Arc::new(UInt64Array::from(vec![self.dropped_missing_keys])),
            Arc::new(UInt64Array::from(vec![self.dropped_duplicates])),
            Arc::new(TimestampMicrosecondArray::from(vec![micros(self.merge_start)])),
            Arc::new(TimestampMicrosecondArray::from(vec![micros(self.merge_end)])),
        ]
    }

    fn unique_key(&self) -> String {
        format!("{}--{}", self.table, micros(self.merge_end))
    }

    fn from_batch(batch: &RecordBatch, row: usize) -> Result<Self> {
        Ok(Self {
            table: string_column(batch, 0)?.value(row).to_string(),
            files: string_column(batch, 1)?.value(row).to_string(),
            rows_in: u64_column(batch, 2)?.value(row),
            rows_out: u64_column(batch, 3)?.value(row),
            dropped_missing_keys: u64_column(batch, 4)?.value(row),
            dropped_duplicates: u64_column(batch, 5)?.value(row),
            merge_start: from_micros(timestamp_column(batch, 6)?.value(row))?,
            merge_end: from_micros(timestamp_column(batch, 7)?.value(row))?,
        })
    }
}

impl TableHistory<MergedRow> {
    pub fn new_merged(base: impl Into<PathBuf>) -> Result<Self> {
        TableHistory::new(base, "merged")
    }
}
