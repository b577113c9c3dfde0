use anyhow::{anyhow, Context, Result};
use arrow::{
    array::{ArrayRef, StringArray, TimestampMicrosecondArray},
    datatypes::Schema as ArrowSchema,
    record_batch::RecordBatch,
};
use chrono::{NaiveDate, Utc};
use glob::glob;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use std::{
    collections::HashSet,
    fs::{self, File},
    io::BufWriter,
    marker::PhantomData,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tracing::debug;

/// A row of a hive-partitioned history table.
/// - Defines schema, to_arrays, unique_key for writes.
/// - `from_batch` reads a row back for reporting.
pub trait HistoryRow: Sized {
    /// Partition date (UTC naive) for hive partitioning
    fn partition_date(&self) -> NaiveDate;
    /// Arrow schema for this row type
    fn schema() -> ArrowSchema;
    /// Convert this row into column arrays matching the schema
    fn to_arrays(&self) -> Vec<ArrayRef>;
    /// Unique dedupe key for this row
    fn unique_key(&self) -> String;
    /// Rebuild row `row` of an existing batch
    fn from_batch(batch: &RecordBatch, row: usize) -> Result<Self>;
    /// Column index for key in schema
    const KEY_COLUMN: usize;
    /// Column index for timestamp in schema
    const TIME_COLUMN: usize;
    /// Extract unique key from an existing batch row (for scanning)
    fn extract_key(batch: &RecordBatch, row: usize) -> Result<String> {
        let key = string_column(batch, Self::KEY_COLUMN)?.value(row);
        let ts = timestamp_column(batch, Self::TIME_COLUMN)?.value(row);
        Ok(format!("{}--{}", key, ts))
    }
}

pub(crate) fn string_column(batch: &RecordBatch, idx: usize) -> Result<&StringArray> {
    batch
        .column(idx)
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| anyhow!("history column {} is not a string column", idx))
}

pub(crate) fn timestamp_column(
    batch: &RecordBatch,
    idx: usize,
) -> Result<&TimestampMicrosecondArray> {
    batch
        .column(idx)
        .as_any()
        .downcast_ref::<TimestampMicrosecondArray>()
        .ok_or_else(|| anyhow!("history column {} is not a timestamp column", idx))
}

/// Generic hive-partitioned history table, one Parquet file per row under
/// `<base>/<table>/date=YYYYMMDD/`.
pub struct TableHistory<R: HistoryRow> {
    base_dir: PathBuf,
    table: String,
    schema: Arc<ArrowSchema>,
    seen: Mutex<HashSet<String>>,
    _marker: PhantomData<R>,
}

impl<R: HistoryRow> TableHistory<R> {
    /// Create the table directory and scan existing keys into `seen`.
    pub fn new(base_dir: impl Into<PathBuf>, table: &str) -> Result<Self> {
        let base_dir = base_dir.into();
        let table_dir = base_dir.join(table);
        fs::create_dir_all(&table_dir)
            .with_context(|| format!("could not create `{}`", table_dir.display()))?;

        let mut seen = HashSet::new();
        for path in partition_files(&table_dir)? {
            for batch in read_batches(&path)? {
                for i in 0..batch.num_rows() {
                    seen.insert(R::extract_key(&batch, i)?);
                }
            }
        }
        debug!(table, rows = seen.len(), "history loaded");

        Ok(Self {
            base_dir,
            table: table.to_string(),
            schema: Arc::new(R::schema()),
            seen: Mutex::new(seen),
            _marker: PhantomData,
        })
    }

    /// Add a new row. Returns `false` when the key was already recorded.
    pub fn add(&self, row: &R) -> Result<bool> {
        let key = row.unique_key();
        {
            let mut seen = self
                .seen
                .lock()
                .map_err(|_| anyhow!("history lock poisoned"))?;
            if !seen.insert(key.clone()) {
                return Ok(false);
            }
        }

        let partition = format!("date={}", row.partition_date().format("%Y%m%d"));
        let dir = self.base_dir.join(&self.table).join(partition);
        fs::create_dir_all(&dir)?;

        let ts = Utc::now().timestamp_micros();
        let fname = format!("{}---{}.parquet", sanitize(&key), ts);
        let tmp = dir.join(format!("{}.tmp", fname));
        let final_path = dir.join(&fname);

        let file = File::create(&tmp)
            .with_context(|| format!("creating `{}`", tmp.display()))?;
        let mut writer = ArrowWriter::try_new(BufWriter::new(file), self.schema.clone(), None)?;
        let batch = RecordBatch::try_new(self.schema.clone(), row.to_arrays())?;
        writer.write(&batch)?;
        writer.close()?;
        fs::rename(&tmp, &final_path)?;
        Ok(true)
    }

    /// Check if a row exists by its dedupe key
    pub fn contains(&self, key: &str) -> bool {
        self.seen
            .lock()
            .map(|seen| seen.contains(key))
            .unwrap_or(false)
    }

    /// Read every recorded row, oldest partition first.
    pub fn load_rows(&self) -> Result<Vec<R>> {
        let mut rows = Vec::new();
        for path in partition_files(&self.base_dir.join(&self.table))? {
            for batch in read_batches(&path)? {
                for i in 0..batch.num_rows() {
                    rows.push(R::from_batch(&batch, i)?);
                }
            }
        }
        Ok(rows)
    }
}

fn partition_files(table_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = glob(&format!("{}/date=*/*.parquet", table_dir.display()))?
        .filter_map(Result::ok)
        .collect::<Vec<_>>();
    files.sort();
    Ok(files)
}

fn read_batches(path: &Path) -> Result<Vec<RecordBatch>> {
    let file =
        File::open(path).with_context(|| format!("failed to open `{}`", path.display()))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?
        .with_batch_size(1024)
        .build()?;
    reader
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("reading `{}`", path.display()))
}

fn sanitize(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
