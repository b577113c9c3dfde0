use anyhow::{Context, Result};
use csv::{ByteRecord, Reader, ReaderBuilder};
use std::{fs::File, io::Read, path::Path};
use tracing::{debug, warn};

use crate::process::utils::normalize_header;

/// Field separator of the FAERS ASCII exports.
pub const FAERS_DELIMITER: u8 = b'$';

/// Streams a `$`-delimited FAERS table in fixed-size row chunks.
///
/// Quoting is disabled because free-text fields carry bare `"` characters.
/// Rows are aligned to the header width: a trailing empty field is cut,
/// short rows are padded with empty strings.
pub struct ChunkReader<R: Read> {
    reader: Reader<R>,
    headers: Vec<String>,
    chunk_rows: usize,
    record: ByteRecord,
    rows_read: u64,
    ragged_rows: u64,
    name: String,
}

impl ChunkReader<File> {
    pub fn open(path: &Path, chunk_rows: usize) -> Result<Option<Self>> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Self::from_reader(file, name, chunk_rows)
    }
}

impl<R: Read> ChunkReader<R> {
    /// Returns `None` when the input has no header line or the header names
    /// no columns.
    pub fn from_reader(inner: R, name: String, chunk_rows: usize) -> Result<Option<Self>> {
        let mut reader = ReaderBuilder::new()
            .delimiter(FAERS_DELIMITER)
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .from_reader(inner);

        let mut record = ByteRecord::new();
        if !reader
            .read_byte_record(&mut record)
            .with_context(|| format!("reading header of {}", name))?
        {
            return Ok(None);
        }

        let mut headers: Vec<String> = record
            .iter()
            .map(|f| normalize_header(&String::from_utf8_lossy(f)))
            .collect();
        while headers.last().map(|h| h.is_empty()).unwrap_or(false) {
            headers.pop();
        }
        if headers.is_empty() {
            warn!(file = %name, "header line has no column names");
            return Ok(None);
        }
        debug!(file = %name, columns = headers.len(), "header read");

        Ok(Some(Self {
            reader,
            headers,
            chunk_rows: chunk_rows.max(1),
            record,
            rows_read: 0,
            ragged_rows: 0,
            name,
        }))
    }

    /// Normalized header names.
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Next chunk of at most `chunk_rows` rows, `None` at end of input.
    pub fn next_chunk(&mut self) -> Result<Option<Vec<Vec<String>>>> {
        let width = self.headers.len();
        let mut chunk = Vec::with_capacity(self.chunk_rows.min(16_384));

        while chunk.len() < self.chunk_rows {
            let more = self
                .reader
                .read_byte_record(&mut self.record)
                .with_context(|| format!("reading {} after row {}", self.name, self.rows_read))?;
            if !more {
                break;
            }
            if self.record.len() == 1 && self.record[0].iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let mut row: Vec<String> = self
                .record
                .iter()
                .take(width)
                .map(|f| String::from_utf8_lossy(f).trim_end_matches('\r').to_string())
                .collect();
            if self.record.len() != width
                && !(self.record.len() == width + 1 && self.record[width].is_empty())
            {
                self.ragged_rows += 1;
            }
            row.resize(width, String::new());

            self.rows_read += 1;
            chunk.push(row);
        }

        if chunk.is_empty() {
            if self.ragged_rows > 0 {
                warn!(
                    file = %self.name,
                    ragged = self.ragged_rows,
                    "rows with unexpected field counts were aligned to the header"
                );
            }
            Ok(None)
        } else {
            Ok(Some(chunk))
        }
    }
}
