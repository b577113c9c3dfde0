// src/process/mod.rs
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use csv::{Writer, WriterBuilder};
use glob::glob;
use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::BufWriter,
    path::{Path, PathBuf},
    time::Instant,
};
use tracing::{debug, info, instrument, warn};

use crate::{
    fetch::list_txt_files,
    tables::{FaersTable, RawFile},
};

pub mod chunk;
pub mod columns;
pub mod transform;
pub mod utils;

use chunk::ChunkReader;
use columns::ColumnMap;
use transform::{Rejection, TableTransform};

#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// Rows held in memory per chunk.
    pub chunk_rows: usize,
    /// Timestamp stamped on every output row of this run.
    pub load_ts: DateTime<Utc>,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            chunk_rows: 100_000,
            load_ts: Utc::now(),
        }
    }
}

/// Outcome of merging every quarter of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeStats {
    pub table: FaersTable,
    pub output: PathBuf,
    pub files: Vec<String>,
    pub rows_in: u64,
    pub rows_out: u64,
    pub dropped_missing_keys: u64,
    pub dropped_duplicates: u64,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
}

/// Group the raw `.txt` files of `raw_dir` by table. Within a table files are
/// ordered by quarter, then by name ignoring case.
pub fn group_raw_files(raw_dir: &Path) -> Result<BTreeMap<FaersTable, Vec<PathBuf>>> {
    let mut groups: BTreeMap<FaersTable, Vec<(Option<(u8, u8)>, String, PathBuf)>> =
        BTreeMap::new();
    for path in list_txt_files(raw_dir)? {
        match RawFile::from_path(&path) {
            Some(raw) => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_lowercase())
                    .unwrap_or_default();
                groups
                    .entry(raw.table)
                    .or_default()
                    .push((raw.quarter, name, path));
            }
            None => debug!(file = %path.display(), "not a FAERS table, skipping"),
        }
    }
    Ok(groups
        .into_iter()
        .map(|(table, mut files)| {
            files.sort();
            (table, files.into_iter().map(|(_, _, path)| path).collect())
        })
        .collect())
}

/// Merge and clean every table found in `raw_dir`, writing one
/// `merged_<table>.csv` per table to `output_dir`.
///
/// Previous `merged_*.csv` outputs are removed first. Inputs are streamed
/// chunk by chunk and output is appended as it is produced.
#[instrument(level = "info", skip(raw_dir, output_dir, options), fields(raw = %raw_dir.display(), out = %output_dir.display()))]
pub fn merge_and_transform(
    raw_dir: &Path,
    output_dir: &Path,
    options: &MergeOptions,
) -> Result<Vec<MergeStats>> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("creating {}", output_dir.display()))?;

    let pattern = format!("{}/merged_*.csv", output_dir.display());
    for old in glob(&pattern)?.filter_map(Result::ok) {
        fs::remove_file(&old).with_context(|| format!("removing {}", old.display()))?;
        debug!(file = %old.display(), "removed previous output");
    }

    let mut all = Vec::new();
    for (table, files) in group_raw_files(raw_dir)? {
        info!(%table, files = files.len(), ">>> processing group");
        let out_path = output_dir.join(table.merged_file_name());
        match merge_table(table, &files, &out_path, options)? {
            Some(stats) => {
                info!(
                    %table,
                    rows_in = stats.rows_in,
                    rows_out = stats.rows_out,
                    missing_keys = stats.dropped_missing_keys,
                    duplicates = stats.dropped_duplicates,
                    "finalized {}",
                    out_path.display()
                );
                all.push(stats);
            }
            None => warn!(%table, "no readable input, no output written"),
        }
    }
    Ok(all)
}

/// Merge `files` (all belonging to `table`) into `out_path`.
/// Returns `None` when none of the files has a header.
pub fn merge_table(
    table: FaersTable,
    files: &[PathBuf],
    out_path: &Path,
    options: &MergeOptions,
) -> Result<Option<MergeStats>> {
    let started = Utc::now();
    let load_ts = options.load_ts.to_rfc3339_opts(SecondsFormat::Secs, true);
    let tmp_path = out_path.with_extension("csv.tmp");

    let mut transform: Option<TableTransform> = None;
    let mut writer: Option<Writer<BufWriter<File>>> = None;
    let mut stats = MergeStats {
        table,
        output: out_path.to_path_buf(),
        files: Vec::with_capacity(files.len()),
        rows_in: 0,
        rows_out: 0,
        dropped_missing_keys: 0,
        dropped_duplicates: 0,
        started,
        finished: started,
    };

    for path in files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let Some(mut reader) = ChunkReader::open(path, options.chunk_rows)? else {
            warn!(file = %name, "no header, skipping");
            continue;
        };
        info!(file = %name, "streaming");
        let file_start = Instant::now();

        let transform = transform.get_or_insert_with(|| {
            TableTransform::new(table, reader.headers().to_vec(), load_ts.clone())
        });
        if writer.is_none() {
            let mut w = WriterBuilder::new().from_writer(BufWriter::new(
                File::create(&tmp_path)
                    .with_context(|| format!("creating {}", tmp_path.display()))?,
            ));
            w.write_record(transform.output_header())?;
            writer = Some(w);
        }
        let Some(w) = writer.as_mut() else {
            continue;
        };

        let map = ColumnMap::new(transform.columns(), reader.headers());
        if !map.missing().is_empty() || !map.dropped().is_empty() {
            warn!(
                file = %name,
                missing = ?map.missing(),
                dropped = ?map.dropped(),
                "columns differ from the first file of the table"
            );
        }

        let mut chunk_index = 0usize;
        while let Some(chunk) = reader.next_chunk()? {
            let chunk_len = chunk.len();
            for row in chunk {
                stats.rows_in += 1;
                match transform.apply(map.project(row)) {
                    Ok(out) => {
                        w.write_record(&out)?;
                        stats.rows_out += 1;
                    }
                    Err(Rejection::MissingKeys) => stats.dropped_missing_keys += 1,
                    Err(Rejection::Duplicate) => stats.dropped_duplicates += 1,
                }
            }
            w.flush()
                .with_context(|| format!("flushing {}", tmp_path.display()))?;
            debug!(file = %name, chunk = chunk_index, rows = chunk_len, "chunk written");
            chunk_index += 1;
        }

        info!(
            file = %name,
            rows = reader.rows_read(),
            chunks = chunk_index,
            elapsed = ?file_start.elapsed(),
            "file merged"
        );
        stats.files.push(name);
    }

    let Some(mut w) = writer else {
        return Ok(None);
    };
    w.flush()?;
    drop(w);
    fs::rename(&tmp_path, out_path)
        .with_context(|| format!("renaming {} → {}", tmp_path.display(), out_path.display()))?;

    stats.finished = Utc::now();
    Ok(Some(stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;
    use tracing_subscriber::{fmt, EnvFilter};

    fn init_logging() {
        let _ = fmt()
            .with_env_filter(EnvFilter::new("debug"))
            .with_test_writer()
            .try_init();
    }

    fn read_csv(path: &Path) -> Result<(Vec<String>, Vec<Vec<String>>)> {
        let mut rdr = csv::Reader::from_path(path)?;
        let header = rdr.headers()?.iter().map(str::to_string).collect();
        let rows = rdr
            .records()
            .map(|r| r.map(|r| r.iter().map(str::to_string).collect()))
            .collect::<Result<Vec<Vec<String>>, _>>()?;
        Ok((header, rows))
    }

    fn options(chunk_rows: usize) -> MergeOptions {
        MergeOptions {
            chunk_rows,
            load_ts: DateTime::parse_from_rfc3339("2026-10-15T08:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        }
    }

    #[test]
    fn merges_quarters_with_demo_rules() -> Result<()> {
        init_logging();
        let dir = tempdir()?;
        let raw = dir.path().join("raw");
        let out = dir.path().join("out");
        fs::create_dir_all(&raw)?;

        fs::write(
            raw.join("DEMO25Q1.txt"),
            "primaryid$caseid$age$sex$wt$event_dt$\n\
             1$100$25$m$70$20250110$\n\
             2$$30$F$80$202501$\n\
             $$40$M$90$2025$\n\
             1$100$25$M$70$20250110$\n",
        )?;
        // the second quarter swaps two columns and adds one
        fs::write(
            raw.join("DEMO25Q2.txt"),
            "primaryid$caseid$sex$age$wt$event_dt$occr_country\n\
             3$300$$NaN$$bad$US\n\
             1$100$m$25$70$20250110$US\n",
        )?;

        let stats = merge_and_transform(&raw, &out, &options(2))?;
        assert_eq!(stats.len(), 1);
        let s = &stats[0];
        assert_eq!(s.table, FaersTable::Demo);
        assert_eq!(s.files, vec!["DEMO25Q1.txt", "DEMO25Q2.txt"]);
        assert_eq!(s.rows_in, 6);
        assert_eq!(s.dropped_missing_keys, 1);
        assert_eq!(s.dropped_duplicates, 2);
        assert_eq!(s.rows_out, 3);

        let (header, rows) = read_csv(&out.join("merged_demo.csv"))?;
        assert_eq!(
            header,
            ["primaryid", "caseid", "age", "sex", "wt", "event_dt", "load_ts"]
        );
        assert_eq!(
            rows,
            vec![
                vec!["1", "100", "25", "M", "70", "2025-01-10", "2026-10-15T08:00:00Z"],
                vec!["2", "Unknown", "30", "F", "80", "2025-01-01", "2026-10-15T08:00:00Z"],
                vec!["3", "300", "", "UNKNOWN", "", "", "2026-10-15T08:00:00Z"],
            ]
        );
        Ok(())
    }

    #[test]
    fn output_never_exceeds_input_and_keys_are_present() -> Result<()> {
        init_logging();
        let dir = tempdir()?;
        let raw = dir.path().join("raw");
        let out = dir.path().join("out");
        fs::create_dir_all(&raw)?;

        let mut drug = String::from("primaryid$caseid$drug_seq$drugname$role_cod\n");
        let mut reac = String::from("primaryid$caseid$pt\n");
        for i in 0..50 {
            let pid = if i % 7 == 0 { String::new() } else { (i % 20).to_string() };
            let cid = if i % 7 == 0 { String::new() } else { (i % 20 * 10).to_string() };
            drug.push_str(&format!("{}${}$1$drug{}$ps\n", pid, cid, i % 3));
            reac.push_str(&format!("{}${}$pt{}\n", pid, cid, i % 4));
        }
        for q in ["25Q1", "25Q2"] {
            fs::write(raw.join(format!("DRUG{}.txt", q)), &drug)?;
            fs::write(raw.join(format!("REAC{}.txt", q)), &reac)?;
        }
        fs::write(raw.join("STAT25Q1.txt"), "ignored\n")?;

        let stats = merge_and_transform(&raw, &out, &options(7))?;
        assert_eq!(stats.len(), 2);
        for s in &stats {
            assert_eq!(s.rows_in, 100);
            assert!(s.rows_out <= s.rows_in);
            assert_eq!(
                s.rows_out + s.dropped_duplicates + s.dropped_missing_keys,
                s.rows_in
            );

            let (header, rows) = read_csv(&s.output)?;
            assert_eq!(rows.len() as u64, s.rows_out);
            let p = header.iter().position(|h| h == "primaryid").unwrap();
            let c = header.iter().position(|h| h == "caseid").unwrap();
            for row in rows {
                assert!(!(row[p].is_empty() && row[c].is_empty()));
                assert_ne!((row[p].as_str(), row[c].as_str()), ("Unknown", "Unknown"));
            }
        }
        Ok(())
    }

    #[test]
    fn quarters_merge_in_order_regardless_of_case() -> Result<()> {
        let dir = tempdir()?;
        let raw = dir.path().join("raw");
        let out = dir.path().join("out");
        fs::create_dir_all(&raw)?;
        fs::write(raw.join("demo25q1.txt"), "primaryid$caseid$sex\n1$10$F\n")?;
        fs::write(raw.join("DEMO25Q2.txt"), "caseid$primaryid$sex\n20$2$M\n")?;
        fs::write(raw.join("DEMO24Q4.TXT"), "primaryid$caseid$sex\n0$5$M\n")?;

        let groups = group_raw_files(&raw)?;
        let names: Vec<_> = groups[&FaersTable::Demo]
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
            .collect();
        assert_eq!(names, ["DEMO24Q4.TXT", "demo25q1.txt", "DEMO25Q2.txt"]);

        let stats = merge_and_transform(&raw, &out, &options(10))?;
        assert_eq!(stats[0].files, names);
        let (header, rows) = read_csv(&out.join("merged_demo.csv"))?;
        assert_eq!(header, ["primaryid", "caseid", "sex", "load_ts"]);
        assert_eq!(rows[2][..3], ["2", "20", "M"]);
        Ok(())
    }

    #[test]
    fn replaces_previous_outputs() -> Result<()> {
        let dir = tempdir()?;
        let raw = dir.path().join("raw");
        let out = dir.path().join("out");
        fs::create_dir_all(&raw)?;
        fs::create_dir_all(&out)?;
        fs::write(out.join("merged_stale.csv"), "old\n")?;
        fs::write(raw.join("OUTC25Q1.txt"), "primaryid$caseid$outc_cod\n1$10$HO\n")?;
        fs::write(raw.join("INDI25Q1.txt"), "")?;
        fs::write(raw.join("OUTC25Q2.txt"), "$$\n2$20$\n")?;

        let stats = merge_and_transform(&raw, &out, &options(100))?;
        assert_eq!(stats.len(), 1);
        assert!(!out.join("merged_stale.csv").exists());
        assert!(!out.join("merged_indi.csv").exists());
        assert!(out.join("merged_outc.csv").exists());
        assert_eq!(stats[0].files, ["OUTC25Q1.txt"]);
        assert_eq!(stats[0].rows_out, 1);
        assert!(!out.join("merged_outc.csv.tmp").exists());
        Ok(())
    }
}
