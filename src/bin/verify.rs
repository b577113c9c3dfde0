// src/bin/verify.rs

use anyhow::{Context, Result};
use clap::Parser;
use faers_etl::{
    history::{MergedRow, TableHistory},
    process::{chunk::ChunkReader, group_raw_files},
};
use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

/// Compare raw row counts with the merged CSVs
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "data/raw")]
    raw_dir: PathBuf,

    #[arg(long, default_value = "data/processed")]
    processed_dir: PathBuf,

    #[arg(long, default_value = "data/history")]
    history_dir: PathBuf,

    /// Latest history rows to print
    #[arg(long, default_value_t = 10)]
    history_rows: usize,
}

fn count_raw_rows(path: &Path) -> Result<u64> {
    let Some(mut reader) = ChunkReader::open(path, 100_000)? else {
        return Ok(0);
    };
    while reader.next_chunk()?.is_some() {}
    Ok(reader.rows_read())
}

fn count_csv_rows(path: &Path) -> Result<Option<u64>> {
    if !path.exists() {
        return Ok(None);
    }
    let file = File::open(path)
        .with_context(|| format!("Failed to open '{}'", path.display()))?;
    let mut rdr = csv::Reader::from_reader(BufReader::new(file));
    let mut n = 0u64;
    for record in rdr.byte_records() {
        record.with_context(|| format!("Failed to read '{}'", path.display()))?;
        n += 1;
    }
    Ok(Some(n))
}

fn main() -> Result<()> {
    let args = Args::parse();

    // 1) raw rows per table, merged rows per table
    let groups = group_raw_files(&args.raw_dir)?;
    let mut lines = Vec::new();
    for (table, files) in &groups {
        let mut raw = 0u64;
        for f in files {
            raw += count_raw_rows(f)?;
        }
        let merged = count_csv_rows(&args.processed_dir.join(table.merged_file_name()))?;
        lines.push((table.code(), files.len(), raw, merged));
    }

    // 2) summary table; delta = merged - raw
    println!(
        "\n{: <8} {:>6} {:>15} {:>15} {:>15}",
        "Table", "Files", "Rows in", "Rows out", "Delta"
    );
    println!("{:-<63}", "");
    for (code, files, raw, merged) in lines {
        match merged {
            Some(m) => println!(
                "{: <8} {:>6} {:>15} {:>15} {:>15}",
                code,
                files,
                raw,
                m,
                m as i64 - raw as i64
            ),
            None => println!(
                "{: <8} {:>6} {:>15} {:>15} {:>15}",
                code, files, raw, "missing", "-"
            ),
        }
    }

    // 3) latest merges from the run ledger
    let history = TableHistory::<MergedRow>::new_merged(&args.history_dir)?;
    let mut rows = history.load_rows()?;
    rows.sort_by(|a, b| b.merge_end.cmp(&a.merge_end));
    println!(
        "\n{: <8} {:<25} {:>12} {:>12} {:>10} {:>10}",
        "Table", "Merged at", "Rows in", "Rows out", "No keys", "Dupes"
    );
    println!("{:-<82}", "");
    for r in rows.iter().take(args.history_rows) {
        println!(
            "{: <8} {:<25} {:>12} {:>12} {:>10} {:>10}",
            r.table,
            r.merge_end.format("%Y-%m-%d %H:%M:%S UTC"),
            r.rows_in,
            r.rows_out,
            r.dropped_missing_keys,
            r.dropped_duplicates
        );
    }

    Ok(())
}
