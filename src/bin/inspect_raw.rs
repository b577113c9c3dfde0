use anyhow::{bail, Result};
use clap::Parser;
use faers_etl::process::chunk::ChunkReader;
use std::path::PathBuf;

/// Print the header and first rows of a raw FAERS table
#[derive(Parser, Debug)]
struct Args {
    /// `$`-delimited FAERS text file, e.g. data/raw/DRUG25Q1.txt
    file: PathBuf,

    /// Rows to show
    #[arg(long, short = 'n', default_value_t = 5)]
    rows: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let Some(mut reader) = ChunkReader::open(&args.file, args.rows.max(1))? else {
        bail!("{} is empty", args.file.display());
    };

    println!("{}", args.file.display());
    println!("{:-<60}", "");
    println!("{}", reader.headers().join(" | "));
    println!("{:-<60}", "");
    if let Some(rows) = reader.next_chunk()? {
        for row in rows.iter().take(args.rows) {
            println!("{}", row.join(" | "));
        }
    }
    Ok(())
}
