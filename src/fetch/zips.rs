// src/fetch/zips.rs
use anyhow::{Context, Result};
use futures_util::StreamExt;
use reqwest::Client;
use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};
use tokio::{fs as tokio_fs, io::AsyncWriteExt, time::sleep};
use tracing::{debug, error, info, instrument, warn};
use zip::ZipArchive;

use crate::config::RetryPolicy;

/// Download `url` to `dest`, retrying with a fixed delay. Every attempt
/// restarts the transfer and truncates `dest`. Returns the byte count.
#[instrument(level = "info", skip(client, dest, retry), fields(url = %url))]
pub async fn download_zip(
    client: &Client,
    url: &str,
    dest: &Path,
    retry: RetryPolicy,
) -> Result<u64> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match fetch_once(client, url, dest).await {
            Ok(bytes) => {
                info!(bytes, attempt, "download complete");
                return Ok(bytes);
            }
            Err(e) if attempt < retry.attempts => {
                warn!(attempt, error = %e, "download attempt failed");
                info!(delay = ?retry.delay, "retrying");
                sleep(retry.delay).await;
            }
            Err(e) => {
                error!(attempts = attempt, error = %e, "download failed, giving up");
                return Err(e.context(format!("downloading {} after {} attempts", url, attempt)));
            }
        }
    }
}

async fn fetch_once(client: &Client, url: &str, dest: &Path) -> Result<u64> {
    let resp = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("GET {}", url))?
        .error_for_status()?;

    let mut file = tokio_fs::File::create(dest)
        .await
        .with_context(|| format!("creating {}", dest.display()))?;
    let mut stream = resp.bytes_stream();
    let mut total = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("reading response body")?;
        file.write_all(&chunk).await?;
        total += chunk.len() as u64;

        if total % (10 * 1024 * 1024) < chunk.len() as u64 {
            debug!("downloaded {} MB", total / (1024 * 1024));
        }
    }
    file.flush().await?;
    Ok(total)
}

/// Extract every `.txt` entry of `zip_path` whose base name starts with one of
/// `prefixes` (compared upper-case) into `raw_dir`. Files already present are
/// left untouched but still returned.
#[instrument(level = "info", skip(zip_path, raw_dir, prefixes), fields(zip = %zip_path.display()))]
pub fn extract_tables(zip_path: &Path, raw_dir: &Path, prefixes: &[String]) -> Result<Vec<PathBuf>> {
    let file = File::open(zip_path)
        .with_context(|| format!("Failed to open ZIP file: {:?}", zip_path))?;
    let mut archive = ZipArchive::new(file)
        .with_context(|| format!("Failed to read ZIP archive: {:?}", zip_path))?;
    fs::create_dir_all(raw_dir)?;

    let names: Vec<&str> = archive.file_names().collect();
    info!(entries = ?names, "zip contents");

    let mut out = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .with_context(|| format!("Failed to access ZIP entry #{} in {:?}", i, zip_path))?;
        if !entry.is_file() {
            continue;
        }

        let full_name = entry.name().to_string();
        let base = full_name
            .rsplit(|c| c == '/' || c == '\\')
            .next()
            .unwrap_or(&full_name)
            .to_string();
        let upper = base.to_uppercase();
        if !upper.ends_with(".TXT") || !prefixes.iter().any(|p| upper.starts_with(p.as_str())) {
            continue;
        }

        let out_path = raw_dir.join(&base);
        if out_path.exists() {
            info!(file = %base, "already exists, skipping");
        } else {
            let tmp_path = raw_dir.join(format!("{}.tmp", base));
            {
                let mut writer = BufWriter::new(
                    File::create(&tmp_path)
                        .with_context(|| format!("creating {}", tmp_path.display()))?,
                );
                io::copy(&mut entry, &mut writer)
                    .with_context(|| format!("extracting {}", full_name))?;
                writer.flush()?;
            }
            fs::rename(&tmp_path, &out_path)?;
            info!(file = %base, "extracted");
        }
        out.push(out_path);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::test_support::{build_zip, serve};
    use std::time::Duration;
    use tempfile::tempdir;

    fn no_wait(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            delay: Duration::from_millis(0),
        }
    }

    #[tokio::test]
    async fn retries_until_success() -> Result<()> {
        let body = b"PK-not-really".to_vec();
        let (addr, hits) = serve(vec![(500, Vec::new()), (200, body.clone())]).await;
        let dir = tempdir()?;
        let dest = dir.path().join("a.zip");

        let n = download_zip(
            &Client::new(),
            &format!("http://{}/FAERS_ASCII_2025Q1.zip", addr),
            &dest,
            no_wait(3),
        )
        .await?;

        assert_eq!(n, body.len() as u64);
        assert_eq!(fs::read(&dest)?, body);
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn gives_up_after_configured_attempts() -> Result<()> {
        let (addr, hits) = serve(vec![(503, Vec::new())]).await;
        let dir = tempdir()?;

        let res = download_zip(
            &Client::new(),
            &format!("http://{}/x.zip", addr),
            &dir.path().join("x.zip"),
            no_wait(2),
        )
        .await;

        assert!(res.is_err());
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 2);
        Ok(())
    }

    #[test]
    fn extracts_only_matching_tables() -> Result<()> {
        let dir = tempdir()?;
        let zip_path = dir.path().join("q.zip");
        fs::write(
            &zip_path,
            build_zip(&[
                ("ASCII/DEMO25Q1.txt", "primaryid$caseid\n1$10\n"),
                ("ascii/drug25q1.TXT", "primaryid$drugname\n1$aspirin\n"),
                ("ASCII/STAT25Q1.txt", "ignored\n"),
                ("Readme.pdf", "ignored"),
                ("ASCII/DEMO24Q4.txt", "wrong quarter\n"),
            ])?,
        )?;
        let raw = dir.path().join("raw");
        let prefixes = vec!["DEMO25Q1".to_string(), "DRUG25Q1".to_string()];

        let mut files = extract_tables(&zip_path, &raw, &prefixes)?;
        files.sort();
        assert_eq!(
            files,
            vec![raw.join("DEMO25Q1.txt"), raw.join("drug25q1.TXT")]
        );
        assert_eq!(
            fs::read_to_string(raw.join("DEMO25Q1.txt"))?,
            "primaryid$caseid\n1$10\n"
        );

        // second pass keeps the existing file and still reports it
        fs::write(raw.join("DEMO25Q1.txt"), "local edit")?;
        let again = extract_tables(&zip_path, &raw, &prefixes)?;
        assert_eq!(again.len(), 2);
        assert_eq!(fs::read_to_string(raw.join("DEMO25Q1.txt"))?, "local edit");
        Ok(())
    }

    #[test]
    fn corrupt_archive_is_an_error() -> Result<()> {
        let dir = tempdir()?;
        let zip_path = dir.path().join("bad.zip");
        fs::write(&zip_path, b"<html>maintenance</html>")?;
        assert!(extract_tables(&zip_path, dir.path(), &["DEMO25Q1".to_string()]).is_err());
        Ok(())
    }
}
