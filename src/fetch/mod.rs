// src/fetch/mod.rs
use anyhow::{Context, Result};
use reqwest::Client;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tokio::task;
use tracing::{info, instrument, warn};

use crate::{config::Settings, tables::FaersTable};

pub mod urls;
pub mod zips;

/// HTTP client used for every download.
pub fn build_client(settings: &Settings) -> Result<Client> {
    Client::builder()
        .timeout(settings.http_timeout)
        .danger_accept_invalid_certs(settings.accept_invalid_certs)
        .build()
        .context("building HTTP client")
}

/// All `*.txt` files (any case) directly under `dir`, sorted by name.
pub fn list_txt_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("listing {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("txt"))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Download and extract the configured quarters into `settings.raw_dir`.
///
/// When the directory already holds one file per table per quarter nothing is
/// fetched and the existing files are returned.
#[instrument(level = "info", skip(client, settings), fields(raw_dir = %settings.raw_dir.display()))]
pub async fn download_faers_data(client: &Client, settings: &Settings) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(&settings.raw_dir)
        .with_context(|| format!("creating {}", settings.raw_dir.display()))?;

    let expected = settings.quarters.len() * FaersTable::ALL.len();
    let existing = list_txt_files(&settings.raw_dir)?;
    if expected > 0 && existing.len() >= expected {
        info!(
            found = existing.len(),
            expected, "all FAERS text files already present, skipping download"
        );
        return Ok(existing);
    }

    let mut downloaded = Vec::new();
    for quarter in &settings.quarters {
        let url = urls::quarter_url(&settings.base_url, *quarter)?;
        info!(%quarter, name = urls::file_name(&url), "downloading");

        let tmp = tempfile::Builder::new()
            .prefix("faers-")
            .suffix(".zip")
            .tempfile()
            .context("creating temporary ZIP file")?;
        zips::download_zip(client, url.as_str(), tmp.path(), settings.retry).await?;

        let prefixes: Vec<String> = FaersTable::ALL
            .iter()
            .map(|t| quarter.file_prefix(*t))
            .collect();
        let raw_dir = settings.raw_dir.clone();
        let files = task::spawn_blocking(move || {
            let files = zips::extract_tables(tmp.path(), &raw_dir, &prefixes);
            drop(tmp);
            files
        })
        .await
        .context("extraction task failed")??;

        if files.len() < FaersTable::ALL.len() {
            warn!(
                %quarter,
                found = files.len(),
                "archive is missing some FAERS tables"
            );
        }
        downloaded.extend(files);
    }

    Ok(downloaded)
}

#[cfg(test)]
pub(crate) mod test_support {
    use anyhow::Result;
    use std::{
        io::{Cursor, Write},
        net::SocketAddr,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };
    use zip::{write::SimpleFileOptions, CompressionMethod};

    /// Build an in-memory ZIP from `(name, content)` pairs.
    pub fn build_zip(entries: &[(&str, &str)]) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
            let options =
                SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
            for (name, content) in entries {
                zip.start_file(*name, options)?;
                zip.write_all(content.as_bytes())?;
            }
            zip.finish()?;
        }
        Ok(buf)
    }

    /// Minimal HTTP responder: the n-th connection gets the n-th response,
    /// the last response repeats. Returns the address and a hit counter.
    pub async fn serve(responses: Vec<(u16, Vec<u8>)>) -> (SocketAddr, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let (status, body) = responses
                    .get(n)
                    .or_else(|| responses.last())
                    .cloned()
                    .unwrap_or((500, Vec::new()));

                let mut req = [0u8; 4096];
                let _ = sock.read(&mut req).await;
                let head = format!(
                    "HTTP/1.1 {} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    status,
                    body.len()
                );
                let _ = sock.write_all(head.as_bytes()).await;
                let _ = sock.write_all(&body).await;
                let _ = sock.shutdown().await;
            }
        });

        (addr, hits)
    }
}
