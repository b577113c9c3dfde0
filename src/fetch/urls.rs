// src/fetch/urls.rs
use anyhow::{Context, Result};
use url::Url;

use crate::tables::Quarter;

/// URL of the ASCII export for `quarter`, e.g.
/// `https://fis.fda.gov/content/Exports/FAERS_ASCII_2025Q1.zip`.
pub fn quarter_url(base: &str, quarter: Quarter) -> Result<Url> {
    let mut base = Url::parse(base).with_context(|| format!("parsing base URL {}", base))?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(&format!("FAERS_ASCII_{}.zip", quarter))
        .with_context(|| format!("building URL for {}", quarter))
}

/// Last path segment of `url`, used to label downloads in logs.
pub fn file_name(url: &Url) -> &str {
    url.path_segments()
        .and_then(|segments| segments.last())
        .filter(|name| !name.is_empty())
        .unwrap_or("download.zip")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_quarter_urls() {
        let q = Quarter::new(2025, 1).unwrap();
        let with_slash = quarter_url("https://fis.fda.gov/content/Exports/", q).unwrap();
        let without = quarter_url("https://fis.fda.gov/content/Exports", q).unwrap();
        assert_eq!(with_slash, without);
        assert_eq!(
            without.as_str(),
            "https://fis.fda.gov/content/Exports/FAERS_ASCII_2025Q1.zip"
        );
        assert_eq!(file_name(&without), "FAERS_ASCII_2025Q1.zip");
    }

    #[test]
    fn rejects_garbage_base() {
        assert!(quarter_url("not a url", Quarter::new(2025, 2).unwrap()).is_err());
    }
}
