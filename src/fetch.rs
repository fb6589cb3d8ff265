//! Content fetch for resolved entry locations.
//!
//! Resolves `file://`, `https://`, and `http://` locators to text content.
//! A non-2xx HTTP response is a fetch failure for that entry only; the sync
//! coordinator decides whether to skip or abort.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::time::Duration;

use crate::manifest::EntryLocation;

const FETCH_TIMEOUT_SECS: u64 = 30;

pub async fn fetch(location: &EntryLocation) -> Result<String> {
    match location {
        EntryLocation::File(path) => read_file(path).await,
        EntryLocation::Url(url) => fetch_url(url).await,
    }
}

pub async fn fetch_url(url: &str) -> Result<String> {
    if let Some(path) = url.strip_prefix("file://") {
        return read_file(Path::new(path)).await;
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
        .build()?;

    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to fetch {}", url))?;

    let status = response.status();
    if !status.is_success() {
        bail!("HTTP {} fetching {}", status, url);
    }

    Ok(response.text().await?)
}

async fn read_file(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_local_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("a.md");
        std::fs::write(&path, "hello").unwrap();

        let content = fetch(&EntryLocation::File(path.clone())).await.unwrap();
        assert_eq!(content, "hello");

        let url = format!("file://{}", path.display());
        let content = fetch(&EntryLocation::Url(url)).await.unwrap();
        assert_eq!(content, "hello");
    }

    #[tokio::test]
    async fn test_fetch_missing_file_is_error() {
        let result = fetch(&EntryLocation::File("/nonexistent/x.md".into())).await;
        assert!(result.is_err());
    }
}
