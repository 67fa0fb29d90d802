//! HTTP fetching of repository index files and GPG keys.
//!
//! One [`Fetcher`] is built per service and shared by every source so
//! connection pooling works across a reload. Downloads land in per-source
//! cache directories; resolution reads never touch the network.

use crate::error::{FleetError, Result};
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Shared HTTP client for index and key downloads.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(format!("fleetpkg/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Fetch a URL, returning the raw body bytes. Non-success statuses are
    /// errors; callers decide whether a failure is fatal.
    pub async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(FleetError::FetchStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Fetch a URL into a file, replacing it atomically. The temporary file
    /// lives next to the destination so the rename stays on one filesystem.
    pub async fn fetch_to_file(&self, url: &str, dest: &Path) -> Result<()> {
        let body = self.fetch_bytes(url).await?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = dest.with_extension("part");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&body).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, dest).await?;
        Ok(())
    }
}

/// Transparently gunzip index bytes when they carry the gzip magic, otherwise
/// hand them back untouched. Repositories serve both compressed and plain
/// index files and the cache keeps whatever was fetched.
pub fn gunzip_if_needed(raw: &[u8]) -> Result<Vec<u8>> {
    if raw.len() >= 2 && raw[0] == 0x1f && raw[1] == 0x8b {
        let mut decoder = flate2::read::GzDecoder::new(raw);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| FleetError::Format(format!("gzip decode failed: {}", e)))?;
        Ok(out)
    } else {
        Ok(raw.to_vec())
    }
}
