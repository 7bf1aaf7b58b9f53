// file: src/storage/download.rs
// description: fetches remote product images into the product directory
// reference: https://docs.rs/reqwest

use crate::error::{PipelineError, Result};
use crate::utils::Validator;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, warn};

const BROWSER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Clone)]
pub struct AssetDownloader {
    client: Client,
}

impl Default for AssetDownloader {
    fn default() -> Self {
        Self::new()
    }
}

impl AssetDownloader {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Body and content type of `url`. Non-success statuses are errors.
    pub async fn fetch(&self, url: &str, timeout: Duration) -> Result<(Vec<u8>, Option<String>)> {
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, BROWSER_AGENT)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| PipelineError::upstream(url, format!("download failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(PipelineError::upstream(
                url,
                format!("download returned status {}", response.status()),
            ));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?;
        Ok((bytes.to_vec(), content_type))
    }

    /// Saves each fetchable URL as `{prefix}_{i}.{jpg|png}` inside `directory`.
    /// Entries that are not http(s) or fail to download are skipped.
    pub async fn download_all(
        &self,
        urls: &[String],
        directory: &Path,
        prefix: &str,
        timeout: Duration,
    ) -> Vec<PathBuf> {
        let mut saved = Vec::new();
        if urls.is_empty() {
            return saved;
        }

        if let Err(e) = tokio::fs::create_dir_all(directory).await {
            error!("Failed to create {}: {}", directory.display(), e);
            return saved;
        }

        for (i, url) in urls.iter().enumerate() {
            let Some(full_url) = Validator::normalize_remote_url(url) else {
                debug!("Skipping non-http image reference: {}", url);
                continue;
            };

            match self.fetch(&full_url, timeout).await {
                Ok((bytes, content_type)) => {
                    let path = directory.join(format!(
                        "{}_{}.{}",
                        prefix,
                        i,
                        extension_for(content_type.as_deref())
                    ));
                    match tokio::fs::write(&path, &bytes).await {
                        Ok(()) => saved.push(path),
                        Err(e) => error!("Failed to save {}: {}", path.display(), e),
                    }
                }
                Err(e) => warn!("Failed to download image {}: {}", url, e),
            }
        }

        saved
    }
}

pub fn extension_for(content_type: Option<&str>) -> &'static str {
    match content_type {
        Some(ct) if ct.to_ascii_lowercase().contains("png") => "png",
        _ => "jpg",
    }
}
