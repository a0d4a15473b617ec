//! Favicon retrieval for sources.
//!
//! A source's icon is taken from `{site}/favicon.ico`, written as-is to
//! `{favicons_dir}/{source_id}.ico` and referenced as
//! `{favicon_base_url}{source_id}.ico`. No image conversion happens here.
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;
use crate::feed::{read_limited_bytes, within, FetchError};
use crate::util::favicon_url;

const MAX_FAVICON_SIZE: usize = 1024 * 1024; // 1MB

#[derive(Debug, Error)]
pub enum FaviconError {
    #[error("Favicon download failed: {0}")]
    Download(#[from] FetchError),

    #[error("Favicon is empty")]
    Empty,

    #[error("Failed to store favicon: {0}")]
    Io(#[from] std::io::Error),
}

/// Fetches and stores favicons. Failures are never fatal to a sync.
pub trait FaviconFetcher {
    /// Download the favicon of `site_url` for `source_id`, returning the
    /// reference to store on the source.
    fn fetch_favicon(
        &self,
        site_url: &str,
        source_id: i64,
    ) -> impl Future<Output = Result<String, FaviconError>> + Send;

    /// Forget the stored favicon of a deleted source. Missing files are fine.
    fn remove_favicon(&self, source_id: i64) -> Result<(), FaviconError>;
}

#[derive(Debug, Clone)]
pub struct HttpFaviconFetcher {
    client: reqwest::Client,
    dir: PathBuf,
    base_url: String,
    timeout: Option<Duration>,
}

impl HttpFaviconFetcher {
    pub fn new(client: reqwest::Client, dir: PathBuf, base_url: impl Into<String>) -> Self {
        Self {
            client,
            dir,
            base_url: base_url.into(),
            timeout: None,
        }
    }

    pub fn from_config(client: reqwest::Client, config: &Config, dir: PathBuf) -> Self {
        Self::new(client, dir, config.favicon_base_url.clone()).with_timeout(config.request_timeout())
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn file_name(source_id: i64) -> String {
        format!("{source_id}.ico")
    }

    /// Download the icon. The timeout covers the request and the body read.
    async fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        within(self.timeout, self.request(url)).await
    }

    async fn request(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }
        read_limited_bytes(response, MAX_FAVICON_SIZE).await
    }
}

impl FaviconFetcher for HttpFaviconFetcher {
    async fn fetch_favicon(&self, site_url: &str, source_id: i64) -> Result<String, FaviconError> {
        let url = favicon_url(site_url);
        let bytes = self.download(&url).await?;
        if bytes.is_empty() {
            return Err(FaviconError::Empty);
        }

        let name = Self::file_name(source_id);
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.dir.join(&name), &bytes).await?;

        tracing::debug!(source_id = source_id, url = %url, bytes = bytes.len(), "Stored favicon");
        Ok(format!("{}{}", self.base_url, name))
    }

    fn remove_favicon(&self, source_id: i64) -> Result<(), FaviconError> {
        match std::fs::remove_file(self.dir.join(Self::file_name(source_id))) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
