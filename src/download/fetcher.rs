//! The network half of a download.
//!
//! A [`FileFetcher`] writes one remote file to a destination path and reports
//! byte progress.  It knows nothing about caching, retries or sharing; the
//! [`FileDownloadManager`](super::FileDownloadManager) layers those on top.

use std::path::Path;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::DownloadError;

/// Byte-progress callback: `(bytes_written, total_bytes_if_known)`.
pub type ByteProgress<'a> = &'a (dyn Fn(u64, Option<u64>) + Send + Sync);

/// Performs a single transfer of `url` into `dest`.
#[async_trait]
pub trait FileFetcher: Send + Sync {
    /// Download `url` into `dest`, creating or truncating it.
    ///
    /// Returns the number of bytes written.
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        progress: ByteProgress<'_>,
    ) -> Result<u64, DownloadError>;
}

/// Streams files over HTTP with [`reqwest`].
pub struct HttpFetcher {
    client: Client,
    token: Option<String>,
}

impl HttpFetcher {
    pub fn new(token: Option<String>) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .build()
            .map_err(|e| DownloadError::Network {
                url: String::new(),
                reason: e.to_string(),
            })?;
        Ok(Self { client, token })
    }
}

fn network(url: &str, err: impl ToString) -> DownloadError {
    DownloadError::Network {
        url: url.to_string(),
        reason: err.to_string(),
    }
}

#[async_trait]
impl FileFetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        progress: ByteProgress<'_>,
    ) -> Result<u64, DownloadError> {
        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|e| network(url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(network(url, format!("server returned {status}")));
        }

        let total = response.content_length();
        debug!(url, ?total, "streaming download");

        let mut file = File::create(dest)
            .await
            .map_err(|e| DownloadError::io(dest, e))?;
        let mut written = 0u64;
        progress(written, total);

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| network(url, e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| DownloadError::io(dest, e))?;
            written += chunk.len() as u64;
            progress(written, total);
        }

        file.flush().await.map_err(|e| DownloadError::io(dest, e))?;
        Ok(written)
    }
}
