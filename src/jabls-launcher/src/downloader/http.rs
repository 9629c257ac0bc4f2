//! HTTP client and remote archive requests.

use futures::StreamExt;
use reqwest::Client;
use reqwest::header::LAST_MODIFIED;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::metadata::FreshnessRecord;
use super::types::ProgressCallback;
use crate::error::{LauncherError, LauncherResult};

/// User-Agent for HTTP requests
pub fn user_agent() -> String {
    format!("jabls-launcher/{}", crate::CURRENT_VERSION)
}

/// Timeout for establishing the HTTP connection (30 seconds)
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Create an HTTP client with proper configuration.
///
/// No overall request timeout is set: archive bodies can be large and are
/// streamed to disk.
pub fn create_http_client() -> Result<Client, String> {
    Client::builder()
        .user_agent(user_agent())
        .connect_timeout(CONNECT_TIMEOUT)
        .tcp_nodelay(true)
        .build()
        .map_err(|e| format!("Failed to build HTTP client: {}", e))
}

/// Issue a HEAD request and capture the remote last-modified marker.
pub async fn fetch_remote_metadata(client: &Client, url: &str) -> LauncherResult<FreshnessRecord> {
    let response = client
        .head(url)
        .send()
        .await
        .map_err(|e| LauncherError::Provisioning {
            url: url.to_string(),
            message: e.to_string(),
        })?;

    let last_modified = response
        .headers()
        .get(LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    debug!(
        "Remote metadata for {}: status={}, last-modified={:?}",
        url,
        response.status(),
        last_modified
    );

    Ok(FreshnessRecord { last_modified })
}

/// Stream a remote file to `path`.
pub async fn download_file(
    client: &Client,
    url: &str,
    path: &Path,
    progress: Option<&ProgressCallback>,
) -> LauncherResult<()> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| LauncherError::Download {
            message: format!("Failed to download {}: {}", url, e),
        })?;

    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        return Err(LauncherError::Download {
            message: format!("Download failed with status {}", status.as_u16()),
        });
    }

    let total_size = response.content_length().unwrap_or(0);
    let mut downloaded: u64 = 0;

    let mut file = fs::File::create(path).await?;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| LauncherError::Download {
            message: format!("Failed to read chunk: {}", e),
        })?;

        file.write_all(&chunk).await?;

        downloaded += chunk.len() as u64;

        if let Some(cb) = progress {
            cb(downloaded, total_size);
        }
    }

    file.flush().await?;
    file.sync_all().await?;

    // Log download size for large files
    if downloaded > 10 * 1024 * 1024 {
        info!("Downloaded {:.1} MB", downloaded as f64 / (1024.0 * 1024.0));
    }

    Ok(())
}
