//! Publishing injected archives to a file host.
//!
//! [`Publisher`] is the capability the pipeline depends on.
//! [`PixeldrainPublisher`] uploads to a Pixeldrain-compatible API, or runs
//! dry when no API key is configured.

use std::future::Future;
use std::path::Path;

use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;
use tracing::{info, instrument, warn};

use tweakforge_shared::{PublisherSettings, Result, TweakforgeError};

/// User-Agent string for upload requests.
const USER_AGENT: &str = concat!("TweakForge/", env!("CARGO_PKG_VERSION"));

/// Read size used when hashing the archive.
const DIGEST_CHUNK: usize = 64 * 1024;

/// Identifier used for the placeholder link returned in dry-run mode.
pub const DRY_RUN_FILE_ID: &str = "EXAMPLE";

/// Uploads a file and returns its public URL.
pub trait Publisher: Send + Sync {
    fn publish(
        &self,
        path: &Path,
        display_name: &str,
    ) -> impl Future<Output = Result<String>> + Send;
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    id: String,
}

/// Pixeldrain upload backend.
pub struct PixeldrainPublisher {
    client: Client,
    settings: PublisherSettings,
}

impl PixeldrainPublisher {
    pub fn new(settings: PublisherSettings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| TweakforgeError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, settings })
    }

    /// Whether uploads are skipped for lack of an API key.
    pub fn is_dry_run(&self) -> bool {
        self.settings.api_key.is_none()
    }

    fn public_url(&self, file_id: &str) -> String {
        format!("{}/u/{file_id}", self.settings.public_base.trim_end_matches('/'))
    }
}

impl Publisher for PixeldrainPublisher {
    #[instrument(skip_all, fields(name = %display_name))]
    async fn publish(&self, path: &Path, display_name: &str) -> Result<String> {
        let Some(api_key) = &self.settings.api_key else {
            warn!("skipping upload (no API key), returning placeholder link");
            return Ok(self.public_url(DRY_RUN_FILE_ID));
        };

        let (len, sha256) = file_digest(path).await?;
        info!(bytes = len, %sha256, "uploading archive");

        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| TweakforgeError::io(path, e))?;
        let body = Body::wrap_stream(ReaderStream::new(file));
        let part = Part::stream_with_length(body, len)
            .file_name(display_name.to_string())
            .mime_str("application/octet-stream")
            .map_err(|e| TweakforgeError::publish(format!("invalid upload part: {e}")))?;
        let form = Form::new().part("file", part);

        let url = format!("{}/api/file", self.settings.endpoint.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .basic_auth("", Some(api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| TweakforgeError::publish(format!("{url}: {e}")))?;

        let status = response.status();
        if status != reqwest::StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            return Err(TweakforgeError::publish(format!(
                "upload rejected with HTTP {status}: {}",
                body.trim()
            )));
        }

        let uploaded: UploadResponse = response
            .json()
            .await
            .map_err(|e| TweakforgeError::publish(format!("unreadable upload response: {e}")))?;

        let link = self.public_url(&uploaded.id);
        info!(%link, "upload complete");
        Ok(link)
    }
}

/// Size and hex SHA-256 of the file at `path`, read in fixed-size chunks.
async fn file_digest(path: &Path) -> Result<(u64, String)> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| TweakforgeError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; DIGEST_CHUNK];
    let mut len = 0u64;
    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| TweakforgeError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        len += n as u64;
    }
    Ok((len, format!("{:x}", hasher.finalize())))
}
