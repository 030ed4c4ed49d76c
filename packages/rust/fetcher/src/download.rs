//! Streaming HTTP downloads and local copies.

use std::path::Path;

use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};
use url::Url;

use tweakforge_shared::{Result, TweakforgeError};

/// User-Agent string for download requests.
const USER_AGENT: &str = concat!("TweakForge/", env!("CARGO_PKG_VERSION"));

/// Thin wrapper over a shared HTTP client.
#[derive(Clone)]
pub struct Downloader {
    client: Client,
}

impl Downloader {
    /// Build a client that follows redirects and has no request timeout.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| TweakforgeError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Stream `url` into `dest`, chunk by chunk. Returns bytes written.
    ///
    /// A partially written file is removed on failure.
    #[instrument(skip_all, fields(url = %url, dest = %dest.display()))]
    pub async fn download(&self, url: &Url, dest: &Path) -> Result<u64> {
        let result = self.stream_to_file(url, dest).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(dest).await;
        }
        result
    }

    async fn stream_to_file(&self, url: &Url, dest: &Path) -> Result<u64> {
        let mut response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| TweakforgeError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TweakforgeError::Network(format!("{url}: HTTP {status}")));
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| TweakforgeError::io(dest, e))?;

        let mut written: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| TweakforgeError::Network(format!("{url}: failed to read body: {e}")))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| TweakforgeError::io(dest, e))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| TweakforgeError::io(dest, e))?;

        debug!(bytes = written, "download complete");
        Ok(written)
    }
}

/// Move `from` to `to`, falling back to copy + delete across filesystems.
pub(crate) fn move_file(from: &Path, to: &Path) -> Result<()> {
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    std::fs::copy(from, to).map_err(|e| TweakforgeError::io(from, e))?;
    std::fs::remove_file(from).map_err(|e| TweakforgeError::io(from, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn streams_body_to_file() {
        let server = MockServer::start().await;
        let body = vec![7u8; 256 * 1024];
        Mock::given(method("GET"))
            .and(path("/f.ipa"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("source.ipa");
        let url = Url::parse(&format!("{}/f.ipa", server.uri())).unwrap();

        let written = Downloader::new().unwrap().download(&url, &dest).await.unwrap();
        assert_eq!(written, body.len() as u64);
        assert_eq!(std::fs::read(&dest).unwrap(), body);
    }

    #[tokio::test]
    async fn error_status_leaves_no_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("source.ipa");
        let url = Url::parse(&format!("{}/f.ipa", server.uri())).unwrap();

        let err = Downloader::new().unwrap().download(&url, &dest).await.unwrap_err();
        assert!(err.to_string().contains("503"));
        assert!(!dest.exists());
    }

    #[test]
    fn move_file_renames() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("Foo_1.0_decrypted.ipa");
        let to = dir.path().join("source.ipa");
        std::fs::write(&from, b"ipa").unwrap();
        move_file(&from, &to).unwrap();
        assert!(!from.exists());
        assert_eq!(std::fs::read(&to).unwrap(), b"ipa");
    }
}
