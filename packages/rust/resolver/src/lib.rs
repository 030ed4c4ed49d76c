//! Tweak asset resolution.
//!
//! Turns a [`TweakSpec`] into a concrete [`ResolvedAsset`]:
//! - `github_release` → query the repository's latest release and pick the
//!   first asset whose name contains the configured pattern;
//! - `direct` → the URL as-is;
//! - `local` → the path joined onto the local tweak root.
//!
//! A miss is `None`, never an error: the caller drops that tweak for this run.
//! Nothing is cached; every call goes to the network.

use std::path::{Path, PathBuf};

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument, warn};
use url::Url;

use tweakforge_shared::{GithubSettings, ResolvedAsset, Result, TweakSpec, TweakforgeError};

/// User-Agent string for API requests (GitHub rejects requests without one).
const USER_AGENT: &str = concat!("TweakForge/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Release metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
    #[serde(default)]
    assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Deserialize)]
struct ReleaseAsset {
    name: String,
    browser_download_url: Url,
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Resolves tweak specs against GitHub and the local tweak root.
pub struct AssetResolver {
    client: Client,
    api_base: String,
    token: Option<String>,
    local_root: PathBuf,
}

impl AssetResolver {
    /// Create a resolver. HTTP requests carry no timeout.
    pub fn new(github: &GithubSettings, local_root: impl Into<PathBuf>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| TweakforgeError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_base: github.api_base.trim_end_matches('/').to_string(),
            token: github.token.clone(),
            local_root: local_root.into(),
        })
    }

    /// Resolve one tweak spec. `None` means "unavailable this run".
    pub async fn resolve(&self, spec: &TweakSpec) -> Option<ResolvedAsset> {
        match spec {
            TweakSpec::GithubRelease { repo, asset_regex } => self
                .latest_release_asset(repo, asset_regex)
                .await
                .map(|(url, tag)| ResolvedAsset::remote(url, Some(tag))),
            TweakSpec::Direct { url } => Some(ResolvedAsset::remote(url.clone(), None)),
            TweakSpec::Local { path } => Some(ResolvedAsset::local(self.local_path(path))),
        }
    }

    /// Path of a `local` tweak; absolute paths are kept as-is.
    pub fn local_path(&self, path: &Path) -> PathBuf {
        self.local_root.join(path)
    }

    /// Latest release of `repo`: download URL of the first asset whose name
    /// contains `pattern`, plus the release tag.
    #[instrument(skip_all, fields(repo = %repo, pattern = %pattern))]
    pub async fn latest_release_asset(&self, repo: &str, pattern: &str) -> Option<(Url, String)> {
        let url = format!("{}/repos/{repo}/releases/latest", self.api_base);

        let mut request = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "release lookup failed");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            debug!(%status, "no latest release");
            return None;
        }

        let release: Release = match response.json().await {
            Ok(release) => release,
            Err(e) => {
                warn!(error = %e, "unreadable release metadata");
                return None;
            }
        };

        let found = release
            .assets
            .into_iter()
            .find(|asset| asset.name.contains(pattern));

        match found {
            Some(asset) => {
                debug!(asset = %asset.name, tag = %release.tag_name, "matched release asset");
                Some((asset.browser_download_url, release.tag_name))
            }
            None => {
                debug!(pattern, tag = %release.tag_name, "no asset matches pattern");
                None
            }
        }
    }
}
