//! Core domain types for TweakForge catalogs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

/// Extension used for tweak files whose source name carries none.
pub const DEFAULT_TWEAK_EXTENSION: &str = "deb";

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

/// A single managed application in the catalog (`apps[]` entry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct App {
    /// Display name, also used for the published file name.
    pub name: String,
    /// Direct download URL of an already-decrypted base archive.
    #[serde(
        default,
        deserialize_with = "optional_url",
        skip_serializing_if = "Option::is_none"
    )]
    pub ipa_source: Option<Url>,
    /// App Store link handed to the remote decryption agent.
    #[serde(
        default,
        deserialize_with = "optional_url",
        skip_serializing_if = "Option::is_none"
    )]
    pub app_store_url: Option<Url>,
    /// Tweaks to inject, in injection order.
    #[serde(default)]
    pub tweaks: Vec<TweakSpec>,
    /// Public link of the last published build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    /// Last injected release tag per GitHub repository (version tracking only).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tweak_versions: BTreeMap<String, String>,
}

/// Where the base archive for an [`App`] comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseSource {
    /// Plain HTTP download.
    Direct(Url),
    /// Acquired through the remote decryption agent.
    AppStore(Url),
}

impl App {
    /// The base archive source, preferring `ipa_source` when both are set.
    pub fn base_source(&self) -> Option<BaseSource> {
        match (&self.ipa_source, &self.app_store_url) {
            (Some(url), _) => Some(BaseSource::Direct(url.clone())),
            (None, Some(url)) => Some(BaseSource::AppStore(url.clone())),
            (None, None) => None,
        }
    }

    /// File name used when publishing this app's injected archive.
    pub fn published_file_name(&self) -> String {
        format!("{}_Tweaked.ipa", self.name)
    }
}

/// Treat `""` and `null` as an absent URL, like an unset field.
fn optional_url<'de, D>(deserializer: D) -> std::result::Result<Option<Url>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => Url::parse(s)
            .map(Some)
            .map_err(|e| serde::de::Error::custom(format!("invalid URL '{s}': {e}"))),
    }
}

// ---------------------------------------------------------------------------
// TweakSpec
// ---------------------------------------------------------------------------

/// How to obtain one modification file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TweakSpec {
    /// Latest release of a GitHub repository; first asset whose name contains `asset_regex`.
    GithubRelease {
        repo: String,
        /// Plain substring matched against asset names (not a regex, despite the key).
        asset_regex: String,
    },
    /// A fixed download URL.
    Direct { url: Url },
    /// A file bundled next to the catalog.
    Local { path: PathBuf },
}

impl TweakSpec {
    /// Short human-readable identifier for logs.
    pub fn label(&self) -> String {
        match self {
            Self::GithubRelease { repo, .. } => repo.clone(),
            Self::Direct { url } => url.to_string(),
            Self::Local { path } => path.display().to_string(),
        }
    }

    /// Whether this tweak takes part in the decide-to-build gate.
    pub fn is_release(&self) -> bool {
        matches!(self, Self::GithubRelease { .. })
    }
}

// ---------------------------------------------------------------------------
// ResolvedAsset
// ---------------------------------------------------------------------------

/// Concrete location of a tweak after resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetLocation {
    Remote(Url),
    Local(PathBuf),
}

/// A resolved tweak: where to get it and, for releases, which tag it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAsset {
    pub location: AssetLocation,
    pub version: Option<String>,
}

impl ResolvedAsset {
    pub fn remote(url: Url, version: Option<String>) -> Self {
        Self {
            location: AssetLocation::Remote(url),
            version,
        }
    }

    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            location: AssetLocation::Local(path.into()),
            version: None,
        }
    }

    /// Extension of the underlying file name, defaulting to `deb`.
    pub fn file_extension(&self) -> String {
        let name = match &self.location {
            AssetLocation::Remote(url) => url
                .path_segments()
                .and_then(|mut segs| segs.next_back())
                .unwrap_or_default()
                .to_string(),
            AssetLocation::Local(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };

        Path::new(&name)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| DEFAULT_TWEAK_EXTENSION.to_string())
    }
}
