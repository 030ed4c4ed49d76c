//! Application configuration for TweakForge.
//!
//! Tool config lives at `~/.tweakforge/tweakforge.toml`.
//! CLI flags override config file values, which override defaults.
//! Secrets are never stored in the file: it only names the env vars that
//! hold them, and [`RunConfig::resolve`] reads those once at startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TweakforgeError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "tweakforge.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".tweakforge";

// ---------------------------------------------------------------------------
// Config structs (matching tweakforge.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub build: BuildConfig,

    #[serde(default)]
    pub github: GithubConfig,

    #[serde(default)]
    pub injector: InjectorConfig,

    #[serde(default)]
    pub publisher: PublisherConfig,

    #[serde(default)]
    pub agent: AgentConfig,
}

/// `[paths]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Catalog document (`{"apps": [...]}`).
    #[serde(default = "default_catalog")]
    pub catalog: String,

    /// Scratch directory for a single app build.
    #[serde(default = "default_build_dir")]
    pub build_dir: String,

    /// Root that `local` tweak paths are resolved against.
    #[serde(default = "default_tweaks_dir")]
    pub tweaks_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            catalog: default_catalog(),
            build_dir: default_build_dir(),
            tweaks_dir: default_tweaks_dir(),
        }
    }
}

fn default_catalog() -> String {
    "config/apps.json".into()
}
fn default_build_dir() -> String {
    "build_temp".into()
}
fn default_tweaks_dir() -> String {
    ".".into()
}

/// `[build]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Env var that forces a rebuild of every app when set to `true`.
    #[serde(default = "default_force_env")]
    pub force_env: String,

    /// Only rebuild when a release tag differs from the one recorded in the catalog.
    #[serde(default)]
    pub track_versions: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            force_env: default_force_env(),
            track_versions: false,
        }
    }
}

fn default_force_env() -> String {
    "FORCE_UPDATE".into()
}

/// `[github]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    #[serde(default = "default_github_api")]
    pub api_base: String,

    /// Env var holding an optional API token (raises the rate limit).
    #[serde(default = "default_github_token_env")]
    pub token_env: String,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base: default_github_api(),
            token_env: default_github_token_env(),
        }
    }
}

fn default_github_api() -> String {
    "https://api.github.com".into()
}
fn default_github_token_env() -> String {
    "GITHUB_TOKEN".into()
}

/// `[injector]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectorConfig {
    /// Injection tool executable.
    #[serde(default = "default_injector_command")]
    pub command: String,
}

impl Default for InjectorConfig {
    fn default() -> Self {
        Self {
            command: default_injector_command(),
        }
    }
}

fn default_injector_command() -> String {
    "azule".into()
}

/// `[publisher]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Upload API origin.
    #[serde(default = "default_pixeldrain")]
    pub endpoint: String,

    /// Origin used to build public `/u/<id>` links.
    #[serde(default = "default_pixeldrain")]
    pub public_base: String,

    /// Name of the env var holding the API key.
    #[serde(default = "default_publisher_key_env")]
    pub api_key_env: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            endpoint: default_pixeldrain(),
            public_base: default_pixeldrain(),
            api_key_env: default_publisher_key_env(),
        }
    }
}

fn default_pixeldrain() -> String {
    "https://pixeldrain.com".into()
}
fn default_publisher_key_env() -> String {
    "PIXELDRAIN_API_KEY".into()
}

/// `[agent]` section: remote decryption agent bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_bridge_cmd")]
    pub bridge_cmd: String,

    #[serde(default = "default_bridge_script")]
    pub bridge_script: String,

    /// Chat peer the App Store link is sent to.
    #[serde(default = "default_bot_username")]
    pub bot_username: String,

    /// Overall ceiling for one acquisition, in seconds.
    #[serde(default = "default_agent_timeout")]
    pub timeout_secs: u64,

    /// Maximum number of intermediate "processing" messages tolerated.
    #[serde(default = "default_agent_max_messages")]
    pub max_messages: u32,

    #[serde(default = "default_api_id_env")]
    pub api_id_env: String,

    #[serde(default = "default_api_hash_env")]
    pub api_hash_env: String,

    #[serde(default = "default_session_env")]
    pub session_env: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bridge_cmd: default_bridge_cmd(),
            bridge_script: default_bridge_script(),
            bot_username: default_bot_username(),
            timeout_secs: default_agent_timeout(),
            max_messages: default_agent_max_messages(),
            api_id_env: default_api_id_env(),
            api_hash_env: default_api_hash_env(),
            session_env: default_session_env(),
        }
    }
}

fn default_bridge_cmd() -> String {
    "python3".into()
}
fn default_bridge_script() -> String {
    "scripts/decrypt_bridge.py".into()
}
fn default_bot_username() -> String {
    "@fastdecryptbot".into()
}
fn default_agent_timeout() -> u64 {
    300
}
fn default_agent_max_messages() -> u32 {
    64
}
fn default_api_id_env() -> String {
    "TELEGRAM_API_ID".into()
}
fn default_api_hash_env() -> String {
    "TELEGRAM_API_HASH".into()
}
fn default_session_env() -> String {
    "TELEGRAM_SESSION".into()
}

// ---------------------------------------------------------------------------
// Run config (runtime, merged from config + env + CLI flags)
// ---------------------------------------------------------------------------

/// CLI flags that override the config file.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub catalog: Option<PathBuf>,
    pub build_dir: Option<PathBuf>,
    pub force: bool,
}

/// Resolved GitHub settings.
#[derive(Debug, Clone)]
pub struct GithubSettings {
    pub api_base: String,
    pub token: Option<String>,
}

/// Resolved publisher settings. `api_key: None` means dry run.
#[derive(Debug, Clone)]
pub struct PublisherSettings {
    pub endpoint: String,
    pub public_base: String,
    pub api_key: Option<String>,
}

/// Chat-session credentials forwarded to the agent bridge.
#[derive(Clone)]
pub struct AgentCredentials {
    pub api_id: String,
    pub api_hash: String,
    pub session: String,
}

impl std::fmt::Debug for AgentCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentCredentials")
            .field("api_id", &self.api_id)
            .finish_non_exhaustive()
    }
}

/// Resolved agent settings; only present when all credentials are set.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub bridge_cmd: String,
    pub bridge_script: String,
    pub bot_username: String,
    pub timeout: Duration,
    pub max_messages: u32,
    pub credentials: AgentCredentials,
}

/// Everything a pipeline run needs, read once at startup.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub catalog_path: PathBuf,
    pub build_dir: PathBuf,
    pub tweaks_dir: PathBuf,
    pub force: bool,
    pub track_versions: bool,
    pub github: GithubSettings,
    pub injector_command: String,
    pub publisher: PublisherSettings,
    /// `None` disables App Store acquisition.
    pub agent: Option<AgentSettings>,
}

impl RunConfig {
    /// Merge config file, CLI overrides and the process environment.
    pub fn resolve(config: &AppConfig, overrides: &RunOverrides) -> Self {
        Self::resolve_with(config, overrides, |name| std::env::var(name).ok())
    }

    /// Like [`RunConfig::resolve`] with an explicit env lookup.
    pub fn resolve_with(
        config: &AppConfig,
        overrides: &RunOverrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let non_empty = |name: &str| env(name).filter(|v| !v.trim().is_empty());

        let force = overrides.force
            || env(&config.build.force_env).is_some_and(|v| v.trim() == "true");

        let credentials = match (
            non_empty(&config.agent.api_id_env),
            non_empty(&config.agent.api_hash_env),
            non_empty(&config.agent.session_env),
        ) {
            (Some(api_id), Some(api_hash), Some(session)) => Some(AgentCredentials {
                api_id,
                api_hash,
                session,
            }),
            _ => None,
        };

        let agent = credentials.map(|credentials| AgentSettings {
            bridge_cmd: config.agent.bridge_cmd.clone(),
            bridge_script: config.agent.bridge_script.clone(),
            bot_username: config.agent.bot_username.clone(),
            timeout: Duration::from_secs(config.agent.timeout_secs),
            max_messages: config.agent.max_messages,
            credentials,
        });

        Self {
            catalog_path: overrides
                .catalog
                .clone()
                .unwrap_or_else(|| PathBuf::from(&config.paths.catalog)),
            build_dir: overrides
                .build_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(&config.paths.build_dir)),
            tweaks_dir: PathBuf::from(&config.paths.tweaks_dir),
            force,
            track_versions: config.build.track_versions,
            github: GithubSettings {
                api_base: config.github.api_base.trim_end_matches('/').to_string(),
                token: non_empty(&config.github.token_env),
            },
            injector_command: config.injector.command.clone(),
            publisher: PublisherSettings {
                endpoint: config.publisher.endpoint.trim_end_matches('/').to_string(),
                public_base: config.publisher.public_base.trim_end_matches('/').to_string(),
                api_key: non_empty(&config.publisher.api_key_env),
            },
            agent,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.tweakforge/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| TweakforgeError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.tweakforge/tweakforge.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| TweakforgeError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| TweakforgeError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| TweakforgeError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| TweakforgeError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| TweakforgeError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
