//! Shared types, error model, and configuration for TweakForge.
//!
//! This crate is the foundation depended on by all other TweakForge crates.
//! It provides:
//! - [`TweakforgeError`]: the unified error type
//! - Domain types ([`App`], [`TweakSpec`], [`ResolvedAsset`])
//! - Configuration ([`AppConfig`], [`RunConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AgentConfig, AgentCredentials, AgentSettings, AppConfig, BuildConfig, GithubConfig,
    GithubSettings, InjectorConfig, PathsConfig, PublisherConfig, PublisherSettings, RunConfig,
    RunOverrides, config_dir, config_file_path, init_config, load_config, load_config_from,
};
pub use error::{Result, TweakforgeError};
pub use types::{
    App, AssetLocation, BaseSource, DEFAULT_TWEAK_EXTENSION, ResolvedAsset, TweakSpec,
};
