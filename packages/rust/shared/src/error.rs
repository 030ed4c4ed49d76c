//! Error types for TweakForge.
//!
//! Library crates use [`TweakforgeError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all TweakForge operations.
#[derive(Debug, thiserror::Error)]
pub enum TweakforgeError {
    /// Catalog or configuration loading/validation error. Batch-fatal.
    #[error("config error: {message}")]
    Config { message: String },

    /// Base archive could not be obtained (HTTP failure, agent error or timeout).
    #[error("fetch error: {message}")]
    Fetch { message: String },

    /// The injection tool failed or could not be started.
    #[error("injection error: {message}")]
    Injection { message: String },

    /// Upload to the hosting backend failed.
    #[error("publish error: {message}")]
    Publish { message: String },

    /// Low-level network/HTTP error.
    #[error("network error: {0}")]
    Network(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The build working directory could not be reset.
    #[error("workspace error: {0}")]
    Workspace(String),

    /// Data validation error (bad catalog entry, invalid URL, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, TweakforgeError>;

impl TweakforgeError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a fetch error from any displayable message.
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch {
            message: msg.into(),
        }
    }

    /// Create an injection error from any displayable message.
    pub fn injection(msg: impl Into<String>) -> Self {
        Self::Injection {
            message: msg.into(),
        }
    }

    /// Create a publish error from any displayable message.
    pub fn publish(msg: impl Into<String>) -> Self {
        Self::Publish {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = TweakforgeError::config("catalog missing `apps`");
        assert_eq!(err.to_string(), "config error: catalog missing `apps`");

        let err = TweakforgeError::fetch("agent did not return a file");
        assert!(err.to_string().starts_with("fetch error:"));

        let err = TweakforgeError::injection("azule exited with status 1");
        assert!(err.to_string().contains("status 1"));
    }

    #[test]
    fn io_error_carries_path() {
        let err = TweakforgeError::io(
            "/tmp/build_temp/source.ipa",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().contains("source.ipa"));
    }
}
