//! Per-app build working directory.

use std::path::{Path, PathBuf};

use tracing::debug;

use tweakforge_shared::{Result, TweakforgeError};

const BASE_FILE: &str = "source.ipa";
const OUTPUT_FILE: &str = "injected.ipa";

/// Scratch directory holding one app's base archive, tweaks and output.
///
/// Only one app's artifacts may live here at a time; [`BuildContext::reset`]
/// must run between apps.
#[derive(Debug)]
pub struct BuildContext {
    root: PathBuf,
}

impl BuildContext {
    /// Use `root` as the working directory, creating it if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| TweakforgeError::io(&root, e))?;
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Where the base archive lands, whatever its source.
    pub fn base_path(&self) -> PathBuf {
        self.root.join(BASE_FILE)
    }

    /// Where the injection tool writes its result.
    pub fn output_path(&self) -> PathBuf {
        self.root.join(OUTPUT_FILE)
    }

    /// Deterministic name for the tweak at `index` in the app's tweak list.
    pub fn tweak_path(&self, index: usize, extension: &str) -> PathBuf {
        self.root.join(format!("tweak_{index}.{extension}"))
    }

    /// Delete everything and recreate the empty directory.
    pub fn reset(&self) -> Result<()> {
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(TweakforgeError::Workspace(format!(
                    "cannot clear {}: {e}",
                    self.root.display()
                )));
            }
        }
        std::fs::create_dir_all(&self.root).map_err(|e| {
            TweakforgeError::Workspace(format!("cannot recreate {}: {e}", self.root.display()))
        })?;
        debug!(path = %self.root.display(), "working directory reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_layout() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = BuildContext::open(dir.path().join("build_temp")).unwrap();
        assert!(ctx.path().is_dir());
        assert!(ctx.base_path().ends_with("build_temp/source.ipa"));
        assert!(ctx.output_path().ends_with("build_temp/injected.ipa"));
        assert!(ctx.tweak_path(2, "deb").ends_with("build_temp/tweak_2.deb"));
    }

    #[test]
    fn reset_removes_nested_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = BuildContext::open(dir.path().join("build_temp")).unwrap();
        std::fs::write(ctx.base_path(), b"ipa").unwrap();
        std::fs::create_dir_all(ctx.path().join("Payload/Foo.app")).unwrap();
        std::fs::write(ctx.path().join("Payload/Foo.app/Info.plist"), b"x").unwrap();

        ctx.reset().unwrap();

        assert!(ctx.path().is_dir());
        assert_eq!(std::fs::read_dir(ctx.path()).unwrap().count(), 0);
    }

    #[test]
    fn reset_recreates_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = BuildContext::open(dir.path().join("build_temp")).unwrap();
        std::fs::remove_dir(ctx.path()).unwrap();
        ctx.reset().unwrap();
        assert!(ctx.path().is_dir());
    }
}
