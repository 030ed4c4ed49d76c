//! Injection driver: merges tweak files into a base archive.
//!
//! [`Injector`] is the capability the pipeline depends on;
//! [`CommandInjector`] implements it by running an external tool with the
//! `-i <base> -o <output> -f <tweak>...` command-line contract.

use std::ffi::OsString;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info, instrument};

use tweakforge_shared::{Result, TweakforgeError};

/// Lines of tool stderr kept in the error message.
const STDERR_TAIL_LINES: usize = 12;

/// Produces an injected archive at `output` from `base` and `tweaks` (in order).
pub trait Injector: Send + Sync {
    fn inject(
        &self,
        base: &Path,
        tweaks: &[PathBuf],
        output: &Path,
    ) -> impl Future<Output = Result<PathBuf>> + Send;
}

/// Runs an external injection tool such as `azule`.
#[derive(Debug, Clone)]
pub struct CommandInjector {
    program: String,
}

impl CommandInjector {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Arguments passed to the tool, in order.
    pub fn args(base: &Path, tweaks: &[PathBuf], output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-i".into(),
            base.into(),
            "-o".into(),
            output.into(),
            "-f".into(),
        ];
        args.extend(tweaks.iter().map(|t| t.as_os_str().to_owned()));
        args
    }
}

impl Injector for CommandInjector {
    #[instrument(skip_all, fields(tool = %self.program, tweaks = tweaks.len()))]
    async fn inject(&self, base: &Path, tweaks: &[PathBuf], output: &Path) -> Result<PathBuf> {
        if tweaks.is_empty() {
            return Err(TweakforgeError::injection("no tweak files to inject"));
        }

        // The output check below must only see what this run produced.
        match tokio::fs::remove_file(output).await {
            Ok(()) => debug!(output = %output.display(), "removed stale output"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(TweakforgeError::io(output, e)),
        }

        let args = Self::args(base, tweaks, output);
        info!(args = ?args, "running injection tool");

        let result = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                TweakforgeError::injection(format!(
                    "failed to run `{}`: {e}. Is it installed?",
                    self.program
                ))
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail = stderr_tail(&stderr);
            let code = result
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            return Err(TweakforgeError::injection(format!(
                "`{}` exited with status {code}{}",
                self.program,
                if tail.is_empty() { String::new() } else { format!(": {tail}") }
            )));
        }

        if !output.is_file() {
            return Err(TweakforgeError::injection(format!(
                "`{}` succeeded but produced no {}",
                self.program,
                output.display()
            )));
        }

        info!(output = %output.display(), "injection complete");
        Ok(output.to_path_buf())
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_follow_tool_contract() {
        let args = CommandInjector::args(
            Path::new("build/source.ipa"),
            &[PathBuf::from("build/tweak_0.deb"), PathBuf::from("build/tweak_2.deb")],
            Path::new("build/injected.ipa"),
        );
        let expected = [
            "-i",
            "build/source.ipa",
            "-o",
            "build/injected.ipa",
            "-f",
            "build/tweak_0.deb",
            "build/tweak_2.deb",
        ]
        .map(OsString::from);
        assert_eq!(args, expected);
    }

    #[cfg(unix)]
    #[test]
    fn args_keep_non_utf8_paths_intact() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let tweak = PathBuf::from(OsStr::from_bytes(b"build/tweak_\xff.deb"));
        let args = CommandInjector::args(
            Path::new("build/source.ipa"),
            std::slice::from_ref(&tweak),
            Path::new("build/injected.ipa"),
        );
        assert_eq!(args[5].as_bytes(), b"build/tweak_\xff.deb");
    }

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let stderr: String = (0..20).map(|i| format!("line {i}\n")).collect();
        let tail = stderr_tail(&stderr);
        assert!(tail.starts_with("line 8"));
        assert!(tail.ends_with("line 19"));
    }

    #[tokio::test]
    async fn empty_tweak_list_never_spawns() {
        let injector = CommandInjector::new("/nonexistent/azule");
        let err = injector
            .inject(Path::new("a.ipa"), &[], Path::new("b.ipa"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no tweak files"));
    }

    #[tokio::test]
    async fn missing_tool_is_injection_error() {
        let injector = CommandInjector::new("/nonexistent/azule");
        let err = injector
            .inject(Path::new("a.ipa"), &[PathBuf::from("t.deb")], Path::new("b.ipa"))
            .await
            .unwrap_err();
        assert!(matches!(err, TweakforgeError::Injection { .. }));
    }

    #[cfg(unix)]
    fn script(dir: &Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-azule");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn zero_exit_with_output_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        // $4 is the value of -o.
        let tool = script(dir.path(), r#"cp "$2" "$4""#);
        let base = dir.path().join("source.ipa");
        let output = dir.path().join("injected.ipa");
        std::fs::write(&base, b"ipa").unwrap();

        let produced = CommandInjector::new(tool)
            .inject(&base, &[dir.path().join("tweak_0.deb")], &output)
            .await
            .unwrap();
        assert_eq!(produced, output);
        assert!(output.is_file());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_reports_status_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let tool = script(dir.path(), "echo 'bad deb' >&2; exit 3");

        let err = CommandInjector::new(tool)
            .inject(
                &dir.path().join("source.ipa"),
                &[dir.path().join("tweak_0.deb")],
                &dir.path().join("injected.ipa"),
            )
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("status 3"), "{msg}");
        assert!(msg.contains("bad deb"), "{msg}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn zero_exit_without_output_fails() {
        let dir = tempfile::tempdir().unwrap();
        let tool = script(dir.path(), "exit 0");

        let err = CommandInjector::new(tool)
            .inject(
                &dir.path().join("source.ipa"),
                &[dir.path().join("tweak_0.deb")],
                &dir.path().join("injected.ipa"),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("produced no"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stale_output_is_not_taken_as_result() {
        let dir = tempfile::tempdir().unwrap();
        let tool = script(dir.path(), "exit 0");
        let output = dir.path().join("injected.ipa");
        std::fs::write(&output, b"left over from another app").unwrap();

        let err = CommandInjector::new(tool)
            .inject(&dir.path().join("source.ipa"), &[dir.path().join("tweak_0.deb")], &output)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("produced no"), "{err}");
        assert!(!output.exists());
    }
}
