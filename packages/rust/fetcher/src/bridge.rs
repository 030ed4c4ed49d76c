//! Agent bridge subprocess.
//!
//! The chat session itself lives in a helper process (the bridge) that owns
//! the messaging client. We talk to it over a JSON-lines protocol on
//! stdin/stdout:
//!
//! ```text
//! bridge → {"type":"ready"}
//! us     → {"type":"send","peer":"@bot","text":"https://apps.apple.com/..."}
//! bridge → {"type":"message","text":"Processing...","attachment":null}
//! bridge → {"type":"message","text":"Foo 1.0","attachment":"/abs/path/Foo.ipa"}
//! bridge → {"type":"error","error":"session expired"}
//! us     → {"type":"shutdown"}
//! ```

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use tweakforge_shared::{AgentSettings, Result, TweakforgeError};

use crate::agent::{AgentConnector, AgentLimits, AgentMessage, Conversation};

/// How long to wait for the bridge to exit after `shutdown`.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Protocol types
// ---------------------------------------------------------------------------

#[derive(Debug, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BridgeRequest<'a> {
    Send { peer: &'a str, text: &'a str },
    Shutdown,
}

#[derive(Debug, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BridgeEvent {
    Ready,
    Message {
        text: String,
        #[serde(default)]
        attachment: Option<PathBuf>,
    },
    Error {
        error: String,
    },
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Spawns a [`BridgeConversation`] per acquisition.
#[derive(Debug, Clone)]
pub struct BridgeConnector {
    settings: AgentSettings,
}

impl BridgeConnector {
    pub fn new(settings: AgentSettings) -> Self {
        Self { settings }
    }
}

impl AgentConnector for BridgeConnector {
    type Conversation = BridgeConversation;

    async fn connect(&self, download_dir: &Path) -> Result<BridgeConversation> {
        BridgeConversation::spawn(&self.settings, download_dir).await
    }

    fn limits(&self) -> AgentLimits {
        AgentLimits::from(&self.settings)
    }
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// Handle to a running bridge process.
pub struct BridgeConversation {
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
    peer: String,
}

impl BridgeConversation {
    /// Spawn the bridge and wait for `ready`.
    ///
    /// The wait is unbounded here; callers race it against the acquisition
    /// deadline. Dropping the future kills the process.
    pub async fn spawn(settings: &AgentSettings, download_dir: &Path) -> Result<Self> {
        info!(
            cmd = %settings.bridge_cmd,
            script = %settings.bridge_script,
            "spawning agent bridge"
        );

        let creds = &settings.credentials;
        let mut child = Command::new(&settings.bridge_cmd)
            .arg(&settings.bridge_script)
            .arg("--download-dir")
            .arg(download_dir)
            .env("TELEGRAM_API_ID", &creds.api_id)
            .env("TELEGRAM_API_HASH", &creds.api_hash)
            .env("TELEGRAM_SESSION", &creds.session)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                TweakforgeError::fetch(format!(
                    "failed to spawn agent bridge: {e}. Is `{}` installed?",
                    settings.bridge_cmd
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TweakforgeError::fetch("failed to capture bridge stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TweakforgeError::fetch("failed to capture bridge stdout"))?;

        let mut conversation = Self {
            child,
            stdin,
            lines: BufReader::new(stdout).lines(),
            peer: settings.bot_username.clone(),
        };

        conversation.wait_for_ready().await?;
        Ok(conversation)
    }

    async fn wait_for_ready(&mut self) -> Result<()> {
        match self.read_event().await? {
            BridgeEvent::Ready => {
                info!("agent bridge is ready");
                Ok(())
            }
            BridgeEvent::Error { error } => {
                Err(TweakforgeError::fetch(format!("agent bridge failed to start: {error}")))
            }
            other => Err(TweakforgeError::fetch(format!(
                "expected ready from agent bridge, got {other:?}"
            ))),
        }
    }

    async fn read_event(&mut self) -> Result<BridgeEvent> {
        let line = self
            .lines
            .next_line()
            .await
            .map_err(|e| TweakforgeError::fetch(format!("bridge read error: {e}")))?
            .ok_or_else(|| TweakforgeError::fetch("agent bridge closed its output"))?;

        serde_json::from_str(line.trim()).map_err(|e| {
            TweakforgeError::fetch(format!("invalid bridge message: {e} (got: {line})"))
        })
    }

    async fn write_request(&mut self, request: &BridgeRequest<'_>) -> Result<()> {
        let json = serde_json::to_string(request)
            .map_err(|e| TweakforgeError::fetch(format!("failed to serialize request: {e}")))?;

        self.stdin
            .write_all(format!("{json}\n").as_bytes())
            .await
            .map_err(|e| TweakforgeError::fetch(format!("failed to write to bridge stdin: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| TweakforgeError::fetch(format!("failed to flush bridge stdin: {e}")))
    }
}

impl Conversation for BridgeConversation {
    async fn send(&mut self, text: &str) -> Result<()> {
        let peer = self.peer.clone();
        self.write_request(&BridgeRequest::Send { peer: &peer, text }).await
    }

    async fn next_message(&mut self) -> Result<AgentMessage> {
        loop {
            match self.read_event().await? {
                BridgeEvent::Message { text, attachment } => {
                    return Ok(AgentMessage { text, attachment });
                }
                BridgeEvent::Error { error } => {
                    return Err(TweakforgeError::fetch(format!("agent error: {error}")));
                }
                BridgeEvent::Ready => debug!("ignoring duplicate ready"),
            }
        }
    }

    async fn close(mut self) -> Result<()> {
        if let Err(e) = self.write_request(&BridgeRequest::Shutdown).await {
            debug!(error = %e, "bridge already gone");
        }

        match tokio::time::timeout(SHUTDOWN_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(%status, "agent bridge exited");
                Ok(())
            }
            Ok(Err(e)) => Err(TweakforgeError::fetch(format!("failed to wait for bridge: {e}"))),
            Err(_) => {
                warn!("agent bridge did not exit, killing it");
                self.child
                    .kill()
                    .await
                    .map_err(|e| TweakforgeError::fetch(format!("failed to kill bridge: {e}")))
            }
        }
    }
}
