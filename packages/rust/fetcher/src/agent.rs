//! Remote decryption agent conversation.
//!
//! The agent is a chat peer: we send it an App Store link, it answers with
//! zero or more status messages ("Processing...", "You are #3 in queue") and
//! finally one message that must carry the decrypted archive as an attachment.
//!
//! [`acquire_via_agent`] drives that exchange against any [`Conversation`]
//! with a hard deadline and a cap on status messages, so a stuck agent
//! surfaces as a fetch error instead of blocking the batch. The deadline is
//! taken once per acquisition and also bounds connecting to the agent.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, instrument};
use url::Url;

use tweakforge_shared::{AgentSettings, Result, TweakforgeError};

/// One message received from the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentMessage {
    pub text: String,
    /// Local path of the downloaded attachment, if the message had one.
    pub attachment: Option<PathBuf>,
}

impl AgentMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachment: None,
        }
    }

    pub fn with_attachment(text: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            text: text.into(),
            attachment: Some(path.into()),
        }
    }

    /// Status updates are not final; another message will follow.
    pub fn is_intermediate(&self) -> bool {
        let lower = self.text.to_lowercase();
        lower.contains("processing") || lower.contains("queue")
    }
}

/// An open request/response session with the agent.
pub trait Conversation: Send {
    /// Send a text message to the agent.
    fn send(&mut self, text: &str) -> impl Future<Output = Result<()>> + Send;

    /// Wait for the next message. Must be cancellation-safe.
    fn next_message(&mut self) -> impl Future<Output = Result<AgentMessage>> + Send;

    /// End the session.
    fn close(self) -> impl Future<Output = Result<()>> + Send
    where
        Self: Sized;
}

/// Opens conversations; one per acquisition.
pub trait AgentConnector: Send + Sync {
    type Conversation: Conversation;

    /// Start a session whose attachments are downloaded into `download_dir`.
    fn connect(
        &self,
        download_dir: &Path,
    ) -> impl Future<Output = Result<Self::Conversation>> + Send;

    fn limits(&self) -> AgentLimits;
}

/// Bounds on a single acquisition.
#[derive(Debug, Clone, Copy)]
pub struct AgentLimits {
    /// Overall ceiling from connecting to receiving the file.
    pub timeout: Duration,
    /// Status messages tolerated before giving up.
    pub max_messages: u32,
}

impl AgentLimits {
    /// Deadline for an acquisition starting now.
    pub fn deadline(&self) -> Instant {
        Instant::now() + self.timeout
    }
}

impl From<&AgentSettings> for AgentLimits {
    fn from(settings: &AgentSettings) -> Self {
        Self {
            timeout: settings.timeout,
            max_messages: settings.max_messages,
        }
    }
}

/// Send `app_url` and wait, until `deadline`, for the final message's attachment.
#[instrument(skip_all, fields(app_url = %app_url))]
pub async fn acquire_via_agent<C: Conversation>(
    conversation: &mut C,
    app_url: &Url,
    limits: &AgentLimits,
    deadline: Instant,
) -> Result<PathBuf> {
    info!("requesting decryption");
    conversation.send(app_url.as_str()).await?;

    let mut status_messages: u32 = 0;
    loop {
        let message = tokio::time::timeout_at(deadline, conversation.next_message())
            .await
            .map_err(|_| {
                TweakforgeError::fetch(format!(
                    "agent returned no file within {}s",
                    limits.timeout.as_secs()
                ))
            })??;

        if message.is_intermediate() {
            status_messages += 1;
            info!(text = %message.text, "agent still working");
            if status_messages > limits.max_messages {
                return Err(TweakforgeError::fetch(format!(
                    "agent sent {status_messages} status messages without a file"
                )));
            }
            continue;
        }

        return match message.attachment {
            Some(path) => {
                info!(path = %path.display(), "agent returned a file");
                Ok(path)
            }
            None => Err(TweakforgeError::fetch(format!(
                "agent did not return a file: {}",
                message.text.trim()
            ))),
        };
    }
}
