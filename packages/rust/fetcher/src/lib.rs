//! Artifact fetching: base archives and tweak files into a [`BuildContext`].
//!
//! This crate provides:
//! - [`BuildContext`]: the per-app working directory
//! - [`Downloader`]: streaming HTTP downloads
//! - [`agent`]: the bounded remote decryption conversation
//! - [`bridge`]: the subprocess-backed [`Conversation`] used in production
//! - [`ArtifactFetcher`]: ties them together for the pipeline

pub mod agent;
pub mod bridge;
mod context;
mod download;

use std::path::PathBuf;

use tracing::{info, instrument, warn};

use tweakforge_shared::{
    App, AssetLocation, BaseSource, ResolvedAsset, Result, TweakforgeError,
};

pub use agent::{AgentConnector, AgentLimits, AgentMessage, Conversation, acquire_via_agent};
pub use bridge::{BridgeConnector, BridgeConversation};
pub use context::BuildContext;
pub use download::Downloader;

/// Fetches base archives and tweaks for one pipeline run.
pub struct ArtifactFetcher<A: AgentConnector = BridgeConnector> {
    downloader: Downloader,
    /// `None` disables App Store acquisition.
    agent: Option<A>,
}

impl<A: AgentConnector> ArtifactFetcher<A> {
    pub fn new(downloader: Downloader, agent: Option<A>) -> Self {
        Self { downloader, agent }
    }

    /// Obtain the app's base archive at [`BuildContext::base_path`].
    #[instrument(skip_all, fields(app = %app.name))]
    pub async fn fetch_base(&self, app: &App, ctx: &BuildContext) -> Result<PathBuf> {
        let dest = ctx.base_path();

        match app.base_source() {
            Some(BaseSource::Direct(url)) => {
                info!(%url, "downloading base archive");
                self.downloader
                    .download(&url, &dest)
                    .await
                    .map_err(|e| {
                        TweakforgeError::fetch(format!("base archive download failed: {e}"))
                    })?;
            }
            Some(BaseSource::AppStore(url)) => {
                let connector = self.agent.as_ref().ok_or_else(|| {
                    TweakforgeError::fetch(
                        "app has only an App Store URL \
                         but the decryption agent is not configured",
                    )
                })?;

                // One deadline covers both connecting and the conversation.
                let limits = connector.limits();
                let deadline = limits.deadline();
                let mut conversation =
                    tokio::time::timeout_at(deadline, connector.connect(ctx.path()))
                        .await
                        .map_err(|_| {
                            TweakforgeError::fetch(format!(
                                "agent did not become ready within {}s",
                                limits.timeout.as_secs()
                            ))
                        })??;
                let acquired = acquire_via_agent(&mut conversation, &url, &limits, deadline).await;
                if let Err(e) = conversation.close().await {
                    warn!(error = %e, "agent session did not close cleanly");
                }

                let attachment = acquired?;
                download::move_file(&attachment, &dest)
                    .map_err(|e| TweakforgeError::fetch(format!("cannot move agent file: {e}")))?;
            }
            None => {
                return Err(TweakforgeError::fetch("no IPA source or App Store URL provided"));
            }
        }

        if !dest.is_file() {
            return Err(TweakforgeError::fetch("IPA file missing after download step"));
        }
        Ok(dest)
    }

    /// Place the tweak at `index` into the working directory.
    ///
    /// Returns `None` (after logging) when the file cannot be obtained; the
    /// caller drops that tweak and carries on.
    #[instrument(skip_all, fields(index = index))]
    pub async fn fetch_tweak(
        &self,
        index: usize,
        asset: &ResolvedAsset,
        ctx: &BuildContext,
    ) -> Option<PathBuf> {
        let dest = ctx.tweak_path(index, &asset.file_extension());

        match &asset.location {
            AssetLocation::Remote(url) => match self.downloader.download(url, &dest).await {
                Ok(bytes) => {
                    info!(%url, bytes, "tweak downloaded");
                    Some(dest)
                }
                Err(e) => {
                    warn!(%url, error = %e, "tweak download failed, skipping");
                    None
                }
            },
            AssetLocation::Local(path) => {
                if !path.is_file() {
                    warn!(path = %path.display(), "local tweak not found, skipping");
                    return None;
                }
                match std::fs::copy(path, &dest) {
                    Ok(_) => {
                        info!(path = %path.display(), "using local tweak");
                        Some(dest)
                    }
                    Err(e) => {
                        warn!(
                            path = %path.display(),
                            error = %e,
                            "cannot copy local tweak, skipping"
                        );
                        None
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::agent::tests::ScriptedConversation;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Hands out one scripted conversation; the "attachment" is written by the test.
    struct ScriptedConnector {
        replies: std::sync::Mutex<Option<Vec<AgentMessage>>>,
        /// Never finish connecting.
        stall: bool,
    }

    impl ScriptedConnector {
        fn new(replies: Vec<AgentMessage>) -> Self {
            Self {
                replies: std::sync::Mutex::new(Some(replies)),
                stall: false,
            }
        }
    }

    impl AgentConnector for ScriptedConnector {
        type Conversation = ScriptedConversation;

        async fn connect(&self, _download_dir: &Path) -> Result<ScriptedConversation> {
            if self.stall {
                std::future::pending::<()>().await;
            }
            let replies = self.replies.lock().unwrap().take().unwrap_or_default();
            Ok(ScriptedConversation::new(replies))
        }

        fn limits(&self) -> AgentLimits {
            AgentLimits {
                timeout: std::time::Duration::from_millis(200),
                max_messages: 4,
            }
        }
    }

    fn app(json: &str) -> App {
        serde_json::from_str(json).unwrap()
    }

    fn http_only() -> ArtifactFetcher<ScriptedConnector> {
        ArtifactFetcher::new(Downloader::new().unwrap(), None)
    }

    #[tokio::test]
    async fn base_from_ipa_source() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/f.ipa"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PK-ipa".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let ctx = BuildContext::open(dir.path().join("build")).unwrap();
        let foo = app(&format!(r#"{{"name":"Foo","ipa_source":"{}/f.ipa"}}"#, server.uri()));

        let base = http_only().fetch_base(&foo, &ctx).await.unwrap();
        assert_eq!(base, ctx.base_path());
        assert_eq!(std::fs::read(base).unwrap(), b"PK-ipa");
    }

    #[tokio::test]
    async fn base_http_failure_is_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let ctx = BuildContext::open(dir.path().join("build")).unwrap();
        let foo = app(&format!(r#"{{"name":"Foo","ipa_source":"{}/f.ipa"}}"#, server.uri()));

        let err = http_only().fetch_base(&foo, &ctx).await.unwrap_err();
        assert!(matches!(err, TweakforgeError::Fetch { .. }));
    }

    #[tokio::test]
    async fn base_without_source_is_fetch_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = BuildContext::open(dir.path().join("build")).unwrap();
        let err = http_only()
            .fetch_base(&app(r#"{"name":"Foo"}"#), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no IPA source"));
    }

    #[tokio::test]
    async fn app_store_without_agent_is_fetch_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = BuildContext::open(dir.path().join("build")).unwrap();
        let foo = app(r#"{"name":"Foo","app_store_url":"https://apps.apple.com/app/id1"}"#);

        let err = http_only().fetch_base(&foo, &ctx).await.unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }

    #[tokio::test]
    async fn app_store_attachment_becomes_base() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = BuildContext::open(dir.path().join("build")).unwrap();
        let attachment = ctx.path().join("Foo_1.0_decrypted.ipa");
        std::fs::write(&attachment, b"decrypted").unwrap();

        let connector = ScriptedConnector::new(vec![
            AgentMessage::text("Processing your request..."),
            AgentMessage::with_attachment("Foo 1.0", &attachment),
        ]);
        let fetcher = ArtifactFetcher::new(Downloader::new().unwrap(), Some(connector));
        let foo = app(r#"{"name":"Foo","app_store_url":"https://apps.apple.com/app/id1"}"#);

        let base = fetcher.fetch_base(&foo, &ctx).await.unwrap();
        assert_eq!(std::fs::read(base).unwrap(), b"decrypted");
        assert!(!attachment.exists());
    }

    #[tokio::test]
    async fn app_store_processing_forever_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = BuildContext::open(dir.path().join("build")).unwrap();
        let connector = ScriptedConnector::new(vec![AgentMessage::text("Processing...")]);
        let fetcher = ArtifactFetcher::new(Downloader::new().unwrap(), Some(connector));
        let foo = app(r#"{"name":"Foo","app_store_url":"https://apps.apple.com/app/id1"}"#);

        let err = fetcher.fetch_base(&foo, &ctx).await.unwrap_err();
        assert!(matches!(err, TweakforgeError::Fetch { .. }));
        assert!(!ctx.base_path().exists());
    }

    #[tokio::test]
    async fn stalled_connect_is_bounded_by_agent_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = BuildContext::open(dir.path().join("build")).unwrap();
        let mut connector = ScriptedConnector::new(Vec::new());
        connector.stall = true;
        let fetcher = ArtifactFetcher::new(Downloader::new().unwrap(), Some(connector));
        let foo = app(r#"{"name":"Foo","app_store_url":"https://apps.apple.com/app/id1"}"#);

        let err = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            fetcher.fetch_base(&foo, &ctx),
        )
        .await
        .expect("connect is bounded")
        .unwrap_err();
        assert!(err.to_string().contains("did not become ready"), "{err}");
    }

    #[tokio::test]
    async fn tweaks_get_indexed_names() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/t.deb"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"deb".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let ctx = BuildContext::open(dir.path().join("build")).unwrap();
        let local = dir.path().join("libfoo.dylib");
        std::fs::write(&local, b"dylib").unwrap();

        let fetcher = http_only();
        let url = Url::parse(&format!("{}/t.deb", server.uri())).unwrap();
        let remote = ResolvedAsset::remote(url, None);

        let first = fetcher.fetch_tweak(0, &remote, &ctx).await.unwrap();
        let second = fetcher
            .fetch_tweak(1, &ResolvedAsset::local(&local), &ctx)
            .await
            .unwrap();

        assert_eq!(first, ctx.tweak_path(0, "deb"));
        assert_eq!(second, ctx.tweak_path(1, "dylib"));
        assert_eq!(std::fs::read(second).unwrap(), b"dylib");
        assert!(local.exists());
    }

    #[tokio::test]
    async fn missing_tweaks_are_soft_misses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let ctx = BuildContext::open(dir.path().join("build")).unwrap();
        let fetcher = http_only();

        let missing_local = ResolvedAsset::local(dir.path().join("debs/none.deb"));
        assert!(fetcher.fetch_tweak(0, &missing_local, &ctx).await.is_none());

        let url = Url::parse(&format!("{}/t.deb", server.uri())).unwrap();
        let broken_remote = ResolvedAsset::remote(url, None);
        assert!(fetcher.fetch_tweak(1, &broken_remote, &ctx).await.is_none());

        assert_eq!(std::fs::read_dir(ctx.path()).unwrap().count(), 0);
    }
}
