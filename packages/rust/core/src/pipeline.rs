//! Catalog pipeline: for each app, source check → gate → fetch → inject → publish.
//!
//! Apps are processed strictly one after another in catalog order, sharing a
//! single [`BuildContext`] that is reset after every app that reached the
//! fetch stage. A failure in one app is reported and the batch moves on.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, error, info, instrument, warn};

use tweakforge_catalog::Catalog;
use tweakforge_fetcher::{
    AgentConnector, ArtifactFetcher, BridgeConnector, BuildContext, Downloader,
};
use tweakforge_injector::{CommandInjector, Injector};
use tweakforge_publisher::{PixeldrainPublisher, Publisher};
use tweakforge_resolver::AssetResolver;
use tweakforge_shared::{App, ResolvedAsset, Result, RunConfig, TweakSpec, TweakforgeError};

use crate::gate::{self, GateDecision};
use crate::report::{AppOutcome, AppReport, BuildStage, RunSummary, SkipReason};

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called before an app is examined (`current` is 1-based).
    fn app_started(&self, name: &str, current: usize, total: usize);
    /// Called when entering a new phase of the current app.
    fn phase(&self, name: &str);
    /// Called once the app's outcome is known.
    fn app_finished(&self, report: &AppReport);
    /// Called when the whole catalog has been processed.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn app_started(&self, _name: &str, _current: usize, _total: usize) {}
    fn phase(&self, _name: &str) {}
    fn app_finished(&self, _report: &AppReport) {}
    fn done(&self, _summary: &RunSummary) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineOptions {
    /// Build every app with a source regardless of release availability.
    pub force: bool,
    /// Only count releases whose tag differs from the recorded one, and
    /// record tags after a successful publish.
    pub track_versions: bool,
}

/// What a run would do for one app, as reported by [`Pipeline::plan_catalog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanAction {
    Build(GateDecision),
    Skip(SkipReason),
}

#[derive(Debug, Clone)]
pub struct AppPlan {
    pub name: String,
    pub action: PlanAction,
    /// Tweaks that resolved to an asset, out of `tweaks_total`.
    pub tweaks_available: usize,
    pub tweaks_total: usize,
}

/// Outcome of one app plus what the run loop needs to apply it.
struct Processed {
    outcome: AppOutcome,
    /// Release tags of the tweaks that went into the build.
    versions: BTreeMap<String, String>,
    touched_workdir: bool,
}

impl Processed {
    fn untouched(outcome: AppOutcome) -> Self {
        Self {
            outcome,
            versions: BTreeMap::new(),
            touched_workdir: false,
        }
    }
}

fn failed(stage: BuildStage, e: TweakforgeError) -> AppOutcome {
    error!(%stage, error = %e, "build failed");
    AppOutcome::Failed {
        stage,
        error: e.to_string(),
    }
}

/// The build pipeline, generic over its external capabilities.
pub struct Pipeline<A: AgentConnector, I: Injector, P: Publisher> {
    resolver: AssetResolver,
    fetcher: ArtifactFetcher<A>,
    injector: I,
    publisher: P,
    options: PipelineOptions,
}

impl Pipeline<BridgeConnector, CommandInjector, PixeldrainPublisher> {
    /// Wire up the production backends from resolved configuration.
    pub fn from_config(config: &RunConfig) -> Result<Self> {
        let resolver = AssetResolver::new(&config.github, config.tweaks_dir.clone())?;

        let agent = config.agent.clone().map(BridgeConnector::new);
        if agent.is_none() {
            debug!("decryption agent credentials not set; App Store sources will fail");
        }
        let fetcher = ArtifactFetcher::new(Downloader::new()?, agent);

        let publisher = PixeldrainPublisher::new(config.publisher.clone())?;
        if publisher.is_dry_run() {
            warn!("no publisher API key set; uploads will be skipped");
        }

        Ok(Self::new(
            resolver,
            fetcher,
            CommandInjector::new(&config.injector_command),
            publisher,
            PipelineOptions {
                force: config.force,
                track_versions: config.track_versions,
            },
        ))
    }
}

impl<A: AgentConnector, I: Injector, P: Publisher> Pipeline<A, I, P> {
    pub fn new(
        resolver: AssetResolver,
        fetcher: ArtifactFetcher<A>,
        injector: I,
        publisher: P,
        options: PipelineOptions,
    ) -> Self {
        Self {
            resolver,
            fetcher,
            injector,
            publisher,
            options,
        }
    }

    /// Load the catalog, process every app, and write the catalog back.
    ///
    /// The working directory is cleared first so nothing left by an
    /// interrupted run can be mistaken for this run's output. The catalog is
    /// saved even when the run stops early on a working directory error, so
    /// links published before the failure are kept.
    pub async fn run_catalog(
        &self,
        catalog_path: &Path,
        build_dir: &Path,
        progress: &dyn ProgressReporter,
    ) -> Result<RunSummary> {
        let mut catalog = Catalog::load(catalog_path)?;
        let ctx = BuildContext::open(build_dir)?;
        ctx.reset()?;

        let result = self.run(&mut catalog, &ctx, progress).await;
        catalog.save(catalog_path)?;
        result
    }

    /// Process every app in catalog order, updating `catalog` in memory.
    ///
    /// Per-app failures are recorded in the summary. Only a working
    /// directory that cannot be reset stops the run.
    #[instrument(skip_all, fields(apps = catalog.len(), force = self.options.force))]
    pub async fn run(
        &self,
        catalog: &mut Catalog,
        ctx: &BuildContext,
        progress: &dyn ProgressReporter,
    ) -> Result<RunSummary> {
        let start = Instant::now();
        let total = catalog.len();
        let mut reports = Vec::with_capacity(total);

        info!(total, "starting catalog run");

        for index in 0..total {
            let app = catalog.apps()[index].clone();
            progress.app_started(&app.name, index + 1, total);

            let processed = self.process_app(&app, ctx, progress).await;

            if let AppOutcome::Built { download_url } = &processed.outcome {
                catalog.set_download_url(index, download_url)?;
                if self.options.track_versions {
                    catalog.record_tweak_versions(index, &processed.versions)?;
                }
            }

            let report = AppReport {
                name: app.name,
                outcome: processed.outcome,
            };
            progress.app_finished(&report);
            reports.push(report);

            if processed.touched_workdir {
                ctx.reset().inspect_err(|e| {
                    error!(error = %e, "cannot reset working directory, stopping");
                })?;
            }
        }

        let summary = RunSummary {
            reports,
            elapsed: start.elapsed(),
        };
        info!(
            built = summary.built(),
            skipped = summary.skipped(),
            failed = summary.failed(),
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "catalog run complete"
        );
        progress.done(&summary);
        Ok(summary)
    }

    /// Evaluate the source check and the gate for every app without
    /// downloading or modifying anything.
    pub async fn plan_catalog(&self, catalog: &Catalog) -> Vec<AppPlan> {
        let mut plans = Vec::with_capacity(catalog.len());

        for app in catalog.apps() {
            let tweaks_total = app.tweaks.len();
            if app.base_source().is_none() {
                plans.push(AppPlan {
                    name: app.name.clone(),
                    action: PlanAction::Skip(SkipReason::NoSource),
                    tweaks_available: 0,
                    tweaks_total,
                });
                continue;
            }

            let resolved = self.resolve_tweaks(app).await;
            let decision = self.decide(app, &resolved);
            let action = if decision.should_build() {
                PlanAction::Build(decision)
            } else {
                PlanAction::Skip(SkipReason::NoUpdates)
            };

            plans.push(AppPlan {
                name: app.name.clone(),
                action,
                tweaks_available: resolved.iter().flatten().count(),
                tweaks_total,
            });
        }

        plans
    }

    #[instrument(skip_all, fields(app = %app.name))]
    async fn process_app(
        &self,
        app: &App,
        ctx: &BuildContext,
        progress: &dyn ProgressReporter,
    ) -> Processed {
        if app.base_source().is_none() {
            warn!("no IPA source or App Store URL, skipping");
            return Processed::untouched(AppOutcome::Skipped(SkipReason::NoSource));
        }
        if app.ipa_source.is_some() && app.app_store_url.is_some() {
            warn!("both ipa_source and app_store_url set, using ipa_source");
        }

        progress.phase("Checking for updates");
        let resolved = self.resolve_tweaks(app).await;
        let decision = self.decide(app, &resolved);
        if !decision.should_build() {
            info!("no updates, skipping");
            return Processed::untouched(AppOutcome::Skipped(SkipReason::NoUpdates));
        }
        info!(?decision, "building");

        let mut versions = BTreeMap::new();
        let outcome = self.build(app, &resolved, ctx, progress, &mut versions).await;
        Processed {
            outcome,
            versions,
            touched_workdir: true,
        }
    }

    fn decide(&self, app: &App, resolved: &[Option<ResolvedAsset>]) -> GateDecision {
        gate::decide(app, resolved, self.options.force, self.options.track_versions)
    }

    /// Resolve each tweak once; the result feeds both the gate and the fetch.
    async fn resolve_tweaks(&self, app: &App) -> Vec<Option<ResolvedAsset>> {
        let mut resolved = Vec::with_capacity(app.tweaks.len());
        for spec in &app.tweaks {
            let asset = self.resolver.resolve(spec).await;
            if asset.is_none() {
                debug!(tweak = %spec.label(), "tweak did not resolve");
            }
            resolved.push(asset);
        }
        resolved
    }

    async fn build(
        &self,
        app: &App,
        resolved: &[Option<ResolvedAsset>],
        ctx: &BuildContext,
        progress: &dyn ProgressReporter,
        versions: &mut BTreeMap<String, String>,
    ) -> AppOutcome {
        progress.phase("Fetching base archive");
        let base = match self.fetcher.fetch_base(app, ctx).await {
            Ok(path) => path,
            Err(e) => return failed(BuildStage::Fetch, e),
        };

        progress.phase("Fetching tweaks");
        let mut tweak_files: Vec<PathBuf> = Vec::new();
        for (index, (spec, asset)) in app.tweaks.iter().zip(resolved).enumerate() {
            let Some(asset) = asset else {
                warn!(tweak = %spec.label(), "tweak unavailable, skipping");
                continue;
            };
            let Some(path) = self.fetcher.fetch_tweak(index, asset, ctx).await else {
                continue;
            };
            tweak_files.push(path);

            if let (TweakSpec::GithubRelease { repo, .. }, Some(tag)) = (spec, &asset.version) {
                versions.insert(repo.clone(), tag.clone());
            }
        }

        if tweak_files.is_empty() {
            warn!("no tweaks available, skipping injection");
            return AppOutcome::Skipped(SkipReason::NoTweaks);
        }

        progress.phase("Injecting tweaks");
        let output = match self
            .injector
            .inject(&base, &tweak_files, &ctx.output_path())
            .await
        {
            Ok(path) => path,
            Err(e) => return failed(BuildStage::Inject, e),
        };

        progress.phase("Publishing");
        match self.publisher.publish(&output, &app.published_file_name()).await {
            Ok(download_url) => {
                info!(%download_url, "published");
                AppOutcome::Built { download_url }
            }
            Err(e) => failed(BuildStage::Publish, e),
        }
    }
}
