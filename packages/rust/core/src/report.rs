//! Per-app outcomes and the run summary.

use std::fmt;
use std::time::Duration;

/// Why an app was passed over without producing a new archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Neither `ipa_source` nor `app_store_url` is set.
    NoSource,
    /// The gate found nothing to rebuild for.
    NoUpdates,
    /// Every tweak was unavailable, so there was nothing to inject.
    NoTweaks,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NoSource => "no IPA source or App Store URL",
            Self::NoUpdates => "no updates",
            Self::NoTweaks => "no tweaks available",
        })
    }
}

/// Stage at which a build failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    Fetch,
    Inject,
    Publish,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fetch => "fetch",
            Self::Inject => "inject",
            Self::Publish => "publish",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppOutcome {
    /// Injected and published; the catalog now points at `download_url`.
    Built { download_url: String },
    Skipped(SkipReason),
    /// The app's catalog entry was left unchanged.
    Failed { stage: BuildStage, error: String },
}

#[derive(Debug, Clone)]
pub struct AppReport {
    pub name: String,
    pub outcome: AppOutcome,
}

/// Result of one pass over the catalog.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// One report per app, in catalog order.
    pub reports: Vec<AppReport>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn built(&self) -> usize {
        self.count(|o| matches!(o, AppOutcome::Built { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, AppOutcome::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, AppOutcome::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&AppOutcome) -> bool) -> usize {
        self.reports.iter().filter(|r| pred(&r.outcome)).count()
    }
}
