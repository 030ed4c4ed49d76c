//! Decide-to-build gate.
//!
//! An app is rebuilt when the run is forced or when at least one of its
//! `github_release` tweaks resolved to an asset. Availability is the signal,
//! not novelty: without version tracking every run that finds a release
//! rebuilds. With version tracking a release only counts when its tag differs
//! from the one recorded in the catalog.
//!
//! `direct` and `local` tweaks never trigger a rebuild on their own.

use std::fmt;

use tweakforge_shared::{App, ResolvedAsset, TweakSpec};

/// Outcome of the gate for one app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// The run is forced.
    Forced,
    /// These repositories have a (new, when tracking) release asset.
    ReleaseAvailable(Vec<String>),
    /// Nothing warrants a rebuild.
    NoUpdates,
}

impl GateDecision {
    pub fn should_build(&self) -> bool {
        !matches!(self, Self::NoUpdates)
    }
}

impl fmt::Display for GateDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forced => f.write_str("forced"),
            Self::ReleaseAvailable(repos) => write!(f, "release available: {}", repos.join(", ")),
            Self::NoUpdates => f.write_str("no updates"),
        }
    }
}

/// Evaluate the gate. `resolved[i]` is the resolution of `app.tweaks[i]`.
pub fn decide(
    app: &App,
    resolved: &[Option<ResolvedAsset>],
    force: bool,
    track_versions: bool,
) -> GateDecision {
    if force {
        return GateDecision::Forced;
    }

    let updated: Vec<String> = app
        .tweaks
        .iter()
        .zip(resolved)
        .filter_map(|(spec, asset)| match (spec, asset) {
            (TweakSpec::GithubRelease { repo, .. }, Some(asset)) => {
                let seen = app.tweak_versions.get(repo);
                let is_new = !track_versions || asset.version.as_ref() != seen;
                is_new.then(|| repo.clone())
            }
            _ => None,
        })
        .collect();

    if updated.is_empty() {
        GateDecision::NoUpdates
    } else {
        GateDecision::ReleaseAvailable(updated)
    }
}
