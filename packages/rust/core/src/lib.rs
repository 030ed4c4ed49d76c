//! Core pipeline orchestration for TweakForge.
//!
//! This crate ties together the catalog, tweak resolution, artifact fetching,
//! injection and publishing into the per-app build pipeline.

pub mod gate;
pub mod pipeline;
pub mod report;

pub use gate::GateDecision;
pub use pipeline::{
    AppPlan, Pipeline, PipelineOptions, PlanAction, ProgressReporter, SilentProgress,
};
pub use report::{AppOutcome, AppReport, BuildStage, RunSummary, SkipReason};
