//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use tweakforge_catalog::Catalog;
use tweakforge_core::{
    AppOutcome, AppReport, Pipeline, PlanAction, ProgressReporter, RunSummary,
};
use tweakforge_shared::{
    AppConfig, BaseSource, RunConfig, RunOverrides, init_config, load_config, load_config_from,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// TweakForge: inject tweaks into iOS app archives and publish the results.
#[derive(Parser)]
#[command(
    name = "tweakforge",
    version,
    about = "Rebuild tweaked iOS app archives listed in a catalog and publish them.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.tweakforge/tweakforge.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Catalog and working directory overrides shared by catalog commands.
#[derive(clap::Args)]
pub(crate) struct PathArgs {
    /// Catalog file (defaults to [paths].catalog).
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Working directory for builds (defaults to [paths].build_dir).
    #[arg(long)]
    pub build_dir: Option<PathBuf>,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Process every app in the catalog and record new download links.
    Run {
        #[command(flatten)]
        paths: PathArgs,

        /// Build every app with a source, even without new releases.
        #[arg(long)]
        force: bool,
    },

    /// Show what `run` would do, without downloading or publishing.
    Plan {
        #[command(flatten)]
        paths: PathArgs,

        /// Evaluate as if `--force` were given.
        #[arg(long)]
        force: bool,
    },

    /// List the apps in the catalog.
    List {
        /// Catalog file (defaults to [paths].catalog).
        #[arg(long)]
        catalog: Option<PathBuf>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "tweakforge=info",
        1 => "tweakforge=debug",
        _ => "tweakforge=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run { paths, force } => cmd_run(config_path, paths, force).await,
        Command::Plan { paths, force } => cmd_plan(config_path, paths, force).await,
        Command::List { catalog } => cmd_list(config_path, catalog),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

fn read_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

fn resolve_run_config(
    config_path: Option<&Path>,
    paths: PathArgs,
    force: bool,
) -> Result<RunConfig> {
    let config = read_config(config_path)?;
    let overrides = RunOverrides {
        catalog: paths.catalog,
        build_dir: paths.build_dir,
        force,
    };
    Ok(RunConfig::resolve(&config, &overrides))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(config_path: Option<&Path>, paths: PathArgs, force: bool) -> Result<()> {
    let run_config = resolve_run_config(config_path, paths, force)?;
    let pipeline = Pipeline::from_config(&run_config)?;

    info!(
        catalog = %run_config.catalog_path.display(),
        build_dir = %run_config.build_dir.display(),
        force = run_config.force,
        "running catalog"
    );

    let reporter = CliProgress::new();
    let summary = pipeline
        .run_catalog(&run_config.catalog_path, &run_config.build_dir, &reporter)
        .await?;

    print_summary(&summary);
    Ok(())
}

async fn cmd_plan(config_path: Option<&Path>, paths: PathArgs, force: bool) -> Result<()> {
    let run_config = resolve_run_config(config_path, paths, force)?;
    let catalog = Catalog::load(&run_config.catalog_path)?;
    let pipeline = Pipeline::from_config(&run_config)?;

    let plans = pipeline.plan_catalog(&catalog).await;

    println!();
    for plan in &plans {
        let action = match &plan.action {
            PlanAction::Build(decision) => format!("build ({decision})"),
            PlanAction::Skip(reason) => format!("skip ({reason})"),
        };
        println!(
            "  {:<24} {:<48} tweaks {}/{}",
            plan.name, action, plan.tweaks_available, plan.tweaks_total
        );
    }
    println!();

    Ok(())
}

fn cmd_list(config_path: Option<&Path>, catalog: Option<PathBuf>) -> Result<()> {
    let catalog_path = match catalog {
        Some(path) => path,
        None => PathBuf::from(read_config(config_path)?.paths.catalog),
    };
    let catalog = Catalog::load(&catalog_path)?;

    if catalog.is_empty() {
        println!("No apps in {}", catalog_path.display());
        return Ok(());
    }

    println!();
    for app in catalog.apps() {
        let source = match app.base_source() {
            Some(BaseSource::Direct(_)) => "ipa",
            Some(BaseSource::AppStore(_)) => "app store",
            None => "none",
        };
        println!(
            "  {:<24} source: {:<10} tweaks: {:<3} {}",
            app.name,
            source,
            app.tweaks.len(),
            app.download_url.as_deref().unwrap_or("-")
        );
    }
    println!();

    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = read_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!();
    for report in &summary.reports {
        println!("  {}", outcome_line(report));
    }
    println!();
    println!(
        "  Built: {}  Skipped: {}  Failed: {}  Time: {:.1}s",
        summary.built(),
        summary.skipped(),
        summary.failed(),
        summary.elapsed.as_secs_f64()
    );
    println!();
}

fn outcome_line(report: &AppReport) -> String {
    match &report.outcome {
        AppOutcome::Built { download_url } => format!("✓ {}: {download_url}", report.name),
        AppOutcome::Skipped(reason) => format!("- {}: skipped ({reason})", report.name),
        AppOutcome::Failed { stage, error } => {
            format!("✗ {}: {stage} failed: {error}", report.name)
        }
    }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

const SPINNER_TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
    current: Mutex<String>,
}

impl CliProgress {
    fn new() -> Self {
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .map(|s| s.tick_strings(SPINNER_TICKS))
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self {
            spinner,
            current: Mutex::new(String::new()),
        }
    }

    fn prefix(&self) -> String {
        self.current.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl ProgressReporter for CliProgress {
    fn app_started(&self, name: &str, current: usize, total: usize) {
        let label = format!("[{current}/{total}] {name}");
        self.spinner.set_message(label.clone());
        if let Ok(mut slot) = self.current.lock() {
            *slot = label;
        }
    }

    fn phase(&self, name: &str) {
        self.spinner.set_message(format!("{}: {name}", self.prefix()));
    }

    fn app_finished(&self, report: &AppReport) {
        self.spinner.println(outcome_line(report));
    }

    fn done(&self, _summary: &RunSummary) {
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_accepts_overrides() {
        let cli = Cli::try_parse_from([
            "tweakforge",
            "-v",
            "run",
            "--catalog",
            "other/apps.json",
            "--build-dir",
            "/tmp/tf",
            "--force",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Command::Run { paths, force } => {
                assert!(force);
                assert_eq!(paths.catalog, Some(PathBuf::from("other/apps.json")));
                assert_eq!(paths.build_dir, Some(PathBuf::from("/tmp/tf")));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn outcome_lines_name_the_app() {
        let report = AppReport {
            name: "Foo".into(),
            outcome: AppOutcome::Failed {
                stage: tweakforge_core::BuildStage::Inject,
                error: "`azule` exited with status 1".into(),
            },
        };
        assert_eq!(
            outcome_line(&report),
            "✗ Foo: inject failed: `azule` exited with status 1"
        );
    }
}
