//! NIMBUS CLI
//!
//! Renders bootstrap scripts, plans and applies a cluster manifest against
//! a file-backed cloud.

#![warn(missing_docs)]
#![warn(clippy::all)]

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use console::style;
use nimbus_bootstrap::BootstrapConfig;
use nimbus_runtime::{
    EngineConfig, ExecutionReport, MemoryCloud, Mode, ReconcileError, Reconciler, TaskOutcome,
    Verdict,
};
use nimbus_spec::{populate_cluster_spec, ClusterManifest};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nimbus")]
#[command(about = "NIMBUS - declarative cluster reconciliation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the bootstrap script of each instance group
    Render {
        #[command(flatten)]
        manifest: ManifestArgs,
        /// Only this instance group
        #[arg(short, long)]
        group: Option<String>,
    },
    /// Show what apply would do, without changing anything
    Plan {
        #[command(flatten)]
        manifest: ManifestArgs,
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Converge the cloud to the manifest
    Apply {
        #[command(flatten)]
        manifest: ManifestArgs,
        #[command(flatten)]
        engine: EngineArgs,
    },
}

#[derive(Args)]
struct ManifestArgs {
    /// Cluster manifest (YAML, or JSON with a .json extension)
    #[arg(short, long, env = "NIMBUS_MANIFEST")]
    manifest: PathBuf,
}

#[derive(Args)]
struct EngineArgs {
    /// Cloud state file
    #[arg(short, long, env = "NIMBUS_STATE", default_value = "nimbus-state.json")]
    state: PathBuf,
    /// Maximum number of tasks in flight
    #[arg(long, env = "NIMBUS_MAX_PARALLEL", default_value_t = 10)]
    max_parallel: usize,
    /// Per-task timeout in seconds
    #[arg(long, env = "NIMBUS_TASK_TIMEOUT_SECS", default_value_t = 300)]
    task_timeout_secs: u64,
}

impl EngineArgs {
    fn config(&self, mode: Mode) -> EngineConfig {
        EngineConfig::default()
            .with_mode(mode)
            .with_max_parallel(self.max_parallel)
            .with_task_timeout(Duration::from_secs(self.task_timeout_secs))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("nimbus=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Render { manifest, group } => render(&manifest.manifest, group.as_deref()),
        Commands::Plan { manifest, engine } => {
            reconcile(&manifest.manifest, &engine, Mode::DryRun).await
        }
        Commands::Apply { manifest, engine } => {
            reconcile(&manifest.manifest, &engine, Mode::Apply).await
        }
    }
}

fn load_manifest(path: &Path) -> Result<ClusterManifest> {
    ClusterManifest::load(path).wrap_err_with(|| format!("loading manifest {}", path.display()))
}

fn bootstrap_config() -> Result<BootstrapConfig> {
    BootstrapConfig::from_env().wrap_err("reading node agent settings")
}

fn render(path: &Path, only: Option<&str>) -> Result<()> {
    let manifest = load_manifest(path)?;
    let cluster = populate_cluster_spec(&manifest.cluster)?;
    let reconciler = Reconciler::new(
        Arc::new(MemoryCloud::new()),
        bootstrap_config()?,
        EngineConfig::default(),
    );
    let script = reconciler.bootstrap_script(&cluster);

    let mut found = false;
    for group in &manifest.instance_groups {
        if only.is_some_and(|name| name != group.name) {
            continue;
        }
        found = true;
        match script.resource_nodeup(group, cluster.egress_proxy())? {
            Some(holder) => {
                println!("{}", style(format!("# {}", holder.name())).bold());
                print!("{}", holder.as_str()?);
            }
            None => println!("{}", style(format!("# {}: no bootstrap script", group.name)).dim()),
        }
    }
    match (only, found) {
        (Some(name), false) => Err(eyre!("no instance group named {}", name)),
        _ => Ok(()),
    }
}

async fn reconcile(path: &Path, args: &EngineArgs, mode: Mode) -> Result<()> {
    let manifest = load_manifest(path)?;
    let cloud = Arc::new(
        MemoryCloud::load(&args.state)
            .await
            .wrap_err_with(|| format!("loading state {}", args.state.display()))?,
    );
    let reconciler = Reconciler::new(cloud.clone(), bootstrap_config()?, args.config(mode));

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, waiting for running tasks");
            on_interrupt.cancel();
        }
    });

    let result = reconciler
        .reconcile(&manifest.cluster, &manifest.instance_groups, &cancel)
        .await;

    if mode == Mode::Apply {
        cloud
            .save(&args.state)
            .await
            .wrap_err_with(|| format!("saving state {}", args.state.display()))?;
    }

    match result {
        Ok(report) => {
            print_report(&report);
            Ok(())
        }
        Err(ReconcileError::PartialFailure(report)) => {
            print_report(&report);
            Err(eyre!("{}", ReconcileError::PartialFailure(report)))
        }
        Err(e) => Err(e.into()),
    }
}

fn print_report(report: &ExecutionReport) {
    println!("{}", style(format!("{} ({})", report.run_id, report.mode)).bold());
    for (name, outcome) in &report.outcomes {
        let line = format!("  {}: {}", name, outcome);
        let styled = match outcome {
            TaskOutcome::Failed(_) => style(line).red(),
            TaskOutcome::Skipped { .. } | TaskOutcome::Cancelled => style(line).yellow(),
            _ if outcome.verdict().is_some_and(|v| *v != Verdict::NoOp) => {
                style(line).green()
            }
            _ => style(line).dim(),
        };
        println!("{}", styled);
    }
    println!(
        "{} to create, {} to update, {} unchanged, {} failed ({} ms)",
        report.creates(),
        report.updates(),
        report.unchanged(),
        report.failures().count(),
        report.duration().num_milliseconds()
    );
}
