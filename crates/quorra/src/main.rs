//! `quorra` binary.
//!
//! `quorra agent` is the worker process: it dials the controller named on its
//! command line and serves commands with the program runner. `run`, `explore`
//! and `count` are the controller: they bind an agency, spawn one
//! `quorra agent` per test program and merge what the workers report.

#![deny(unsafe_code)]

mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use quorra_agent::{ChannelConfig, CommandChannel, ProgramRunnerFactory};
use quorra_core::{RunnerError, TestEngineRunner, TestEventListener};
use quorra_runtime::{Agency, MultipleProcessRunner, ProcessLauncher};
use quorra_settings::QuorraSettings;
use tracing::{debug, info, warn};

use crate::cli::{AgentArgs, Cli, Commands, PackageArgs};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (settings, load_error) = quorra_settings::resolve_settings(cli.settings.as_deref());
    quorra_core::logging::init_logging(&settings.logging.level, settings.logging.json);
    match load_error {
        Some(e) => warn!(error = %e, "failed to load settings, using defaults"),
        None => debug!(version = %settings.version, "settings loaded"),
    }

    match cli.command {
        Commands::Agent(args) => agent(args, &settings).await,
        Commands::Run(args) => run(args, &settings).await,
        Commands::Explore(args) => explore(args, &settings).await,
        Commands::Count(args) => count(args, &settings).await,
    }
}

async fn agent(args: AgentArgs, settings: &QuorraSettings) -> Result<()> {
    let identity = args.agent_id.unwrap_or_default();
    let channel = CommandChannel::new(
        identity,
        &args.agency,
        Arc::new(ProgramRunnerFactory),
        &ChannelConfig::from(&settings.agent),
    )
    .with_context(|| format!("invalid agency endpoint {}", args.agency))?;
    info!(agent_id = %identity, endpoint = %channel.endpoint(), "agent starting");
    channel.run().await.context("command channel failed")?;
    info!(agent_id = %identity, "agent stopped");
    Ok(())
}

async fn orchestrator(
    args: &PackageArgs,
    settings: &QuorraSettings,
) -> Result<(MultipleProcessRunner, Arc<Agency>)> {
    let agency = Agency::bind(&settings.orchestrator.bind_address, settings.agent.max_frame_length)
        .await
        .map(Arc::new)?;
    let launcher = ProcessLauncher::from_settings(Arc::clone(&agency), &settings.orchestrator)
        .context("cannot locate the agent executable")?;
    let runner = MultipleProcessRunner::from_settings(
        args.package(),
        Arc::new(launcher),
        &settings.orchestrator,
    );
    info!(
        sub_packages = args.programs.len(),
        slots = runner.level_of_parallelism(),
        agency = %agency.local_addr(),
        "orchestrator ready"
    );
    Ok((runner, agency))
}

/// Prints every progress report on its own stdout line.
struct StdoutListener;

impl TestEventListener for StdoutListener {
    fn on_test_event(&self, report: &str) {
        println!("{report}");
    }
}

async fn run(args: PackageArgs, settings: &QuorraSettings) -> Result<()> {
    let (runner, agency) = orchestrator(&args, settings).await?;
    let filter = args.filter();

    let stop = runner.clone();
    let _ = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping workers");
            if let Err(e) = stop.request_stop().await {
                warn!(error = %e, "stop request failed");
            }
        }
    });

    let result = runner.run(Arc::new(StdoutListener), &filter).await?;
    agency.shutdown();

    let summary = result.summary();
    println!("{}", summary.report());
    if summary.is_success() {
        Ok(())
    } else {
        anyhow::bail!(
            "{} failed, {} errors out of {} tests",
            summary.failed,
            summary.errors,
            summary.total
        )
    }
}

async fn explore(args: PackageArgs, settings: &QuorraSettings) -> Result<()> {
    let (runner, agency) = orchestrator(&args, settings).await?;
    let tree = runner.explore(&args.filter()).await?;
    agency.shutdown();
    println!("{}", serde_json::to_string_pretty(&tree)?);
    Ok(())
}

async fn count(args: PackageArgs, settings: &QuorraSettings) -> Result<()> {
    let (runner, agency) = orchestrator(&args, settings).await?;
    let result = runner.count_test_cases(&args.filter()).await;
    agency.shutdown();
    match result {
        Ok(count) => {
            println!("{count}");
            Ok(())
        }
        Err(RunnerError::PartialFailure { partial_count, failures }) => {
            println!("{partial_count}");
            for failure in &failures {
                warn!(package = %failure.package_name, kind = %failure.kind, "{}", failure.message);
            }
            anyhow::bail!("{} of {} programs could not be counted", failures.len(), args.programs.len())
        }
        Err(e) => Err(e.into()),
    }
}
