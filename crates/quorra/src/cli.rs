//! Command-line arguments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use quorra_core::{AgentIdentity, TestFilter, TestPackage};
use quorra_core::package_settings::{MAX_AGENTS, WORK_DIRECTORY};

#[derive(Debug, Parser)]
#[command(name = "quorra", version, about = "Distributed test execution engine")]
pub struct Cli {
    /// Settings file to use instead of `~/.quorra/settings.json`.
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Serve commands from a controller as a worker.
    Agent(AgentArgs),
    /// Run test programs in parallel worker processes.
    Run(PackageArgs),
    /// Describe the tests of the given programs without running them.
    Explore(PackageArgs),
    /// Count the test cases of the given programs.
    Count(PackageArgs),
}

#[derive(Debug, Args)]
pub struct AgentArgs {
    /// Controller endpoint as `host:port`.
    #[arg(long)]
    pub agency: String,

    /// Identity to present to the controller. Random when omitted.
    #[arg(long)]
    pub agent_id: Option<AgentIdentity>,
}

#[derive(Debug, Args)]
pub struct PackageArgs {
    /// Upper bound on concurrently running workers.
    #[arg(long)]
    pub max_agents: Option<usize>,

    /// Filter text handed to every test program.
    #[arg(long)]
    pub filter: Option<String>,

    /// Working directory for the agents and test programs.
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Test programs; each becomes one sub-package.
    #[arg(required = true)]
    pub programs: Vec<String>,
}

impl PackageArgs {
    /// Composite package with one sub-package per program. Settings are
    /// added first so every program inherits them.
    pub fn package(&self) -> TestPackage {
        let mut package = TestPackage::from_files(Vec::<String>::new());
        if let Some(max_agents) = self.max_agents {
            package.add_setting(MAX_AGENTS, max_agents);
        }
        if let Some(dir) = &self.work_dir {
            package.add_setting(WORK_DIRECTORY, dir.display().to_string());
        }
        for program in &self.programs {
            package.add_sub_package(TestPackage::new(program.clone()));
        }
        package
    }

    /// The filter. Missing or blank text, and every spelling of an empty
    /// filter, become the canonical empty filter.
    pub fn filter(&self) -> TestFilter {
        self.filter
            .as_deref()
            .map(TestFilter::new)
            .filter(|filter| !filter.is_empty())
            .unwrap_or_default()
    }
}
