//! Halyard: push local workspaces into running cluster components.
//!
//! # Usage
//!
//! ```text
//! halyard push [-c <dir>[,<dir>…]] [--binary] [--name <component>]
//! halyard wait <component> [--phase Ready]
//! halyard mode -m dev|build [-c <dir>[,<dir>…]]
//! halyard bind [-c <dir>] [--rebind] [--first-match]
//! halyard capability list
//! halyard capability match --category <c> --type <t> --version <v> [-p NAME=VALUE]…
//! halyard config show|init [--force]
//! ```
//!
//! `--namespace` and `--timeout` apply to every command and override
//! `~/.halyard/config.yaml`.

mod commands;

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use commands::{
    bind::BindArgs, capability::CapabilityCommand, config::ConfigCommand, mode::ModeArgs,
    push::PushArgs, wait::WaitArgs, GlobalArgs,
};
use halyard_core::DeploymentMode;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "halyard",
    version,
    about = "Push local workspaces into running cluster components",
    long_about = None,
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Archive or package components and push them into their pods.
    Push(PushArgs),

    /// Wait for a component to reach a phase.
    Wait(WaitArgs),

    /// Switch components between dev and build deployment modes.
    Mode(ModeArgs),

    /// Bind a component's required capabilities.
    Bind(BindArgs),

    /// Inspect capabilities available in the namespace.
    Capability {
        #[command(subcommand)]
        command: CapabilityCommand,
    },

    /// Show or initialise ~/.halyard/config.yaml.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

// ---------------------------------------------------------------------------
// Shared DeploymentMode argument
// ---------------------------------------------------------------------------

/// Thin wrapper so clap can parse `DeploymentMode` from CLI args.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModeArg(pub DeploymentMode);

impl FromStr for ModeArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dev" => Ok(Self(DeploymentMode::Dev)),
            "build" => Ok(Self(DeploymentMode::Build)),
            other => Err(format!(
                "unknown deployment mode '{other}'; expected: dev, build"
            )),
        }
    }
}

impl fmt::Display for ModeArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<ModeArg> for DeploymentMode {
    fn from(m: ModeArg) -> Self {
        m.0
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_env("HALYARD_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    let Cli { global, command } = Cli::parse();
    init_tracing();

    match command {
        Commands::Config { command } => commands::config::run(command, &global),
        other => run_async(other, &global),
    }
}

fn run_async(command: Commands, global: &GlobalArgs) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(async {
        match command {
            Commands::Push(args) => args.run(global).await,
            Commands::Wait(args) => args.run(global).await,
            Commands::Mode(args) => args.run(global).await,
            Commands::Bind(args) => args.run(global).await,
            Commands::Capability { command } => commands::capability::run(command, global).await,
            Commands::Config { command } => commands::config::run(command, global),
        }
    })
}
