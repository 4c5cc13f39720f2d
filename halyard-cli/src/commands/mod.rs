//! Subcommand implementations and the options they share.

pub mod bind;
pub mod capability;
pub mod config;
pub mod mode;
pub mod push;
pub mod wait;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use halyard_core::{settings, Settings};
use halyard_kube::{Cluster, Kubectl};

/// Options accepted by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Namespace to operate in (overrides the config file and kube context).
    #[arg(long, short = 'n', global = true)]
    pub namespace: Option<String>,

    /// Seconds to wait for a component to become ready.
    #[arg(long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,
}

impl GlobalArgs {
    /// Settings from `~/.halyard/config.yaml` with command-line overrides.
    pub fn settings(&self) -> Result<Settings> {
        let home = home()?;
        let mut settings = settings::load_at(&home).context("failed to load halyard settings")?;
        if let Some(namespace) = &self.namespace {
            settings.namespace = Some(namespace.clone());
        }
        if let Some(secs) = self.timeout {
            settings.watch_timeout_secs = secs;
        }
        Ok(settings)
    }

    /// Cluster access for `settings`.
    pub async fn cluster(&self, settings: &Settings) -> Result<Arc<dyn Cluster>> {
        let kubectl = Kubectl::connect(settings)
            .await
            .context("failed to reach the cluster")?;
        Ok(Arc::new(kubectl))
    }
}

pub(crate) fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// Component directories to act on; the current directory when none given.
pub(crate) fn component_dirs(dirs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    if !dirs.is_empty() {
        return Ok(dirs.to_vec());
    }
    let cwd = std::env::current_dir().context("could not determine current directory")?;
    Ok(vec![cwd])
}

pub(crate) fn short_revision(revision: &str) -> &str {
    revision.get(..12).unwrap_or(revision)
}

pub(crate) fn format_timeout(timeout: Duration) -> String {
    format!("{}s", timeout.as_secs())
}
