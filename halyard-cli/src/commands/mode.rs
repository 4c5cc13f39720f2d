//! `halyard mode`: switch deployment mode.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use halyard_core::DeploymentMode;
use halyard_sync::{PushTarget, Pusher};

use super::{component_dirs, GlobalArgs};
use crate::ModeArg;

/// Arguments for `halyard mode`.
#[derive(Args, Debug)]
pub struct ModeArgs {
    /// Target mode: dev | build.
    #[arg(short = 'm', long, value_name = "MODE")]
    pub mode: ModeArg,

    /// Component directories (defaults to the current directory).
    #[arg(short = 'c', long = "components", value_delimiter = ',', value_name = "DIR")]
    pub components: Vec<PathBuf>,
}

impl ModeArgs {
    pub async fn run(self, global: &GlobalArgs) -> Result<()> {
        let mode = DeploymentMode::from(self.mode);
        let names = component_dirs(&self.components)?
            .into_iter()
            .map(|dir| {
                PushTarget::source(&dir)
                    .component_name()
                    .with_context(|| format!("no component name for '{}'", dir.display()))
            })
            .collect::<Result<Vec<_>>>()?;

        let settings = global.settings()?;
        let cluster = global.cluster(&settings).await?;
        let pusher = Pusher::new(cluster, &settings);

        for name in names {
            pusher
                .switch_mode(&name, mode)
                .await
                .with_context(|| format!("failed to switch '{name}' to {mode} mode"))?;
            println!("{} '{name}' switched to {} mode", "✓".green().bold(), mode);
        }
        Ok(())
    }
}
