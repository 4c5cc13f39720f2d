//! `halyard wait`: block until a component reaches a phase.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use halyard_core::Phase;
use halyard_sync::ReadinessWatcher;

use super::{format_timeout, GlobalArgs};

/// Arguments for `halyard wait`.
#[derive(Args, Debug)]
pub struct WaitArgs {
    /// Component name.
    pub name: String,

    /// Phase to wait for: Pending | Ready | Running.
    #[arg(long, default_value = "Ready")]
    pub phase: Phase,
}

impl WaitArgs {
    pub async fn run(self, global: &GlobalArgs) -> Result<()> {
        let settings = global.settings()?;
        let cluster = global.cluster(&settings).await?;
        let watcher = ReadinessWatcher::new(cluster, settings.watch_timeout());

        let component = watcher
            .wait_for(&self.name, self.phase)
            .await
            .with_context(|| {
                format!(
                    "'{}' did not become {} within {}",
                    self.name,
                    self.phase,
                    format_timeout(watcher.timeout())
                )
            })?;

        let pod = component.pod_name().unwrap_or("-");
        println!(
            "{} '{}' is {} (pod {pod})",
            "✓".green().bold(),
            component.name(),
            self.phase
        );
        Ok(())
    }
}
