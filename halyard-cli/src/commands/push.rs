//! `halyard push`: push sources or a packaged artifact into running pods.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use halyard_sync::{PushOutcome, PushTarget, Pusher};

use super::{component_dirs, short_revision, GlobalArgs};

/// Arguments for `halyard push`.
#[derive(Args, Debug)]
pub struct PushArgs {
    /// Component directories to push (defaults to the current directory).
    #[arg(short = 'c', long = "components", value_delimiter = ',', value_name = "DIR")]
    pub components: Vec<PathBuf>,

    /// Push the newest packaged artifact instead of the sources.
    #[arg(long)]
    pub binary: bool,

    /// Component name, when it differs from the directory name.
    #[arg(long)]
    pub name: Option<String>,
}

impl PushArgs {
    pub async fn run(self, global: &GlobalArgs) -> Result<()> {
        let dirs = component_dirs(&self.components)?;
        if self.name.is_some() && dirs.len() > 1 {
            bail!("--name can only be used when pushing a single component");
        }

        let settings = global.settings()?;
        let cluster = global.cluster(&settings).await?;
        let pusher = Pusher::new(cluster, &settings);

        for dir in dirs {
            let target = PushTarget {
                dir: dir.clone(),
                name: self.name.clone(),
                binary: self.binary,
            };
            let outcome = pusher
                .push(&target)
                .await
                .with_context(|| format!("push failed for '{}'", dir.display()))?;
            print_outcome(&outcome);
        }
        Ok(())
    }
}

fn print_outcome(outcome: &PushOutcome) {
    match outcome {
        PushOutcome::NothingToPush { name, revision } => println!(
            "{} '{name}' has nothing to push (revision {})",
            "·".bright_black(),
            short_revision(revision)
        ),
        PushOutcome::Pushed {
            name,
            revision,
            pod,
        } => println!(
            "{} '{name}' pushed to pod {pod} (revision {})",
            "✓".green().bold(),
            short_revision(revision)
        ),
    }
}
