//! `halyard bind`: bind a component's required capabilities.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use halyard_core::{Capability, RequiredCapabilityConfig};
use halyard_sync::capability::{self, CapabilitySelector, FirstMatch, Resolution};
use halyard_sync::{PushTarget, SyncError};
use inquire::Select;
use tokio::runtime::{Handle, RuntimeFlavor};

use super::{component_dirs, GlobalArgs};

/// Arguments for `halyard bind`.
#[derive(Args, Debug)]
pub struct BindArgs {
    /// Component directory (defaults to the current directory).
    #[arg(short = 'c', long = "component", value_name = "DIR")]
    pub component: Option<PathBuf>,

    /// Component name, when it differs from the directory name.
    #[arg(long)]
    pub name: Option<String>,

    /// Also re-resolve requirements that are already bound.
    #[arg(long)]
    pub rebind: bool,

    /// Pick the first matching capability instead of prompting.
    #[arg(long)]
    pub first_match: bool,
}

impl BindArgs {
    pub async fn run(self, global: &GlobalArgs) -> Result<()> {
        let dirs: Vec<PathBuf> = self.component.iter().cloned().collect();
        let dir = component_dirs(&dirs)?.remove(0);
        let name = PushTarget {
            name: self.name.clone(),
            ..PushTarget::source(&dir)
        }
        .component_name()
        .with_context(|| format!("no component name for '{}'", dir.display()))?;

        let settings = global.settings()?;
        let cluster = global.cluster(&settings).await?;
        let selector: &dyn CapabilitySelector = if self.first_match {
            &FirstMatch
        } else {
            &InteractiveSelector
        };

        let report = capability::bind(&*cluster, &name, selector, self.rebind)
            .await
            .with_context(|| format!("failed to bind capabilities of '{name}'"))?;

        for requirement in &report.already_bound {
            println!("{} '{requirement}' already bound", "·".bright_black());
        }
        for binding in &report.bindings {
            let how = match binding.resolution {
                Resolution::Automatic(_) => "only match",
                Resolution::Selected(_) => "selected",
            };
            println!(
                "{} '{}' bound to {} ({how})",
                "✓".green().bold(),
                binding.requirement,
                binding.resolution.name()
            );
        }
        if report.bindings.is_empty() && report.already_bound.is_empty() {
            println!("'{name}' requires no capabilities.");
        }
        Ok(())
    }
}

/// Prompts on the terminal when several capabilities match.
struct InteractiveSelector;

impl CapabilitySelector for InteractiveSelector {
    fn select(
        &self,
        requirement: &RequiredCapabilityConfig,
        candidates: &[Capability],
    ) -> Result<String, SyncError> {
        let items: Vec<String> = candidates.iter().map(ToString::to_string).collect();
        let prompt = format!("Matching capability for '{}'", requirement.name);
        let answer = off_runtime(|| {
            Select::new(&prompt, items)
                .with_starting_cursor(0)
                .with_page_size(10)
                .with_help_message("↑↓ to move, ENTER to select, ESC to cancel")
                .raw_prompt_skippable()
        });
        let Some(choice) = answer.map_err(|e| SyncError::Selection(e.to_string()))? else {
            return Err(SyncError::Selection(format!(
                "no capability selected for '{}'",
                requirement.name
            )));
        };
        Ok(candidates[choice.index].name().to_owned())
    }
}

/// Run a blocking terminal prompt without stalling the runtime's other tasks.
fn off_runtime<T>(prompt: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(prompt)
        }
        _ => prompt(),
    }
}
