//! `halyard config show` and `halyard config init`.

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use colored::Colorize;
use halyard_core::{settings, Settings};

use super::{home, GlobalArgs};

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective settings, including command-line overrides.
    Show,

    /// Write the default settings to ~/.halyard/config.yaml.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

pub fn run(cmd: ConfigCommand, global: &GlobalArgs) -> Result<()> {
    match cmd {
        ConfigCommand::Show => show(global),
        ConfigCommand::Init { force } => init(force),
    }
}

fn show(global: &GlobalArgs) -> Result<()> {
    let home = home()?;
    let path = settings::settings_path_at(&home);
    let effective = global.settings()?;
    let source = if path.exists() {
        path.display().to_string()
    } else {
        "built-in defaults".to_owned()
    };

    println!("{}", format!("# {source}").bright_black());
    print!(
        "{}",
        serde_yaml::to_string(&effective).context("failed to render settings")?
    );
    Ok(())
}

fn init(force: bool) -> Result<()> {
    let home = home()?;
    let path = settings::settings_path_at(&home);
    if path.exists() && !force {
        bail!(
            "{} already exists; use --force to overwrite it",
            path.display()
        );
    }
    let written = settings::save_at(&home, &Settings::default())
        .context("failed to write halyard settings")?;
    println!("{} wrote {}", "✓".green().bold(), written.display());
    Ok(())
}
