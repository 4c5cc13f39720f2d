//! `halyard capability list` and `halyard capability match`.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use halyard_core::{Capability, CapabilitySpec, NameValuePair};
use halyard_sync::capability::matches;
use tabled::{settings::Style, Table, Tabled};

use super::GlobalArgs;

#[derive(Subcommand, Debug)]
pub enum CapabilityCommand {
    /// List every capability in the namespace.
    List,

    /// List capabilities satisfying a requirement.
    Match(MatchArgs),
}

#[derive(Args, Debug)]
pub struct MatchArgs {
    #[arg(long)]
    pub category: String,

    #[arg(long = "type", value_name = "TYPE")]
    pub kind: String,

    #[arg(long)]
    pub version: String,

    /// Required parameter, repeatable.
    #[arg(short = 'p', long = "parameter", value_name = "NAME=VALUE")]
    pub parameters: Vec<NameValuePair>,
}

#[derive(Tabled)]
struct CapabilityRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "CATEGORY")]
    category: String,
    #[tabled(rename = "TYPE")]
    kind: String,
    #[tabled(rename = "VERSION")]
    version: String,
    #[tabled(rename = "PARAMETERS")]
    parameters: String,
}

impl From<&Capability> for CapabilityRow {
    fn from(c: &Capability) -> Self {
        Self {
            name: c.name().to_owned(),
            category: c.spec.category.clone(),
            kind: c.spec.kind.clone(),
            version: c.spec.version.clone(),
            parameters: c
                .spec
                .parameters
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

pub async fn run(cmd: CapabilityCommand, global: &GlobalArgs) -> Result<()> {
    let settings = global.settings()?;
    let cluster = global.cluster(&settings).await?;
    let available = cluster
        .list_capabilities()
        .await
        .context("failed to list capabilities")?;

    let shown = match cmd {
        CapabilityCommand::List => available,
        CapabilityCommand::Match(args) => {
            let required = CapabilitySpec {
                category: args.category,
                kind: args.kind,
                version: args.version,
                parameters: args.parameters,
            };
            let found = matches(&required, &available);
            if found.is_empty() {
                println!("No capability matches {required}.");
                return Ok(());
            }
            found
        }
    };

    if shown.is_empty() {
        println!("No capabilities in namespace '{}'.", cluster.namespace());
        return Ok(());
    }
    let mut table = Table::new(shown.iter().map(CapabilityRow::from));
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}
