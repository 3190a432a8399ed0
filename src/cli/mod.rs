//! Command dispatch for the `plugdeck` binary.

mod package;

use anyhow::{Context, Result};
use serde::Serialize;

use plugdeck::config::Config;
use plugdeck::{DeckError, PackageHost, PackageKind};

use super::{Cli, Commands, PluginAction, ThemeAction};

pub(crate) async fn run(cli: Cli) -> Result<()> {
    let command = match cli.command {
        Some(Commands::Version) | None => {
            println!("plugdeck {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some(command) => command,
    };

    let config = match cli.root {
        Some(root) => Config::rooted_at(&root),
        None => Config::load().with_context(|| "Failed to load configuration")?,
    };
    let host = PackageHost::open(&config)?;

    match command {
        Commands::Plugin { action } => match action {
            PluginAction::Package(action) => package::run(&host, PackageKind::Plugin, action),
            PluginAction::Data { slug, capability } => {
                package::cmd_data(&host, &slug, &capability).await
            }
        },
        Commands::Theme { action } => match action {
            ThemeAction::Package(action) => package::run(&host, PackageKind::Theme, action),
            ThemeAction::Active => print_json(&host.lifecycle().active_theme()?),
        },
        Commands::Doctor => cmd_doctor(&host),
        Commands::Version => Ok(()),
    }
}

fn cmd_doctor(host: &PackageHost) -> Result<()> {
    let report = host.doctor()?;
    print_json(&report)?;
    if !report.is_healthy() {
        anyhow::bail!("Package state needs attention");
    }
    Ok(())
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Messages to show for a failed command. Package errors expand to every
/// message they carry, so all failed upload rules are shown at once.
pub(crate) fn error_messages(err: &anyhow::Error) -> Vec<String> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<DeckError>())
        .map(DeckError::messages)
        .unwrap_or_else(|| vec![format!("{:#}", err)])
}
