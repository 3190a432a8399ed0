use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cli;

#[derive(Parser)]
#[command(name = "plugdeck")]
#[command(about = "Install and manage plugin and theme packages", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Keep storage, public files and the database under this directory
    /// instead of the configured locations
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage plugins
    Plugin {
        #[command(subcommand)]
        action: PluginAction,
    },
    /// Manage themes
    Theme {
        #[command(subcommand)]
        action: ThemeAction,
    },
    /// Check records against package directories and resolve runtimes
    Doctor,
    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum PackageAction {
    /// Install a package from a ZIP archive
    Install { file: PathBuf },
    /// List installed packages, newest first
    List,
    /// Show a package record and its on-disk manifest
    Show { slug: String },
    /// Activate a package
    Activate { slug: String },
    /// Deactivate a package
    Deactivate { slug: String },
    /// Flip a package's activation state
    Toggle { slug: String },
    /// Delete a package and its files
    Delete { slug: String },
    /// Browse a package's files
    Files {
        slug: String,
        /// Path relative to the package root
        path: Option<String>,
    },
}

#[derive(Subcommand)]
enum PluginAction {
    #[command(flatten)]
    Package(PackageAction),
    /// Resolve capability data for an active plugin
    Data {
        slug: String,
        #[arg(short, long, default_value = "getPluginData")]
        capability: String,
    },
}

#[derive(Subcommand)]
enum ThemeAction {
    #[command(flatten)]
    Package(PackageAction),
    /// Show the active theme
    Active,
}

fn init_logging(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("plugdeck=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.log_json);

    if let Err(err) = cli::run(cli).await {
        for message in cli::error_messages(&err) {
            eprintln!("Error: {}", message);
        }
        std::process::exit(1);
    }
}
