//! CLI command definitions and dispatch.

mod execute;
mod validate;
mod version;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use cranberry_core::Settings;

/// Cranberry: build, sync, scan and audit container images from a plan.
#[derive(Parser)]
#[command(name = "cranberry", version, about)]
pub struct Cli {
    /// Settings file (defaults to ~/.cranberry/config.yaml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Run a plan file
    Execute(execute::ExecuteArgs),
    /// Load a plan file and check it without running anything
    Validate(validate::ValidateArgs),
    /// Show version information
    Version(version::VersionArgs),
}

/// Load settings from `path`, or from the default location.
pub(crate) fn load_settings(path: Option<&Path>) -> cranberry_core::Result<Settings> {
    match path {
        Some(path) => Settings::load(path),
        None => Settings::load_default(),
    }
}

/// Load settings and install the tracing subscriber they describe.
fn init(config: Option<&Path>) -> cranberry_core::Result<Settings> {
    let settings = load_settings(config)?;
    cranberry_core::log::init_tracing(&settings.log);
    Ok(settings)
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Execute(args) => {
            let settings = init(cli.config.as_deref())?;
            execute::execute(args, &settings).await
        }
        Command::Validate(args) => {
            init(cli.config.as_deref())?;
            validate::execute(args).await
        }
        Command::Version(args) => version::execute(args).await,
    }
}
