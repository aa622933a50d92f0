//! bigitr: the one-shot CLI runner (§4.13, §6).

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use bigitr_core::config::{AppConfig, RepoConfig};
use bigitr_core::util::expand_path;
use bigitr_cli::runner::{run, SubCommand};

#[derive(Parser)]
#[command(name = "bigitr")]
#[command(about = "Synchronize Git and CVS")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Prints usage and exits.
    Help,
    /// Runs the full import/export/import cycle for each repository.
    Sync(RunArgs),
    /// Imports CENTRAL branches into DIST.
    Import(RunArgs),
    /// Exports DIST branches back onto CENTRAL.
    Export(RunArgs),
    /// Propagates a branch through the configured merge graph.
    Merge(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// bigitr configuration file.
    #[arg(short, long)]
    appconfig: Option<PathBuf>,
    /// repository configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// repositories to process [all configured repositories], each
    /// optionally suffixed with `::branch`.
    repository: Vec<String>,
}

fn resolve(cli_value: &Option<PathBuf>, env_var: &str, default: &str) -> PathBuf {
    let raw = cli_value
        .as_ref()
        .map(|p| p.to_string_lossy().into_owned())
        .or_else(|| std::env::var(env_var).ok())
        .unwrap_or_else(|| default.to_string());
    expand_path(&raw)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (sub, args) = match cli.command {
        Commands::Help => {
            use clap::CommandFactory;
            Cli::command().print_help().ok();
            println!();
            return Ok(());
        }
        Commands::Sync(args) => (SubCommand::Sync, args),
        Commands::Import(args) => (SubCommand::Import, args),
        Commands::Export(args) => (SubCommand::Export, args),
        Commands::Merge(args) => (SubCommand::Merge, args),
    };

    let appconfig_path = resolve(&args.appconfig, "BIGITR_APP_CONFIG", "~/.bigitr");
    let config_path = resolve(&args.config, "BIGITR_REPO_CONFIG", "~/.bigitr-repository");

    let app_config =
        AppConfig::load(&appconfig_path).with_context(|| format!("loading app config {}", appconfig_path.display()))?;
    let repo_config =
        RepoConfig::load(&config_path).with_context(|| format!("loading repository config {}", config_path.display()))?;

    let aborted = run(sub, &app_config, &repo_config, &args.repository)?;
    if aborted {
        std::process::exit(1);
    }
    Ok(())
}
