//! bigitrd: the long-running scheduling daemon (§4.12, §6).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use bigitr_core::config::DaemonConfig;
use bigitrd::daemon::Daemon;
use bigitrd::jobs::build_repository_jobs;
use bigitrd::pidlock::PidLock;

#[derive(Parser)]
#[command(name = "bigitrd")]
#[command(about = "CENTRAL/DIST bidirectional sync daemon")]
#[command(version)]
struct Cli {
    /// Path to the daemon config (section GLOBAL plus one per application
    /// context). Defaults to $BIGITR_DAEMON_CONFIG, then /etc/bigitr/daemon.ini.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run a single pass in the foreground instead of looping and daemonizing.
    #[arg(long)]
    no_daemon: bool,

    /// Path to the PID lock file. Defaults to $BIGITR_DAEMON_PIDFILE, then
    /// /var/run/bigitrd.pid.
    #[arg(long)]
    pid_file: Option<PathBuf>,
}

fn resolve_config_path(cli_value: Option<PathBuf>) -> PathBuf {
    cli_value
        .or_else(|| std::env::var_os("BIGITR_DAEMON_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("/etc/bigitr/daemon.ini"))
}

fn resolve_pid_path(cli_value: Option<PathBuf>) -> PathBuf {
    cli_value
        .or_else(|| std::env::var_os("BIGITR_DAEMON_PIDFILE").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("/var/run/bigitrd.pid"))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config);
    let pid_path = resolve_pid_path(cli.pid_file);

    let daemon_config =
        DaemonConfig::load(&config_path).with_context(|| format!("loading daemon config {}", config_path.display()))?;
    let poll_frequency = daemon_config.poll_frequency().context("reading pollfrequency")?;
    let sync_frequency = daemon_config.sync_frequency().context("reading syncfrequency")?;

    let jobs = build_repository_jobs(&daemon_config).context("building repository jobs")?;
    if jobs.is_empty() {
        eprintln!("[bigitrd] no repositories configured, nothing to do");
        return Ok(());
    }

    let _pid_lock =
        PidLock::acquire(&pid_path, Duration::from_secs(10)).with_context(|| format!("acquiring pid lock {}", pid_path.display()))?;

    let mut daemon = Daemon::new(jobs, poll_frequency, sync_frequency).context("registering signal handlers")?;

    if cli.no_daemon {
        daemon.run_once(false);
        return Ok(());
    }

    daemon.main_loop().context("daemon loop")
}
