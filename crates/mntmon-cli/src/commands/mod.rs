//! CLI command definitions and dispatch.

pub mod epoll;
pub mod wait;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use mntmon_common::config::MonitorConfig;
use mntmon_core::Monitor;

/// Poll interval used to notice Ctrl+C between waits.
pub const TICK: Duration = Duration::from_millis(500);

/// mntmon: watch the kernel and userspace mount tables for changes.
#[derive(Parser, Debug)]
#[command(name = "mntmon", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Block in the monitor's own wait loop and print changes.
    Wait(wait::WaitArgs),
    /// Embed the monitor descriptor into a separate epoll loop.
    Epoll(epoll::EpollArgs),
}

/// A notification source named on the command line.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// The userspace mount table (utab).
    Userspace,
    /// The kernel mount table (/proc/self/mountinfo).
    #[value(alias = "mountinfo")]
    Kernel,
    /// fanotify mount attach/detach notifications.
    Fanotify,
    /// Ignore kernel events duplicated by userspace updates.
    Veil,
}

/// Source selection shared by all subcommands.
#[derive(Args, Debug, Default)]
pub struct SourceArgs {
    /// Sources to monitor.
    #[arg(value_enum)]
    pub sources: Vec<Source>,

    /// Userspace mount table path (defaults to $LIBMOUNT_UTAB or /run/mount/utab).
    #[arg(long, value_name = "PATH")]
    pub utab: Option<PathBuf>,

    /// Mount namespace descriptor for the fanotify source.
    #[arg(long, value_name = "FD")]
    pub namespace_fd: Option<i32>,

    /// JSON monitor configuration, merged with the sources above.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print changes as JSON lines.
    #[arg(long)]
    pub json: bool,
}

impl SourceArgs {
    /// Builds the monitor configuration from the file and the flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file cannot be loaded.
    pub fn to_config(&self) -> anyhow::Result<MonitorConfig> {
        let mut config = match &self.config {
            Some(path) => MonitorConfig::load(path)?,
            None => MonitorConfig::default(),
        };
        for source in &self.sources {
            match source {
                Source::Userspace => config.userspace = true,
                Source::Kernel => config.kernel = true,
                Source::Fanotify => config.fanotify = true,
                Source::Veil => config.veil_kernel = true,
            }
        }
        if self.utab.is_some() {
            config.utab_path.clone_from(&self.utab);
        }
        if self.namespace_fd.is_some() {
            config.namespace_fd = self.namespace_fd;
        }
        Ok(config)
    }

    /// Creates and enables the monitor described by the flags.
    ///
    /// # Errors
    ///
    /// Returns an error if no source is selected or a source fails to start.
    pub fn monitor(&self) -> anyhow::Result<Monitor> {
        let config = self.to_config()?;
        tracing::debug!(?config, "creating monitor");
        Ok(Monitor::from_config(&config)?)
    }
}

/// Installs a Ctrl+C handler and returns the "keep running" flag.
///
/// # Errors
///
/// Returns an error if the handler cannot be installed.
pub fn running_flag() -> anyhow::Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {e}"))?;
    Ok(running)
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Wait(args) => wait::execute(&args),
        Command::Epoll(args) => epoll::execute(&args),
    }
}
