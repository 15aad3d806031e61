//! `mntmon wait`: Block in the monitor's wait loop.

use std::sync::atomic::Ordering;

use clap::Args;
use mntmon_core::{Monitor, MonitorType, WaitStatus};
use nix::errno::Errno;

use super::{SourceArgs, TICK};
use crate::output::ChangeRecord;

/// Arguments for the `wait` command.
#[derive(Args, Debug)]
pub struct WaitArgs {
    /// Sources and output options.
    #[command(flatten)]
    pub sources: SourceArgs,
}

/// Executes the `wait` command.
///
/// Waits for changes until Ctrl+C and prints every change reported by
/// the monitor.
///
/// # Errors
///
/// Returns an error if the monitor cannot be created or waiting fails.
pub fn execute(args: &WaitArgs) -> anyhow::Result<()> {
    let monitor = args.sources.monitor()?;
    let running = super::running_flag()?;

    eprintln!("waiting for changes...");
    while running.load(Ordering::SeqCst) {
        match monitor.wait(Some(TICK)) {
            Ok(WaitStatus::TimedOut) => continue,
            Ok(WaitStatus::Changed) => {}
            Err(e) if e.errno() == Some(Errno::EINTR) => continue,
            Err(e) => return Err(e.into()),
        }
        eprintln!("notification detected");
        print_changes(&monitor, args.sources.json)?;
        eprintln!("waiting for changes...");
    }

    tracing::debug!("interrupted, releasing monitor");
    Ok(())
}

/// Prints every pending change, with mount records for fanotify changes.
///
/// # Errors
///
/// Returns an error if reading a change or its records fails.
pub fn print_changes(monitor: &Monitor, json: bool) -> anyhow::Result<()> {
    while let Some(change) = monitor.next_change()? {
        let mut mounts = Vec::new();
        if change.kind == MonitorType::Fanotify {
            while let Some(event) = monitor.next_event_detail()? {
                mounts.push(event);
            }
        }
        println!("{}", ChangeRecord::new(change, mounts).render(json)?);
    }
    Ok(())
}
