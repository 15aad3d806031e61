//! `mntmon epoll`: Embed the monitor descriptor into a separate epoll loop.

use std::os::fd::BorrowedFd;
use std::sync::atomic::Ordering;

use clap::Args;
use nix::errno::Errno;
use nix::poll::PollTimeout;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags};

use super::{SourceArgs, TICK};

/// Token for the monitor descriptor in the outer epoll set.
const MONITOR_TOKEN: u64 = 1;

/// Arguments for the `epoll` command.
#[derive(Args, Debug)]
pub struct EpollArgs {
    /// Discard changes instead of listing them.
    #[arg(long)]
    pub cleanup: bool,

    /// Sources and output options.
    #[command(flatten)]
    pub sources: SourceArgs,
}

/// Executes the `epoll` command.
///
/// Registers the monitor descriptor in an epoll instance owned by this
/// command. On readiness it either lists the changes or, with
/// `--cleanup`, discards them.
///
/// # Errors
///
/// Returns an error if the monitor or the epoll set cannot be created,
/// or reading changes fails.
#[allow(unsafe_code)]
pub fn execute(args: &EpollArgs) -> anyhow::Result<()> {
    let monitor = args.sources.monitor()?;
    let running = super::running_flag()?;

    let raw = monitor.descriptor()?;
    let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)
        .map_err(|e| anyhow::anyhow!("failed to create epoll: {e}"))?;
    // SAFETY: `monitor` owns the descriptor and outlives this borrow;
    // nothing closes it while the loop runs.
    let fd = unsafe { BorrowedFd::borrow_raw(raw) };
    epoll
        .add(fd, EpollEvent::new(EpollFlags::EPOLLIN, MONITOR_TOKEN))
        .map_err(|e| anyhow::anyhow!("failed to add fd to epoll: {e}"))?;

    let timeout = u16::try_from(TICK.as_millis()).map_or(PollTimeout::MAX, PollTimeout::from);
    eprintln!("waiting for changes...");
    while running.load(Ordering::SeqCst) {
        let mut events = [EpollEvent::empty()];
        let n = match epoll.wait(&mut events, timeout) {
            Ok(n) => n,
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(anyhow::anyhow!("polling error: {e}")),
        };
        if n == 0 || events[0].data() != MONITOR_TOKEN {
            continue;
        }

        eprintln!(" top-level FD active");
        if args.cleanup {
            monitor.event_cleanup()?;
        } else {
            super::wait::print_changes(&monitor, args.sources.json)?;
        }
        eprintln!("waiting for changes...");
    }

    tracing::debug!("interrupted, releasing monitor");
    Ok(())
}
