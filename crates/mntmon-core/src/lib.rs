//! # mntmon-core
//!
//! Mount table change notification for Linux.
//!
//! A [`Monitor`] aggregates up to three kinds of notification sources
//! behind a single epoll descriptor:
//! - **Kernel table**: readiness of `/proc/self/mountinfo`.
//! - **Userspace table**: inotify on the `utab` event file.
//! - **Mount notifications**: fanotify attach/detach records for a mount
//!   namespace (Linux 6.15+), with per-mount details.
//!
//! ```no_run
//! use std::time::Duration;
//! use mntmon_core::{Monitor, WaitStatus};
//!
//! # fn main() -> mntmon_common::error::Result<()> {
//! let monitor = Monitor::new();
//! monitor.enable_kernel(true)?;
//!
//! while monitor.wait(None)? == WaitStatus::Changed {
//!     while let Some(change) = monitor.next_change()? {
//!         tracing::info!(path = %change.path.display(), "change detected");
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! All unsafe system calls are encapsulated in safe wrappers with
//! `// SAFETY:` documentation.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod backend;
mod entry;
pub mod monitor;

pub use backend::NamespaceScope;
pub use mntmon_common::types::{Change, MonitorType, MountEvent, MountStatus};
pub use monitor::{Monitor, WaitStatus};
