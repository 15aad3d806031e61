//! Notification backends.
//!
//! Each backend wraps one kernel notification mechanism. The set is closed,
//! so [`Backend`] dispatches by matching on the variant instead of going
//! through a trait object. Private state lives in the variant payload and
//! is released by `Drop`.

mod fanotify;
mod kernel;
mod userspace;

use std::os::fd::{BorrowedFd, RawFd};
use std::path::{Path, PathBuf};

use mntmon_common::constants::{PROC_FD_DIR, PROC_NS_MNT};
use mntmon_common::error::{MonitorError, Result};
use mntmon_common::types::{MonitorType, MountEvent};

use self::fanotify::MountNotify;
use self::kernel::KernelTable;
use self::userspace::UserspaceTable;

/// Verdict of a backend on a readiness notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EventAction {
    /// A real change; report it to the consumer.
    Accept,
    /// Spurious or self-generated; keep waiting.
    Ignore,
}

/// Mount namespace observed by a fanotify monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NamespaceScope {
    /// The namespace of the calling process (`/proc/self/ns/mnt`).
    #[default]
    Current,
    /// A namespace file descriptor owned by the caller.
    ///
    /// The descriptor must stay open while the monitor uses it; the
    /// monitor never closes it. It also identifies the entry, so one
    /// monitor can observe several namespaces.
    Fd(RawFd),
}

impl NamespaceScope {
    /// Entry identifier for this scope (`None` for the current namespace).
    #[must_use]
    pub const fn id(self) -> Option<RawFd> {
        match self {
            Self::Current => None,
            Self::Fd(fd) => Some(fd),
        }
    }

    /// Path reported for changes in this namespace.
    #[must_use]
    pub fn path(self) -> PathBuf {
        match self {
            Self::Current => PathBuf::from(PROC_NS_MNT),
            Self::Fd(fd) => PathBuf::from(format!("{PROC_FD_DIR}/{fd}")),
        }
    }
}

/// Backend state for one monitor entry.
#[derive(Debug)]
pub(crate) enum Backend {
    Kernel(KernelTable),
    Userspace(UserspaceTable),
    Fanotify(MountNotify),
}

impl Backend {
    pub(crate) const fn kernel() -> Self {
        Self::Kernel(KernelTable::new())
    }

    pub(crate) const fn userspace() -> Self {
        Self::Userspace(UserspaceTable::new())
    }

    /// Opens the namespace (for [`NamespaceScope::Current`]) and builds a
    /// fanotify backend for it. The group itself is created on first use.
    pub(crate) fn fanotify(scope: NamespaceScope) -> Result<Self> {
        match scope {
            NamespaceScope::Current => MountNotify::open(Path::new(PROC_NS_MNT)).map(Self::Fanotify),
            NamespaceScope::Fd(fd) if fd < 0 => Err(MonitorError::InvalidArgument {
                message: format!("invalid namespace descriptor {fd}"),
            }),
            NamespaceScope::Fd(fd) => Ok(Self::Fanotify(MountNotify::borrowed(fd))),
        }
    }

    /// Monitor type implemented by this backend.
    pub(crate) const fn kind(&self) -> MonitorType {
        match self {
            Self::Kernel(_) => MonitorType::Kernel,
            Self::Userspace(_) => MonitorType::Userspace,
            Self::Fanotify(_) => MonitorType::Fanotify,
        }
    }

    /// Returns the descriptor to register with epoll, opening it on first use.
    pub(crate) fn descriptor(&mut self, path: &Path) -> Result<BorrowedFd<'_>> {
        match self {
            Self::Kernel(b) => b.descriptor(path),
            Self::Userspace(b) => b.descriptor(path),
            Self::Fanotify(b) => b.descriptor(),
        }
    }

    /// Returns the descriptor if it is currently open.
    pub(crate) fn open_descriptor(&self) -> Option<BorrowedFd<'_>> {
        match self {
            Self::Kernel(b) => b.open_descriptor(),
            Self::Userspace(b) => b.open_descriptor(),
            Self::Fanotify(b) => b.open_descriptor(),
        }
    }

    /// Closes the descriptor; private state survives for the next open.
    pub(crate) fn close_descriptor(&mut self) {
        match self {
            Self::Kernel(b) => b.close_descriptor(),
            Self::Userspace(b) => b.close_descriptor(),
            Self::Fanotify(b) => b.close_descriptor(),
        }
    }

    /// Consumes a readiness notification.
    ///
    /// `veil` is the userspace "update in progress" marker when kernel
    /// events are veiled.
    pub(crate) fn process_event(&mut self, path: &Path, veil: Option<&Path>) -> Result<EventAction> {
        match self {
            Self::Kernel(b) => Ok(b.process_event(veil)),
            Self::Userspace(b) => b.process_event(path),
            Self::Fanotify(b) => b.process_event(veil),
        }
    }

    /// Returns the next detail record of the last accepted event.
    pub(crate) fn next_detail(&mut self) -> Result<Option<MountEvent>> {
        match self {
            Self::Fanotify(b) => Ok(b.next_detail()),
            Self::Kernel(_) | Self::Userspace(_) => Err(MonitorError::Unsupported { kind: self.kind() }),
        }
    }
}

/// Returns `true` when the veil marker exists, i.e. a userspace update is in flight.
fn veiled(veil: Option<&Path>) -> bool {
    veil.is_some_and(Path::exists)
}
