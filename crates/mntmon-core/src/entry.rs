//! Monitor entries: one registered notification source each.

use std::os::fd::RawFd;
use std::path::PathBuf;

use mntmon_common::types::MonitorType;
use nix::sys::epoll::EpollFlags;

use crate::backend::Backend;

/// A backend bound to its wanted epoll events and registration state.
#[derive(Debug)]
pub(crate) struct Entry {
    /// External identifier distinguishing entries of the same type.
    pub(crate) id: Option<RawFd>,
    /// Path reported by `next_change` for this entry.
    pub(crate) path: PathBuf,
    /// Events requested from epoll.
    pub(crate) events: EpollFlags,
    pub(crate) backend: Backend,
    /// Registered with the monitor's epoll instance.
    pub(crate) enabled: bool,
    /// Holds an accepted event not yet returned by `next_change`.
    pub(crate) active: bool,
}

impl Entry {
    pub(crate) const fn new(backend: Backend, path: PathBuf, events: EpollFlags) -> Self {
        Self {
            id: None,
            path,
            events,
            backend,
            enabled: false,
            active: false,
        }
    }

    #[must_use]
    pub(crate) fn with_id(mut self, id: Option<RawFd>) -> Self {
        self.id = id;
        self
    }

    pub(crate) const fn kind(&self) -> MonitorType {
        self.backend.kind()
    }

    pub(crate) fn matches(&self, kind: MonitorType, id: Option<RawFd>) -> bool {
        self.kind() == kind && self.id == id
    }

    /// Whether registration must be followed by a drain of self-generated events.
    pub(crate) fn drains_on_enable(&self) -> bool {
        self.events.intersects(EpollFlags::EPOLLIN | EpollFlags::EPOLLET)
    }
}
