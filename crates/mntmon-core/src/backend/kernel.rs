//! Kernel mount table monitor.
//!
//! `/proc/self/mountinfo` becomes ready (`EPOLLERR | EPOLLPRI`) whenever
//! the mount table of the namespace changes. The file is registered
//! edge-triggered, so nothing has to be read to acknowledge an event.

use std::fs::File;
use std::os::fd::{AsFd, BorrowedFd};
use std::path::Path;

use mntmon_common::error::{MonitorError, Result};

use super::EventAction;

/// Open handle on the kernel mount table.
#[derive(Debug, Default)]
pub(crate) struct KernelTable {
    file: Option<File>,
}

impl KernelTable {
    pub(crate) const fn new() -> Self {
        Self { file: None }
    }

    pub(crate) fn descriptor(&mut self, path: &Path) -> Result<BorrowedFd<'_>> {
        if self.file.is_none() {
            tracing::debug!(path = %path.display(), "opening kernel monitor");
            let file = File::open(path).map_err(|e| MonitorError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;
            self.file = Some(file);
        }
        self.open_descriptor().ok_or_else(|| MonitorError::InvalidArgument {
            message: "kernel monitor descriptor is not open".into(),
        })
    }

    pub(crate) fn open_descriptor(&self) -> Option<BorrowedFd<'_>> {
        self.file.as_ref().map(AsFd::as_fd)
    }

    pub(crate) fn close_descriptor(&mut self) {
        self.file = None;
    }

    pub(crate) fn process_event(&self, veil: Option<&Path>) -> EventAction {
        if super::veiled(veil) {
            tracing::debug!("kernel event veiled");
            return EventAction::Ignore;
        }
        EventAction::Accept
    }
}
