//! Userspace mount table monitor.
//!
//! Tools that update the userspace table (`/run/mount/utab`) write and
//! close `<utab>.event` after each update. This backend watches that file
//! with inotify. While the file (or any of its parent directories) does
//! not exist yet, the nearest existing parent directory is watched instead
//! and the watch moves down as the path gets created.

use std::os::fd::{AsFd, BorrowedFd};
use std::path::{Path, PathBuf};

use mntmon_common::constants::{EVENT_SUFFIX, with_suffix};
use mntmon_common::error::{MonitorError, Result};
use nix::errno::Errno;
use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify, WatchDescriptor};

use super::EventAction;

/// A watch added by [`UserspaceTable::add_watch`].
#[derive(Debug, Clone, Copy)]
struct Watch {
    wd: WatchDescriptor,
    /// The watch is on the event file itself, not on a parent directory.
    event_file: bool,
}

/// inotify instance and the path it currently watches.
#[derive(Debug, Default)]
pub(crate) struct UserspaceTable {
    inotify: Option<Inotify>,
    /// Last path a watch was added for (event file or a parent directory).
    watched: Option<PathBuf>,
}

impl UserspaceTable {
    pub(crate) const fn new() -> Self {
        Self {
            inotify: None,
            watched: None,
        }
    }

    pub(crate) fn descriptor(&mut self, path: &Path) -> Result<BorrowedFd<'_>> {
        if self.inotify.is_none() {
            tracing::debug!(path = %path.display(), "opening userspace monitor");
            let inotify = Inotify::init(InitFlags::IN_NONBLOCK | InitFlags::IN_CLOEXEC)
                .map_err(|e| MonitorError::os("inotify_init1", e))?;
            self.inotify = Some(inotify);

            if let Err(err) = self.add_watch(path) {
                tracing::debug!(error = %err, "failed to create userspace monitor");
                self.close_descriptor();
                return Err(err);
            }
        }
        self.open_descriptor().ok_or_else(|| MonitorError::InvalidArgument {
            message: "userspace monitor descriptor is not open".into(),
        })
    }

    pub(crate) fn open_descriptor(&self) -> Option<BorrowedFd<'_>> {
        self.inotify.as_ref().map(AsFd::as_fd)
    }

    /// Closes the inotify instance. Watches die with it, so the watched
    /// path is forgotten too.
    pub(crate) fn close_descriptor(&mut self) {
        self.inotify = None;
        self.watched = None;
    }

    /// Watches the event file, or the nearest existing parent directory.
    ///
    /// Returns `None` if the best possible watch is already in place.
    fn add_watch(&mut self, path: &Path) -> Result<Option<Watch>> {
        let Some(inotify) = self.inotify.as_ref() else {
            return Err(MonitorError::InvalidArgument {
                message: "userspace monitor descriptor is not open".into(),
            });
        };
        let event_file = with_suffix(path, EVENT_SUFFIX);

        // Already on the final file; stale directory events must not re-add it.
        if self.watched.as_deref() == Some(event_file.as_path()) {
            return Ok(None);
        }

        match inotify.add_watch(
            event_file.as_path(),
            AddWatchFlags::IN_CLOSE_WRITE | AddWatchFlags::IN_DELETE_SELF,
        ) {
            Ok(wd) => {
                tracing::debug!(path = %event_file.display(), "added inotify watch");
                self.watched = Some(event_file);
                return Ok(Some(Watch {
                    wd,
                    event_file: true,
                }));
            }
            Err(Errno::ENOENT) => {}
            Err(e) => return Err(MonitorError::os(format!("inotify_add_watch({})", event_file.display()), e)),
        }

        let mut dir = event_file;
        while dir.pop() && dir.parent().is_some() {
            if self.watched.as_deref() == Some(dir.as_path()) {
                break;
            }
            match inotify.add_watch(
                dir.as_path(),
                AddWatchFlags::IN_CREATE | AddWatchFlags::IN_ISDIR | AddWatchFlags::IN_DELETE_SELF,
            ) {
                Ok(wd) => {
                    tracing::debug!(path = %dir.display(), "added inotify watch");
                    self.watched = Some(dir);
                    return Ok(Some(Watch {
                        wd,
                        event_file: false,
                    }));
                }
                Err(Errno::ENOENT) => {}
                Err(e) => return Err(MonitorError::os(format!("inotify_add_watch({})", dir.display()), e)),
            }
        }
        Ok(None)
    }

    /// Drains the inotify queue.
    ///
    /// Accepts when the event file was closed after writing, or when it has
    /// just appeared and is now watched directly.
    pub(crate) fn process_event(&mut self, path: &Path) -> Result<EventAction> {
        let mut action = EventAction::Ignore;
        tracing::debug!("processing utab event");

        loop {
            let Some(inotify) = self.inotify.as_ref() else {
                return Err(MonitorError::InvalidArgument {
                    message: "userspace monitor descriptor is not open".into(),
                });
            };
            let events = match inotify.read_events() {
                Ok(events) if events.is_empty() => break,
                Ok(events) => events,
                Err(Errno::EAGAIN) => break,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(MonitorError::os("read(inotify)", e)),
            };

            for event in events {
                tracing::trace!(mask = ?event.mask, name = ?event.name, "inotify event");

                if event.mask.contains(AddWatchFlags::IN_CLOSE_WRITE) {
                    action = EventAction::Accept;
                    continue;
                }
                if event.mask.contains(AddWatchFlags::IN_DELETE_SELF) {
                    tracing::debug!("resetting watch");
                    self.watched = None;
                }

                match self.add_watch(path) {
                    Ok(Some(watch)) => {
                        if watch.event_file {
                            action = EventAction::Accept;
                        }
                        if watch.wd != event.wd {
                            self.remove_watch(event.wd);
                        }
                    }
                    Ok(None) => {}
                    Err(err) => tracing::warn!(error = %err, "failed to update utab watch"),
                }
            }
        }

        tracing::debug!(?action, "utab event processed");
        Ok(action)
    }

    fn remove_watch(&self, wd: WatchDescriptor) {
        if let Some(inotify) = self.inotify.as_ref() {
            tracing::debug!(?wd, "removing watch");
            // The kernel drops watches of deleted paths on its own.
            if let Err(e) = inotify.rm_watch(wd) {
                tracing::trace!(?wd, error = %e, "watch already gone");
            }
        }
    }
}
