//! The mount table monitor.
//!
//! A [`Monitor`] owns a list of entries (one per enabled notification
//! source) and one epoll instance that multiplexes their descriptors. The
//! epoll descriptor is created lazily by [`Monitor::descriptor`] or
//! [`Monitor::wait`], and from then on always holds exactly the descriptors
//! of the enabled entries.
//!
//! Consumers either block in [`Monitor::wait`], or put the descriptor into
//! their own event loop. After readiness they call
//! [`Monitor::next_change`] until it returns `None` (or
//! [`Monitor::event_cleanup`] to discard the changes).
//!
//! A `Monitor` is a shared handle: cloning it retains the same monitor and
//! the last dropped clone releases every descriptor. It is neither `Send`
//! nor `Sync`; all holders live on one thread and take turns.

use std::cell::RefCell;
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};

use mntmon_common::config::MonitorConfig;
use mntmon_common::constants::{self, ACTIVE_SUFFIX, PROC_MOUNTINFO};
use mntmon_common::error::{MonitorError, Result};
use mntmon_common::types::{Change, MonitorType, MountEvent};
use nix::errno::Errno;
use nix::poll::PollTimeout;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags};

use crate::backend::{Backend, EventAction, NamespaceScope};
use crate::entry::Entry;

/// Outcome of [`Monitor::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// Something changed; call [`Monitor::next_change`] for details.
    Changed,
    /// The timeout expired without a change.
    TimedOut,
}

/// Shared handle to a mount table monitor.
#[derive(Debug, Clone, Default)]
pub struct Monitor {
    inner: Rc<RefCell<MonitorInner>>,
}

impl Monitor {
    /// Creates a monitor with no entries and no descriptor.
    #[must_use]
    pub fn new() -> Self {
        tracing::debug!("monitor allocated");
        Self::default()
    }

    /// Creates a monitor and enables the sources named by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a source
    /// cannot be enabled.
    pub fn from_config(config: &MonitorConfig) -> Result<Self> {
        config.validate()?;
        let monitor = Self::new();
        monitor.veil_kernel(config.veil_kernel);

        if config.userspace {
            monitor.enable_userspace(true, config.utab_path.as_deref())?;
        }
        // fanotify first, so a veiled monitor can skip the kernel table.
        if config.fanotify {
            let scope = config
                .namespace_fd
                .map_or(NamespaceScope::Current, NamespaceScope::Fd);
            monitor.enable_fanotify(true, scope)?;
        }
        if config.kernel {
            monitor.enable_kernel(true)?;
        }
        Ok(monitor)
    }

    /// Number of handles sharing this monitor.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    /// Ignores kernel events while a userspace table update is in progress.
    ///
    /// Mount tools that maintain the userspace table produce a userspace
    /// event after their kernel change; veiling suppresses the duplicate.
    /// While veiled, enabling the kernel table is skipped if fanotify is
    /// already enabled.
    pub fn veil_kernel(&self, enable: bool) {
        self.inner.borrow_mut().veiled = enable;
        tracing::debug!(veiled = enable, "kernel veil updated");
    }

    /// Enables or disables monitoring of `/proc/self/mountinfo`.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be opened or registered.
    pub fn enable_kernel(&self, enable: bool) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if enable && inner.veiled && inner.has_enabled(MonitorType::Fanotify) {
            tracing::debug!("kernel monitor skipped: veiled and fanotify enabled");
            return Ok(());
        }
        inner.enable_entry(MonitorType::Kernel, None, enable, || {
            Ok(Entry::new(
                Backend::kernel(),
                PathBuf::from(PROC_MOUNTINFO),
                EpollFlags::EPOLLIN | EpollFlags::EPOLLET,
            ))
        })
    }

    /// Enables or disables monitoring of the userspace mount table.
    ///
    /// `path` overrides the table location and is only used when the entry
    /// is first created. Only one userspace entry exists per monitor.
    ///
    /// # Errors
    ///
    /// Returns an error if inotify cannot be set up or registered.
    pub fn enable_userspace(&self, enable: bool, path: Option<&Path>) -> Result<()> {
        let path = path.map_or_else(constants::utab_path, Path::to_path_buf);
        self.inner
            .borrow_mut()
            .enable_entry(MonitorType::Userspace, None, enable, || {
                Ok(Entry::new(Backend::userspace(), path, EpollFlags::EPOLLIN))
            })
    }

    /// Enables or disables fanotify mount notifications for a namespace.
    ///
    /// Each namespace scope is a separate entry. Changes are reported with
    /// the namespace path (`/proc/self/ns/mnt` or `/proc/self/fd/<fd>`),
    /// and [`Monitor::next_event_detail`] lists the affected mounts.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace cannot be opened, or the fanotify
    /// group cannot be created, marked, or registered.
    pub fn enable_fanotify(&self, enable: bool, scope: NamespaceScope) -> Result<()> {
        self.inner
            .borrow_mut()
            .enable_entry(MonitorType::Fanotify, scope.id(), enable, || {
                let backend = Backend::fanotify(scope)?;
                Ok(Entry::new(backend, scope.path(), EpollFlags::EPOLLIN))
            })
    }

    /// Returns the monitor's epoll descriptor, creating it on first call.
    ///
    /// The descriptor is readable whenever a change is pending and may be
    /// embedded into another event loop. It stays valid until
    /// [`Monitor::close_descriptor`] or until the last handle is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if epoll cannot be created or an enabled entry
    /// cannot be registered. The monitor is left without a descriptor, so
    /// a later call retries from scratch.
    pub fn descriptor(&self) -> Result<RawFd> {
        self.inner.borrow_mut().descriptor()
    }

    /// Closes the epoll descriptor and every entry descriptor.
    ///
    /// Entries stay enabled; the next [`Monitor::descriptor`] or
    /// [`Monitor::wait`] opens and registers them again.
    pub fn close_descriptor(&self) {
        self.inner.borrow_mut().close_descriptor();
    }

    /// Waits for the next change.
    ///
    /// `None` blocks indefinitely; `Some(Duration::ZERO)` polls once.
    /// Returns at once while a change read earlier is still pending.
    /// Spurious events are consumed without returning, and the remaining
    /// time is recomputed after each of them.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor cannot be created, `epoll_wait`
    /// fails (including `EINTR`), or a backend fails to read its event.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<WaitStatus> {
        let mut inner = self.inner.borrow_mut();
        let _ = inner.descriptor()?;
        if inner.entries.iter().any(|e| e.active) {
            return Ok(WaitStatus::Changed);
        }
        match inner.read_event(timeout)? {
            Some(_) => Ok(WaitStatus::Changed),
            None => Ok(WaitStatus::TimedOut),
        }
    }

    /// Returns the next pending change without blocking.
    ///
    /// Each change is returned once. The returned entry becomes the
    /// subject of [`Monitor::next_event_detail`].
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::InvalidArgument`] if the descriptor has not
    /// been created, or an OS error if reading the event fails.
    pub fn next_change(&self) -> Result<Option<Change>> {
        self.inner.borrow_mut().next_change()
    }

    /// Discards all pending changes.
    ///
    /// Use this after readiness when only "something changed" matters.
    ///
    /// # Errors
    ///
    /// Same as [`Monitor::next_change`].
    pub fn event_cleanup(&self) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        while inner.next_change()?.is_some() {}
        Ok(())
    }

    /// Returns the next mount affected by the last reported change.
    ///
    /// `Ok(None)` means the change has no more records.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::NoPriorEvent`] if no change has been
    /// reported, and [`MonitorError::Unsupported`] if the reporting entry
    /// is not a fanotify monitor.
    pub fn next_event_detail(&self) -> Result<Option<MountEvent>> {
        let mut inner = self.inner.borrow_mut();
        let idx = inner.last.ok_or(MonitorError::NoPriorEvent)?;
        inner.entries[idx].backend.next_detail()
    }
}

/// State shared by all handles of a monitor.
#[derive(Debug, Default)]
struct MonitorInner {
    /// Registration order; indexes are epoll tokens and never change.
    entries: Vec<Entry>,
    epoll: Option<Epoll>,
    /// Entry returned by the last successful `next_change`.
    last: Option<usize>,
    veiled: bool,
}

/// Upper bound for one `epoll_wait`; longer timeouts wait in steps.
const MAX_WAIT_STEP_MS: u16 = u16::MAX;

fn poll_timeout(remaining: Option<Duration>) -> PollTimeout {
    remaining.map_or(PollTimeout::NONE, |d| {
        // Round up so a sub-millisecond remainder still sleeps.
        let ms = d.as_micros().div_ceil(1000);
        PollTimeout::from(u16::try_from(ms).unwrap_or(MAX_WAIT_STEP_MS))
    })
}

fn not_initialized() -> MonitorError {
    MonitorError::InvalidArgument {
        message: "monitor descriptor is not initialized".into(),
    }
}

impl MonitorInner {
    fn has_enabled(&self, kind: MonitorType) -> bool {
        self.entries.iter().any(|e| e.enabled && e.kind() == kind)
    }

    /// Marker file that exists while a userspace update is in progress,
    /// if kernel events are veiled.
    fn veil_marker(&self) -> Option<PathBuf> {
        if !self.veiled {
            return None;
        }
        let utab = self
            .entries
            .iter()
            .find(|e| e.kind() == MonitorType::Userspace)
            .map_or_else(constants::utab_path, |e| e.path.clone());
        Some(constants::with_suffix(&utab, ACTIVE_SUFFIX))
    }

    fn resolve(&self, token: u64) -> Result<usize> {
        usize::try_from(token)
            .ok()
            .filter(|idx| *idx < self.entries.len())
            .ok_or_else(|| MonitorError::os(format!("epoll returned unknown entry {token}"), Errno::EINVAL))
    }

    fn process(&mut self, idx: usize) -> Result<EventAction> {
        let veil = self.veil_marker();
        let entry = &mut self.entries[idx];
        entry.backend.process_event(&entry.path, veil.as_deref())
    }

    fn enable_entry(
        &mut self,
        kind: MonitorType,
        id: Option<RawFd>,
        enable: bool,
        create: impl FnOnce() -> Result<Entry>,
    ) -> Result<()> {
        if let Some(idx) = self.entries.iter().position(|e| e.matches(kind, id)) {
            let rc = self.modify_epoll(idx, enable);
            if !enable {
                self.entries[idx].backend.close_descriptor();
            }
            return rc;
        }
        if !enable {
            return Ok(());
        }

        tracing::debug!(%kind, "allocating new monitor entry");
        self.entries.push(create()?.with_id(id));
        let idx = self.entries.len() - 1;
        if let Err(err) = self.modify_epoll(idx, true) {
            self.entries.truncate(idx);
            tracing::debug!(%kind, error = %err, "failed to allocate monitor entry");
            return Err(err);
        }
        Ok(())
    }

    /// Adds or removes one entry to/from epoll.
    ///
    /// Only flips the flags when no epoll descriptor exists yet.
    fn modify_epoll(&mut self, idx: usize, enable: bool) -> Result<()> {
        let entry = &mut self.entries[idx];
        entry.enabled = enable;
        entry.active = false;

        let Some(epoll) = self.epoll.as_ref() else {
            return Ok(());
        };

        if enable {
            let events = entry.events;
            let fd = entry.backend.descriptor(&entry.path)?;
            tracing::debug!(fd = fd.as_raw_fd(), path = %entry.path.display(), "add fd");

            match epoll.add(fd, EpollEvent::new(events, idx as u64)) {
                Ok(()) | Err(Errno::EEXIST) => {}
                Err(e) => return Err(MonitorError::os("epoll_ctl(ADD)", e)),
            }
            if entry.drains_on_enable() {
                self.drain_enable_events(idx)?;
            }
        } else if let Some(fd) = entry.backend.open_descriptor() {
            tracing::debug!(fd = fd.as_raw_fd(), path = %entry.path.display(), "remove fd");
            match epoll.delete(fd) {
                Ok(()) | Err(Errno::ENOENT) => {}
                Err(e) => return Err(MonitorError::os("epoll_ctl(DEL)", e)),
            }
        }
        Ok(())
    }

    /// Discards readiness generated by registering entry `idx` (the kernel
    /// reports the initial state of a freshly opened mountinfo).
    ///
    /// Readiness of other entries is left pending: level-triggered ones
    /// stay readable, edge-triggered ones are re-armed. Stops at the first
    /// repeated token.
    fn drain_enable_events(&mut self, idx: usize) -> Result<()> {
        let mut seen = Vec::new();
        loop {
            let Some(epoll) = self.epoll.as_ref() else {
                return Ok(());
            };
            let mut events = [EpollEvent::empty()];
            let ready = epoll
                .wait(&mut events, PollTimeout::ZERO)
                .map_err(|e| MonitorError::os("epoll_wait", e))?;
            if ready == 0 {
                return Ok(());
            }

            let token = events[0].data();
            if seen.contains(&token) {
                return Ok(());
            }
            seen.push(token);

            let other = self.resolve(token)?;
            if other == idx {
                tracing::trace!(idx, "drained initial event");
                continue;
            }
            self.rearm(other)?;
        }
    }

    /// Puts back readiness that a drain pass took from an edge-triggered entry.
    fn rearm(&self, idx: usize) -> Result<()> {
        let entry = &self.entries[idx];
        if !entry.events.contains(EpollFlags::EPOLLET) {
            return Ok(());
        }
        let (Some(epoll), Some(fd)) = (self.epoll.as_ref(), entry.backend.open_descriptor()) else {
            return Ok(());
        };
        tracing::trace!(idx, "re-arming pending event");
        let mut event = EpollEvent::new(entry.events, idx as u64);
        epoll
            .modify(fd, &mut event)
            .map_err(|e| MonitorError::os("epoll_ctl(MOD)", e))
    }

    fn descriptor(&mut self) -> Result<RawFd> {
        if let Some(epoll) = self.epoll.as_ref() {
            return Ok(epoll.0.as_raw_fd());
        }

        tracing::debug!("creating top-level monitor fd");
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)
            .map_err(|e| MonitorError::os("epoll_create1", e))?;
        let fd = epoll.0.as_raw_fd();
        self.epoll = Some(epoll);

        tracing::debug!(fd, "adding monitor entries to epoll");
        for idx in 0..self.entries.len() {
            if !self.entries[idx].enabled {
                continue;
            }
            if let Err(err) = self.modify_epoll(idx, true) {
                self.epoll = None;
                tracing::debug!(error = %err, "failed to create monitor");
                return Err(err);
            }
        }

        tracing::debug!(fd, "monitor created");
        Ok(fd)
    }

    fn close_descriptor(&mut self) {
        for entry in &mut self.entries {
            if let (Some(epoll), Some(fd)) = (self.epoll.as_ref(), entry.backend.open_descriptor()) {
                match epoll.delete(fd) {
                    Ok(()) | Err(Errno::ENOENT) => {}
                    Err(e) => tracing::warn!(path = %entry.path.display(), error = %e, "failed to remove fd"),
                }
            }
            entry.active = false;
            entry.backend.close_descriptor();
        }
        if self.epoll.take().is_some() {
            tracing::debug!("closed top-level monitor fd");
        }
        self.last = None;
    }

    /// Single read-and-classify pass: returns the index of the entry with
    /// an accepted event, or `None` on timeout.
    fn read_event(&mut self, timeout: Option<Duration>) -> Result<Option<usize>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let epoll = self.epoll.as_ref().ok_or_else(not_initialized)?;
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            let mut events = [EpollEvent::empty()];

            tracing::trace!(timeout = ?remaining, "calling epoll_wait");
            let ready = epoll
                .wait(&mut events, poll_timeout(remaining))
                .map_err(|e| MonitorError::os("epoll_wait", e))?;

            if ready == 0 {
                if deadline.is_some_and(|d| Instant::now() < d) {
                    continue;
                }
                tracing::trace!("nothing");
                return Ok(None);
            }

            let idx = self.resolve(events[0].data())?;
            match self.process(idx)? {
                EventAction::Accept => {
                    self.entries[idx].active = true;
                    return Ok(Some(idx));
                }
                EventAction::Ignore => tracing::trace!(idx, "event ignored"),
            }
        }
    }

    fn next_change(&mut self) -> Result<Option<Change>> {
        if self.epoll.is_none() {
            return Err(not_initialized());
        }
        self.last = None;

        let idx = match self.entries.iter().position(|e| e.active) {
            Some(idx) => idx,
            None => match self.read_event(Some(Duration::ZERO))? {
                Some(idx) => idx,
                None => return Ok(None),
            },
        };

        let entry = &mut self.entries[idx];
        entry.active = false;
        self.last = Some(idx);

        tracing::debug!(path = %entry.path.display(), kind = %entry.kind(), "change detected");
        Ok(Some(Change {
            path: entry.path.clone(),
            kind: entry.kind(),
        }))
    }
}

impl Drop for MonitorInner {
    fn drop(&mut self) {
        self.close_descriptor();
        tracing::debug!(entries = self.entries.len(), "monitor released");
    }
}
