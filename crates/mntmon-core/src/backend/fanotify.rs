//! Mount attach/detach monitor based on fanotify (Linux 6.15+).
//!
//! A fanotify group created with `FAN_REPORT_MNT` and marked on a mount
//! namespace reports one record per attached, detached, or moved mount.
//! Each record carries the unique mount ID in a `fanotify_event_info_mnt`
//! trailer. Records are buffered by [`MountNotify::process_event`] and
//! handed out one at a time by [`MountNotify::next_detail`].

use std::ffi::c_uint;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;

use mntmon_common::error::{MonitorError, Result};
use mntmon_common::types::{MountEvent, MountStatus};
use nix::errno::Errno;

use super::EventAction;

const FAN_CLOEXEC: c_uint = 0x0000_0001;
const FAN_NONBLOCK: c_uint = 0x0000_0002;
const FAN_REPORT_MNT: c_uint = 0x0000_4000;

const FAN_MARK_ADD: c_uint = 0x0000_0001;
const FAN_MARK_MNTNS: c_uint = 0x0000_0110;

const FAN_MNT_ATTACH: u64 = 0x0100_0000;
const FAN_MNT_DETACH: u64 = 0x0200_0000;

const FANOTIFY_METADATA_VERSION: u8 = 3;

/// `sizeof(struct fanotify_event_metadata)`.
const METADATA_LEN: usize = 24;
/// `sizeof(struct fanotify_event_info_mnt)`: 4-byte header, padding, `u64` mount ID.
const MNT_INFO_LEN: usize = 16;
const MNT_ID_OFFSET: usize = 8;

const BUFFER_SIZE: usize = 8192;

/// Namespace descriptor the fanotify mark is placed on.
#[derive(Debug)]
enum Namespace {
    /// Opened by the monitor; closed with the entry.
    Owned(OwnedFd),
    /// Supplied by the caller; never closed here.
    Borrowed(RawFd),
}

impl Namespace {
    fn raw(&self) -> RawFd {
        match self {
            Self::Owned(fd) => fd.as_raw_fd(),
            Self::Borrowed(fd) => *fd,
        }
    }
}

/// fanotify group, namespace, and the buffer of the last accepted event.
#[derive(Debug)]
pub(crate) struct MountNotify {
    namespace: Namespace,
    group: Option<File>,
    buf: Vec<u8>,
    /// First unprocessed byte in `buf`.
    pos: usize,
    /// End of valid data in `buf`.
    len: usize,
}

impl MountNotify {
    /// Opens `ns_path` and monitors that namespace.
    pub(crate) fn open(ns_path: &Path) -> Result<Self> {
        let file = File::open(ns_path).map_err(|e| MonitorError::Io {
            path: ns_path.to_path_buf(),
            source: e,
        })?;
        Ok(Self::with_namespace(Namespace::Owned(OwnedFd::from(file))))
    }

    /// Monitors the namespace behind a caller-owned descriptor.
    pub(crate) fn borrowed(ns_fd: RawFd) -> Self {
        Self::with_namespace(Namespace::Borrowed(ns_fd))
    }

    fn with_namespace(namespace: Namespace) -> Self {
        Self {
            namespace,
            group: None,
            buf: vec![0; BUFFER_SIZE],
            pos: 0,
            len: 0,
        }
    }

    pub(crate) fn descriptor(&mut self) -> Result<BorrowedFd<'_>> {
        if self.group.is_none() {
            let ns_fd = self.namespace.raw();
            tracing::debug!(ns_fd, "opening fanotify");

            // SAFETY: fanotify_init has no memory-safety preconditions.
            let fd = unsafe { libc::fanotify_init(FAN_REPORT_MNT | FAN_CLOEXEC | FAN_NONBLOCK, 0) };
            if fd < 0 {
                return Err(MonitorError::os("fanotify_init", Errno::last()));
            }
            // SAFETY: fd was just returned by fanotify_init and is owned by nobody else.
            let group = unsafe { OwnedFd::from_raw_fd(fd) };

            // SAFETY: group and ns_fd are open descriptors; a null path is
            // valid for namespace marks, which only use the dirfd.
            let rc = unsafe {
                libc::fanotify_mark(
                    group.as_raw_fd(),
                    FAN_MARK_ADD | FAN_MARK_MNTNS,
                    FAN_MNT_ATTACH | FAN_MNT_DETACH,
                    ns_fd,
                    std::ptr::null(),
                )
            };
            if rc < 0 {
                let err = Errno::last();
                tracing::debug!(error = %err, "failed to open fanotify");
                return Err(MonitorError::os("fanotify_mark", err));
            }
            self.group = Some(File::from(group));
        }
        self.open_descriptor().ok_or_else(|| MonitorError::InvalidArgument {
            message: "fanotify descriptor is not open".into(),
        })
    }

    pub(crate) fn open_descriptor(&self) -> Option<BorrowedFd<'_>> {
        self.group.as_ref().map(AsFd::as_fd)
    }

    pub(crate) fn close_descriptor(&mut self) {
        self.group = None;
        self.reset();
    }

    fn reset(&mut self) {
        self.pos = 0;
        self.len = 0;
    }

    /// Reads one buffer of records from the group.
    pub(crate) fn process_event(&mut self, veil: Option<&Path>) -> Result<EventAction> {
        self.reset();
        let Some(group) = self.group.as_mut() else {
            return Err(MonitorError::InvalidArgument {
                message: "fanotify descriptor is not open".into(),
            });
        };
        tracing::debug!("reading fanotify event");

        if super::veiled(veil) {
            tracing::debug!("kernel event veiled");
            loop {
                match group.read(&mut self.buf) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            return Ok(EventAction::Ignore);
        }

        match group.read(&mut self.buf) {
            Ok(0) => Ok(EventAction::Ignore),
            Ok(n) => {
                tracing::debug!(len = n, "fanotify event");
                self.len = n;
                Ok(EventAction::Accept)
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                Ok(EventAction::Ignore)
            }
            Err(e) => Err(MonitorError::os(
                "read(fanotify)",
                e.raw_os_error().map_or(Errno::EIO, Errno::from_raw),
            )),
        }
    }

    /// Returns the next mount record of the last accepted event.
    pub(crate) fn next_detail(&mut self) -> Option<MountEvent> {
        let Some((event, used)) = parse_record(&self.buf[self.pos..self.len]) else {
            self.reset();
            return None;
        };
        self.pos += used;
        tracing::debug!(mount_id = event.mount_id, status = ?event.status, "fanotify mount");
        Some(event)
    }
}

fn read_u16(buf: &[u8], at: usize) -> Option<u16> {
    buf.get(at..at + 2)?.try_into().ok().map(u16::from_ne_bytes)
}

fn read_u32(buf: &[u8], at: usize) -> Option<u32> {
    buf.get(at..at + 4)?.try_into().ok().map(u32::from_ne_bytes)
}

fn read_u64(buf: &[u8], at: usize) -> Option<u64> {
    buf.get(at..at + 8)?.try_into().ok().map(u64::from_ne_bytes)
}

/// Decodes the record at the start of `buf`.
///
/// Returns the event and the record length, or `None` for a truncated,
/// foreign-version, or mount-less record.
fn parse_record(buf: &[u8]) -> Option<(MountEvent, usize)> {
    if buf.len() < METADATA_LEN {
        return None;
    }
    let event_len = usize::try_from(read_u32(buf, 0)?).ok()?;
    let version = *buf.get(4)?;
    let metadata_len = usize::from(read_u16(buf, 6)?);
    let mask = read_u64(buf, 8)?;

    if event_len < METADATA_LEN || event_len > buf.len() || version != FANOTIFY_METADATA_VERSION {
        return None;
    }
    if metadata_len + MNT_INFO_LEN > event_len {
        return None;
    }
    let mount_id = read_u64(buf, metadata_len + MNT_ID_OFFSET)?;
    let status = MountStatus::from_bits(mask & FAN_MNT_ATTACH != 0, mask & FAN_MNT_DETACH != 0);

    Some((MountEvent { mount_id, status }, event_len))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(mask: u64, mount_id: u64) -> Vec<u8> {
        let event_len = (METADATA_LEN + MNT_INFO_LEN) as u32;
        let mut rec = Vec::with_capacity(event_len as usize);
        rec.extend_from_slice(&event_len.to_ne_bytes());
        rec.push(FANOTIFY_METADATA_VERSION);
        rec.push(0);
        rec.extend_from_slice(&(METADATA_LEN as u16).to_ne_bytes());
        rec.extend_from_slice(&mask.to_ne_bytes());
        rec.extend_from_slice(&(-1i32).to_ne_bytes());
        rec.extend_from_slice(&0i32.to_ne_bytes());
        // info header: type, pad, len
        rec.push(7);
        rec.push(0);
        rec.extend_from_slice(&(MNT_INFO_LEN as u16).to_ne_bytes());
        rec.extend_from_slice(&[0; 4]);
        rec.extend_from_slice(&mount_id.to_ne_bytes());
        rec
    }

    fn notify_with(buf: &[u8]) -> MountNotify {
        let mut notify = MountNotify::borrowed(-1);
        notify.buf[..buf.len()].copy_from_slice(buf);
        notify.len = buf.len();
        notify
    }

    #[test]
    fn parses_attach_record() {
        let rec = record(FAN_MNT_ATTACH, 0x2000_0000_0000_0042);
        let (event, used) = parse_record(&rec).expect("record");
        assert_eq!(used, rec.len());
        assert_eq!(event.mount_id, 0x2000_0000_0000_0042);
        assert_eq!(event.status, Some(MountStatus::Attached));
    }

    #[test]
    fn attach_and_detach_means_moved() {
        let rec = record(FAN_MNT_ATTACH | FAN_MNT_DETACH, 9);
        let (event, _) = parse_record(&rec).expect("record");
        assert_eq!(event.status, Some(MountStatus::Moved));
    }

    #[test]
    fn rejects_truncated_and_foreign_records() {
        let rec = record(FAN_MNT_DETACH, 1);
        assert!(parse_record(&rec[..METADATA_LEN - 1]).is_none());
        assert!(parse_record(&rec[..rec.len() - 1]).is_none());

        let mut foreign = rec;
        foreign[4] = 2;
        assert!(parse_record(&foreign).is_none());
    }

    #[test]
    fn details_are_yielded_in_order_then_exhausted() {
        let mut buf = record(FAN_MNT_ATTACH, 1);
        buf.extend(record(FAN_MNT_DETACH, 2));
        let mut notify = notify_with(&buf);

        let first = notify.next_detail().expect("first");
        assert_eq!((first.mount_id, first.status), (1, Some(MountStatus::Attached)));
        let second = notify.next_detail().expect("second");
        assert_eq!((second.mount_id, second.status), (2, Some(MountStatus::Detached)));
        assert!(notify.next_detail().is_none());
        assert!(notify.next_detail().is_none());
    }

    #[test]
    fn malformed_record_ends_iteration() {
        let mut buf = record(FAN_MNT_ATTACH, 1);
        buf.extend_from_slice(&[0xff; 10]);
        let mut notify = notify_with(&buf);

        assert!(notify.next_detail().is_some());
        assert!(notify.next_detail().is_none());
        assert_eq!((notify.pos, notify.len), (0, 0));
    }

    #[test]
    fn process_event_requires_open_group() {
        let mut notify = MountNotify::borrowed(-1);
        assert!(matches!(
            notify.process_event(None),
            Err(MonitorError::InvalidArgument { .. })
        ));
    }
}
