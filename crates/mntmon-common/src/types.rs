//! Domain primitive types used across the mntmon workspace.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MonitorError;

/// Notification mechanism backing a monitor entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorType {
    /// Userspace mount table (`/run/mount/utab`), watched with inotify.
    Userspace,
    /// Kernel mount table (`/proc/self/mountinfo`), polled for changes.
    Kernel,
    /// Per-mount attach/detach notifications delivered by fanotify.
    Fanotify,
}

impl fmt::Display for MonitorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Userspace => write!(f, "userspace"),
            Self::Kernel => write!(f, "kernel"),
            Self::Fanotify => write!(f, "fanotify"),
        }
    }
}

impl FromStr for MonitorType {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "userspace" => Ok(Self::Userspace),
            "kernel" | "mountinfo" => Ok(Self::Kernel),
            "fanotify" => Ok(Self::Fanotify),
            other => Err(MonitorError::InvalidArgument {
                message: format!("unknown monitor type: {other}"),
            }),
        }
    }
}

/// A change reported by `next_change`: the monitored path and its type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// Path the reporting entry monitors.
    pub path: PathBuf,
    /// Type of the reporting entry.
    pub kind: MonitorType,
}

/// What happened to a mount, as carried by a fanotify mount record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountStatus {
    /// The mount was attached to the namespace.
    Attached,
    /// The mount was detached from the namespace.
    Detached,
    /// The mount was moved (attach and detach reported together).
    Moved,
}

impl MountStatus {
    /// Derives the status from the attach/detach bits of an event.
    ///
    /// Returns `None` when neither bit is set.
    #[must_use]
    pub const fn from_bits(attached: bool, detached: bool) -> Option<Self> {
        match (attached, detached) {
            (true, true) => Some(Self::Moved),
            (true, false) => Some(Self::Attached),
            (false, true) => Some(Self::Detached),
            (false, false) => None,
        }
    }
}

impl fmt::Display for MountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attached => write!(f, "ATTACHED"),
            Self::Detached => write!(f, "DETACHED"),
            Self::Moved => write!(f, "MOVED"),
        }
    }
}

/// One structured detail record of the last reported change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountEvent {
    /// Unique (64-bit) mount ID of the affected mount.
    pub mount_id: u64,
    /// Attach, detach, or move. `None` if the record carried neither bit.
    pub status: Option<MountStatus>,
}
