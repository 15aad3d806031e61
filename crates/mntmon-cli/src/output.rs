//! Formatted output helpers for CLI commands.
//!
//! Changes are printed either as human-readable lines or, with `--json`,
//! as one JSON object per line.

use std::path::PathBuf;

use mntmon_core::{Change, MonitorType, MountEvent};
use serde::Serialize;

/// One reported change with the mount records that came with it.
#[derive(Debug, Serialize)]
pub struct ChangeRecord {
    /// RFC 3339 time the change was read.
    pub timestamp: String,
    /// Path of the monitored table or namespace.
    pub path: PathBuf,
    /// Source that reported the change.
    pub kind: MonitorType,
    /// Affected mounts (fanotify only).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<MountEvent>,
}

impl ChangeRecord {
    /// Stamps `change` with the current time.
    #[must_use]
    pub fn new(change: Change, mounts: Vec<MountEvent>) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            path: change.path,
            kind: change.kind,
            mounts,
        }
    }

    /// Renders the record in the selected format.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render(&self, json: bool) -> anyhow::Result<String> {
        if json {
            return Ok(serde_json::to_string(self)?);
        }
        let mut out = format!(" {}: change detected", self.path.display());
        for mount in &self.mounts {
            out.push('\n');
            out.push_str(&format_mount(mount));
        }
        Ok(out)
    }
}

/// Formats one mount record, e.g. `ID=42 (ATTACHED)`.
#[must_use]
pub fn format_mount(event: &MountEvent) -> String {
    let status = event
        .status
        .map_or_else(|| "???".to_string(), |s| s.to_string());
    format!("ID={} ({status})", event.mount_id)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use mntmon_core::MountStatus;

    use super::*;

    fn record(kind: MonitorType, mounts: Vec<MountEvent>) -> ChangeRecord {
        ChangeRecord {
            timestamp: "2026-01-01T00:00:00+00:00".into(),
            path: PathBuf::from("/proc/self/ns/mnt"),
            kind,
            mounts,
        }
    }

    #[test]
    fn format_mount_shows_status() {
        let event = MountEvent {
            mount_id: 42,
            status: Some(MountStatus::Detached),
        };
        assert_eq!(format_mount(&event), "ID=42 (DETACHED)");
    }

    #[test]
    fn format_mount_without_status() {
        let event = MountEvent {
            mount_id: 7,
            status: None,
        };
        assert_eq!(format_mount(&event), "ID=7 (???)");
    }

    #[test]
    fn text_lists_mounts_under_change() {
        let mounts = vec![MountEvent {
            mount_id: 1,
            status: Some(MountStatus::Attached),
        }];
        let text = record(MonitorType::Fanotify, mounts).render(false).expect("render");
        assert_eq!(text, " /proc/self/ns/mnt: change detected\nID=1 (ATTACHED)");
    }

    #[test]
    fn json_omits_empty_mounts() {
        let line = record(MonitorType::Kernel, Vec::new()).render(true).expect("render");
        let value: serde_json::Value = serde_json::from_str(&line).expect("json");
        assert_eq!(value["kind"], "kernel");
        assert_eq!(value["path"], "/proc/self/ns/mnt");
        assert!(value.get("mounts").is_none());
    }

    #[test]
    fn timestamp_is_rfc3339() {
        let change = Change {
            path: PathBuf::from("/run/mount/utab"),
            kind: MonitorType::Userspace,
        };
        let rec = ChangeRecord::new(change, Vec::new());
        assert!(chrono::DateTime::parse_from_rfc3339(&rec.timestamp).is_ok());
    }
}
