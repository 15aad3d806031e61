//! Integration tests for the monitor against real notification sources.
//!
//! The userspace scenarios point the monitor at a temporary `utab` so they
//! run unprivileged:
//! 1. Event file created after the monitor starts
//! 2. Event file rewritten while watched
//! 3. Disable and re-enable cycles
//! 4. Configuration-driven setup
//! 5. Kernel table polling and enabling sources on a live monitor

#![allow(unsafe_code, clippy::expect_used, clippy::unwrap_used)]

use std::path::Path;
use std::time::Duration;

use mntmon_common::config::MonitorConfig;
use mntmon_common::error::MonitorError;
use mntmon_core::{Change, Monitor, MonitorType, WaitStatus};

const WAIT: Option<Duration> = Some(Duration::from_secs(1));

fn userspace_monitor(utab: &Path) -> Monitor {
    let monitor = Monitor::new();
    monitor
        .enable_userspace(true, Some(utab))
        .expect("enable userspace");
    let _ = monitor.descriptor().expect("descriptor");
    monitor
}

fn touch(path: &Path) {
    std::fs::write(path, b"").expect("write event file");
}

fn userspace_change(utab: &Path) -> Change {
    Change {
        path: utab.to_path_buf(),
        kind: MonitorType::Userspace,
    }
}

// ── Userspace table ──────────────────────────────────────────────────

#[test]
fn userspace_reports_created_event_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let utab = dir.path().join("utab");
    let monitor = userspace_monitor(&utab);

    touch(&dir.path().join("utab.event"));

    assert_eq!(monitor.wait(WAIT).expect("wait"), WaitStatus::Changed);
    assert_eq!(
        monitor.next_change().expect("next change"),
        Some(userspace_change(&utab))
    );
    assert_eq!(monitor.next_change().expect("drained"), None);
}

#[test]
fn userspace_reports_rewritten_event_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let utab = dir.path().join("utab");
    let event_file = dir.path().join("utab.event");
    touch(&event_file);
    let monitor = userspace_monitor(&utab);

    assert_eq!(
        monitor.wait(Some(Duration::ZERO)).expect("idle wait"),
        WaitStatus::TimedOut
    );

    for _ in 0..3 {
        touch(&event_file);
        assert_eq!(monitor.wait(WAIT).expect("wait"), WaitStatus::Changed);
        assert_eq!(
            monitor.next_change().expect("next change"),
            Some(userspace_change(&utab))
        );
        assert_eq!(monitor.next_change().expect("drained"), None);
    }
}

#[test]
fn userspace_change_has_no_details() {
    let dir = tempfile::tempdir().expect("tempdir");
    let utab = dir.path().join("utab");
    let monitor = userspace_monitor(&utab);

    touch(&dir.path().join("utab.event"));
    assert!(monitor.next_change().expect("next change").is_some());
    assert!(matches!(
        monitor.next_event_detail(),
        Err(MonitorError::Unsupported {
            kind: MonitorType::Userspace
        })
    ));
}

#[test]
fn userspace_waits_for_missing_directories() {
    let dir = tempfile::tempdir().expect("tempdir");
    let run = dir.path().join("run");
    let utab = run.join("utab");
    let monitor = userspace_monitor(&utab);

    std::fs::create_dir(&run).expect("create run dir");
    assert_eq!(
        monitor.wait(Some(Duration::from_millis(100))).expect("wait"),
        WaitStatus::TimedOut
    );

    touch(&run.join("utab.event"));
    assert_eq!(monitor.wait(WAIT).expect("wait"), WaitStatus::Changed);
    assert_eq!(
        monitor.next_change().expect("next change"),
        Some(userspace_change(&utab))
    );
}

#[test]
fn disabled_userspace_is_silent_until_reenabled() {
    let dir = tempfile::tempdir().expect("tempdir");
    let utab = dir.path().join("utab");
    let event_file = dir.path().join("utab.event");
    touch(&event_file);
    let monitor = userspace_monitor(&utab);

    monitor
        .enable_userspace(false, None)
        .expect("disable userspace");
    touch(&event_file);
    assert_eq!(
        monitor.wait(Some(Duration::from_millis(50))).expect("wait"),
        WaitStatus::TimedOut
    );

    monitor
        .enable_userspace(true, None)
        .expect("re-enable userspace");
    touch(&event_file);
    assert_eq!(monitor.wait(WAIT).expect("wait"), WaitStatus::Changed);
    assert_eq!(
        monitor.next_change().expect("next change"),
        Some(userspace_change(&utab))
    );
}

#[test]
fn event_cleanup_discards_pending_changes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let utab = dir.path().join("utab");
    let event_file = dir.path().join("utab.event");
    touch(&event_file);
    let monitor = userspace_monitor(&utab);

    touch(&event_file);
    monitor.event_cleanup().expect("cleanup");
    assert_eq!(monitor.next_change().expect("next change"), None);
}

#[test]
fn embedded_descriptor_becomes_readable() {
    use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
    use std::os::fd::BorrowedFd;

    let dir = tempfile::tempdir().expect("tempdir");
    let utab = dir.path().join("utab");
    let event_file = dir.path().join("utab.event");
    touch(&event_file);
    let monitor = userspace_monitor(&utab);
    let raw = monitor.descriptor().expect("descriptor");

    touch(&event_file);

    // SAFETY: the monitor keeps the descriptor open for the whole test.
    let fd = unsafe { BorrowedFd::borrow_raw(raw) };
    let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
    let ready = poll(&mut fds, PollTimeout::from(1000u16)).expect("poll");
    assert_eq!(ready, 1);

    assert_eq!(
        monitor.next_change().expect("next change"),
        Some(userspace_change(&utab))
    );
}

// ── Configuration ────────────────────────────────────────────────────

#[test]
fn monitor_from_config_enables_sources() {
    let dir = tempfile::tempdir().expect("tempdir");
    let utab = dir.path().join("utab");
    let config = MonitorConfig {
        userspace: true,
        utab_path: Some(utab.clone()),
        kernel: true,
        ..MonitorConfig::default()
    };

    let monitor = Monitor::from_config(&config).expect("monitor");
    touch(&dir.path().join("utab.event"));

    assert_eq!(monitor.wait(WAIT).expect("wait"), WaitStatus::Changed);
    let change = monitor.next_change().expect("next change").expect("change");
    assert_eq!(change.path, utab);
}

#[test]
fn monitor_from_config_rejects_empty_config() {
    let err = Monitor::from_config(&MonitorConfig::default()).unwrap_err();
    assert!(matches!(err, MonitorError::Config { .. }));
}

// ── Kernel table ─────────────────────────────────────────────────────

#[test]
fn kernel_poll_without_mount_changes_times_out() {
    let monitor = Monitor::new();
    monitor.enable_kernel(true).expect("enable kernel");

    assert_eq!(
        monitor.wait(Some(Duration::ZERO)).expect("wait"),
        WaitStatus::TimedOut
    );
    assert_eq!(monitor.next_change().expect("next change"), None);
}

#[test]
fn pending_userspace_change_survives_enabling_kernel() {
    use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
    use std::os::fd::BorrowedFd;

    let dir = tempfile::tempdir().expect("tempdir");
    let utab = dir.path().join("utab");
    let event_file = dir.path().join("utab.event");
    touch(&event_file);
    let monitor = userspace_monitor(&utab);
    let raw = monitor.descriptor().expect("descriptor");

    touch(&event_file);
    monitor.enable_kernel(true).expect("enable kernel");

    // SAFETY: the monitor keeps the descriptor open for the whole test.
    let fd = unsafe { BorrowedFd::borrow_raw(raw) };
    let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
    let ready = poll(&mut fds, PollTimeout::from(200u16)).expect("poll");
    assert_eq!(ready, 1, "pending change keeps the descriptor readable");

    assert_eq!(
        monitor.wait(Some(Duration::from_millis(200))).expect("wait"),
        WaitStatus::Changed
    );
    assert_eq!(
        monitor.next_change().expect("next change"),
        Some(userspace_change(&utab))
    );
    assert_eq!(monitor.next_change().expect("drained"), None);
}
