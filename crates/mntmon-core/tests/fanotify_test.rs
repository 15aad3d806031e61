//! Mount attach/detach notifications through fanotify.
//!
//! Needs `CAP_SYS_ADMIN` and Linux 6.15+. Run with
//! `cargo test -- --ignored` as root.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::process::Command;
use std::time::Duration;

use mntmon_core::{Monitor, MonitorType, MountStatus, NamespaceScope, WaitStatus};

fn run(program: &str, args: &[&str]) {
    let status = Command::new(program)
        .args(args)
        .status()
        .expect("spawn command");
    assert!(status.success(), "{program} {args:?} failed");
}

#[test]
#[ignore = "requires CAP_SYS_ADMIN and fanotify mount events"]
fn fanotify_reports_attach_and_detach() {
    let dir = tempfile::tempdir().expect("tempdir");
    let target = dir.path().to_str().expect("utf-8 path");

    let monitor = Monitor::new();
    monitor
        .enable_fanotify(true, NamespaceScope::Current)
        .expect("enable fanotify");
    let _ = monitor.descriptor().expect("descriptor");

    run("mount", &["-t", "tmpfs", "mntmon-test", target]);
    assert_eq!(
        monitor.wait(Some(Duration::from_secs(5))).expect("wait"),
        WaitStatus::Changed
    );
    let change = monitor.next_change().expect("next change").expect("change");
    assert_eq!(change.kind, MonitorType::Fanotify);
    assert_eq!(change.path.to_str(), Some("/proc/self/ns/mnt"));

    let attached = monitor
        .next_event_detail()
        .expect("detail")
        .expect("attach record");
    assert_eq!(attached.status, Some(MountStatus::Attached));
    assert!(attached.mount_id > 0);
    while monitor.next_event_detail().expect("detail").is_some() {}

    run("umount", &[target]);
    assert_eq!(
        monitor.wait(Some(Duration::from_secs(5))).expect("wait"),
        WaitStatus::Changed
    );
    assert!(monitor.next_change().expect("next change").is_some());
    let detached = monitor
        .next_event_detail()
        .expect("detail")
        .expect("detach record");
    assert_eq!(detached.status, Some(MountStatus::Detached));
    assert_eq!(detached.mount_id, attached.mount_id);
}
