//! Well-known kernel and userspace paths and default values.

use std::path::PathBuf;

/// Per-process view of the kernel mount table.
pub const PROC_MOUNTINFO: &str = "/proc/self/mountinfo";

/// Mount namespace of the calling process.
pub const PROC_NS_MNT: &str = "/proc/self/ns/mnt";

/// Directory of the calling process' open file descriptors.
pub const PROC_FD_DIR: &str = "/proc/self/fd";

/// Default location of the userspace mount table.
pub const DEFAULT_UTAB_PATH: &str = "/run/mount/utab";

/// Environment variable overriding the userspace mount table location.
pub const UTAB_ENV: &str = "LIBMOUNT_UTAB";

/// Suffix of the file written after each userspace table update.
pub const EVENT_SUFFIX: &str = ".event";

/// Suffix of the file that exists while a userspace table update is in progress.
pub const ACTIVE_SUFFIX: &str = ".act";

/// Returns the userspace mount table path, honoring `$LIBMOUNT_UTAB`.
///
/// An empty variable is treated as unset.
pub fn utab_path() -> PathBuf {
    std::env::var_os(UTAB_ENV)
        .filter(|v| !v.is_empty())
        .map_or_else(|| PathBuf::from(DEFAULT_UTAB_PATH), PathBuf::from)
}

/// Appends `suffix` to the final component of `path` (`utab` -> `utab.event`).
pub fn with_suffix(path: &std::path::Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}
