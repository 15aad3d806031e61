//! Monitor configuration model.
//!
//! A configuration names the notification sources to enable and their
//! parameters. It is usually built from command-line flags, or loaded from
//! a JSON file.

use std::os::fd::RawFd;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, Result};

/// Which notification sources a monitor should enable.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    /// Watch the userspace mount table.
    pub userspace: bool,
    /// Override for the userspace mount table path.
    pub utab_path: Option<PathBuf>,
    /// Watch the kernel mount table (`/proc/self/mountinfo`).
    pub kernel: bool,
    /// Watch per-mount attach/detach notifications.
    pub fanotify: bool,
    /// Namespace file descriptor for the fanotify channel (current namespace if unset).
    pub namespace_fd: Option<RawFd>,
    /// Ignore kernel events that a userspace update will report again.
    pub veil_kernel: bool,
}

impl MonitorConfig {
    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON,
    /// or fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| MonitorError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Returns `true` if at least one notification source is enabled.
    #[must_use]
    pub const fn has_sources(&self) -> bool {
        self.userspace || self.kernel || self.fanotify
    }

    /// Checks the configuration for values the monitor cannot use.
    ///
    /// # Errors
    ///
    /// Returns an error if no source is enabled, the utab path is empty,
    /// or the namespace fd is negative.
    pub fn validate(&self) -> Result<()> {
        if !self.has_sources() {
            return Err(MonitorError::Config {
                message: "no monitor type specified".into(),
            });
        }
        if self
            .utab_path
            .as_ref()
            .is_some_and(|p| p.as_os_str().is_empty())
        {
            return Err(MonitorError::Config {
                message: "utab_path must not be empty".into(),
            });
        }
        if let Some(fd) = self.namespace_fd.filter(|fd| *fd < 0) {
            return Err(MonitorError::Config {
                message: format!("namespace_fd must be a valid descriptor, got {fd}"),
            });
        }
        Ok(())
    }
}
