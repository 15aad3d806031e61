//! Unified error types for the mntmon workspace.
//!
//! The monitor core reports every failure through [`MonitorError`]; the
//! command-line consumer wraps it in `anyhow` at its edge.

use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

use crate::types::MonitorType;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// An argument or monitor state does not allow the requested call.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of what was wrong.
        message: String,
    },

    /// The monitor type of the last reported change provides no details.
    #[error("{kind} monitor does not provide event details")]
    Unsupported {
        /// Type of the entry that was asked for details.
        kind: MonitorType,
    },

    /// Event details were requested before any change was reported.
    #[error("no change has been reported yet")]
    NoPriorEvent,

    /// A kernel call failed.
    #[error("{context}: {source}")]
    Os {
        /// The operation that failed.
        context: String,
        /// Underlying errno.
        source: Errno,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl MonitorError {
    /// Builds an [`MonitorError::Os`] from a failed kernel call.
    pub fn os(context: impl Into<String>, source: Errno) -> Self {
        Self::Os {
            context: context.into(),
            source,
        }
    }

    /// Returns the errno carried by this error, if any.
    ///
    /// I/O errors report their raw OS code when one is available.
    #[must_use]
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Self::Os { source, .. } => Some(*source),
            Self::Io { source, .. } => source.raw_os_error().map(Errno::from_raw),
            Self::InvalidArgument { .. } => Some(Errno::EINVAL),
            Self::Unsupported { .. } => Some(Errno::ENOTSUP),
            Self::NoPriorEvent | Self::Config { .. } | Self::Serialization { .. } => None,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, MonitorError>;
