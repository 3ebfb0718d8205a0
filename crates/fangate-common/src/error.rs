//! Unified error types for the fangate workspace.
//!
//! Only fatal conditions are represented here. Interrupted and would-block
//! conditions are retried in place (see [`is_retryable`]) and resolution
//! failures are recovered with sentinel values, so neither ever becomes an
//! error value.

use std::io;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum FangateError {
    /// A startup step failed; the monitor cannot begin.
    #[error("{operation} failed: {source}")]
    Init {
        /// Name of the failing operation.
        operation: &'static str,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// A non-retryable failure on the notification channel while running.
    #[error("{operation} on notification channel failed: {source}")]
    Channel {
        /// Name of the failing operation.
        operation: &'static str,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The kernel delivered records in a layout this build does not understand.
    #[error("fanotify metadata version mismatch: expected {expected}, found {found}")]
    MetadataVersion {
        /// Version this build supports.
        expected: u8,
        /// Version found in the record header.
        found: u8,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// Observation output could not be written.
    #[error("failed to write observation: {source}")]
    Output {
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Serialization of an observation failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl FangateError {
    /// Builds an initialization error for the named operation.
    pub const fn init(operation: &'static str, source: io::Error) -> Self {
        Self::Init { operation, source }
    }

    /// Builds a runtime channel error for the named operation.
    pub const fn channel(operation: &'static str, source: io::Error) -> Self {
        Self::Channel { operation, source }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, FangateError>;

/// Returns `true` for conditions that are retried without surfacing.
pub fn is_retryable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupted_and_would_block_are_retryable() {
        assert!(is_retryable(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(is_retryable(&io::Error::from(io::ErrorKind::WouldBlock)));
    }

    #[test]
    fn other_errors_are_not_retryable() {
        assert!(!is_retryable(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(!is_retryable(&io::Error::from_raw_os_error(9)));
    }

    #[test]
    fn init_error_names_operation() {
        let err = FangateError::init(
            "fanotify_init",
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert!(err.to_string().starts_with("fanotify_init failed"));
    }
}
