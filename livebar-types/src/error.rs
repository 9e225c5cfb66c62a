use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::SeriesId;

/// Unified error type for the livebar workspace.
///
/// Covers control-API misuse against the current subscription state, lock
/// acquisition timeouts, argument validation, data-source failures and the
/// scheduler's retry exhaustion.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum FeedError {
    /// A series with an equal key is already active.
    #[error("already exists: {key} ({id})")]
    AlreadyExists {
        /// Display form of the duplicate key.
        key: String,
        /// Handle of the series that is already active.
        id: SeriesId,
    },

    /// A series or subscription could not be found.
    #[error("not found: {what}")]
    NotFound {
        /// Description of the missing resource, e.g. "series#3".
        what: String,
    },

    /// The global lock could not be acquired within the requested timeout.
    #[error("timed out waiting for the feed lock: {operation}")]
    Timeout {
        /// Control operation that gave up, e.g. "add_series".
        operation: String,
    },

    /// Invalid input argument.
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    /// No new bar was observed after exhausting the retry budget.
    #[error("no new bar for {key} after {attempts} attempts")]
    DataUnavailable {
        /// Display form of the affected key.
        key: String,
        /// Number of fetches performed.
        attempts: u32,
    },

    /// The data source returned an error.
    #[error("{source_name} failed: {msg}")]
    Source {
        /// Name of the failing data source.
        source_name: String,
        /// Human-readable error message.
        msg: String,
    },

    /// A single data-source call exceeded the configured fetch timeout.
    #[error("{source_name} timed out after {timeout_ms}ms")]
    SourceTimeout {
        /// Name of the data source.
        source_name: String,
        /// Timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// The data source does not support the requested capability.
    #[error("unsupported capability: {capability}")]
    Unsupported {
        /// A capability string describing what was requested (e.g. "interval 45").
        capability: String,
    },

    /// A subscriber worker thread could not be started.
    #[error("worker error: {0}")]
    Worker(String),
}

impl FeedError {
    /// Helper: build a `NotFound` error for a description of the missing resource.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Helper: build a `Timeout` error for a control operation.
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Helper: build a `Source` error with the source name and message.
    pub fn source(source_name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Source {
            source_name: source_name.into(),
            msg: msg.into(),
        }
    }

    /// Helper: build a `SourceTimeout` error.
    pub fn source_timeout(source_name: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self::SourceTimeout {
            source_name: source_name.into(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Helper: build an `Unsupported` error for a capability string.
    #[must_use]
    pub fn unsupported(cap: impl Into<String>) -> Self {
        Self::Unsupported {
            capability: cap.into(),
        }
    }

    /// Returns true for errors caused by the caller's use of the control API.
    ///
    /// These never corrupt feed state and can be handled by retrying with
    /// different arguments.
    #[must_use]
    pub const fn is_control_misuse(&self) -> bool {
        matches!(
            self,
            Self::AlreadyExists { .. } | Self::NotFound { .. } | Self::InvalidArg(_)
        )
    }
}
