//! Error types for the repair manager
//!
//! Configuration problems are rejected when a configuration is built. Repair
//! task failures are values the scheduler recovers from locally; none of them
//! are fatal to the embedding process.

use std::time::Duration;

use thiserror::Error;

use crate::repair::TokenRange;

/// Configuration error variants
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// Failed to load configuration file
    #[error("Failed to load config from {path}: {reason}")]
    LoadFailed { path: String, reason: String },

    /// Invalid configuration value
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// Missing required configuration
    #[error("Missing required config field: {field}")]
    MissingRequired { field: String },

    /// Configuration parsing error
    #[error("Failed to parse config: {reason}")]
    ParseError { reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Synchronous failure reported by the management interface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProxyError {
    /// The repair command could not be issued
    #[error("repair command rejected: {0}")]
    Invocation(String),

    /// The node could not be reached
    #[error("management interface unavailable: {0}")]
    Unavailable(String),
}

/// Why a repair task ended in the failed state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepairFailureCause {
    /// `repair_async` failed before any notification could arrive
    #[error("repair invocation failed: {0}")]
    Proxy(#[from] ProxyError),

    /// The node reported the repair session as failed
    #[error("remote repair failed: {0}")]
    Remote(String),

    /// No terminal notification arrived before the deadline
    #[error("no terminal notification within {0:?}")]
    Timeout(Duration),

    /// The task was stopped before it reached a terminal notification
    #[error("repair cancelled")]
    Cancelled,

    /// The repair command completed without confirming every range
    #[error("repair completed without confirming ranges {0}")]
    Unconfirmed(String),

    /// `execute` was called on a task that already ran
    #[error("repair task already started")]
    AlreadyStarted,
}

/// Terminal failure of a [`RepairTask`](crate::repair::RepairTask).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("repair of {} range(s) failed: {cause}", .ranges_attempted.len())]
pub struct RepairTaskError {
    pub cause: RepairFailureCause,
    pub ranges_attempted: Vec<TokenRange>,
}

impl RepairTaskError {
    pub fn is_timeout(&self) -> bool {
        matches!(self.cause, RepairFailureCause::Timeout(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.cause, RepairFailureCause::Cancelled)
    }
}
