//! Error Types
//!
//! This module defines the error types used throughout the reconciliation
//! core. `ActionError` is the typed, user-facing failure value returned by
//! mutation commands; `CoreError` covers internal failures in the driver and
//! push layers.
//!
//! # Propagation Policy
//!
//! The core never throws past its own boundary: merge and normalize are
//! total, mutation commands return typed results, and malformed push frames
//! are discarded. User-visible failure is always a short human-readable
//! message, never a raw transport error.

use thiserror::Error;

/// Typed failure value for user-initiated actions.
///
/// Every variant carries enough context for immediate UI feedback without
/// exposing transport internals.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// A required field failed local validation
    #[error("Validation error in field '{field}': {message}")]
    Validation {
        /// The field that failed validation
        field: String,
        /// Human-readable error message
        message: String,
    },

    /// No authenticated local user
    #[error("You must be signed in to do that")]
    Unauthenticated,

    /// The local user's role does not permit the action
    #[error("This action requires the {required} role")]
    Forbidden {
        /// Role required for the action
        required: String,
    },

    /// The network request was rejected or timed out
    #[error("Network error: {message}")]
    Transport {
        /// Human-readable error message
        message: String,
    },

    /// A revision-guarded write hit HTTP 409; the authoritative state has
    /// already been merged in and the caller may retry its intent
    #[error("Conflict: the item changed on the server (revision {revision})")]
    Conflict {
        /// Server-side revision number of the authoritative state
        revision: u64,
    },
}

impl ActionError {
    /// Create a new validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a new forbidden error
    pub fn forbidden(required: impl Into<String>) -> Self {
        Self::Forbidden {
            required: required.into(),
        }
    }
}

/// Internal errors in the driver and push layers.
#[derive(Debug, Error)]
pub enum CoreError {
    /// JSON serialization or deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A background listener or poller task ended abnormally
    #[error("Background task ended abnormally: {0}")]
    ChannelClosed(String),

    /// A background loop was asked to start while one is already running
    #[error("Already running")]
    AlreadyRunning,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let error = ActionError::validation("text", "Post text cannot be empty");
        let display = format!("{}", error);
        assert!(display.contains("text"));
        assert!(display.contains("cannot be empty"));
    }

    #[test]
    fn test_forbidden_error() {
        let error = ActionError::forbidden("admin");
        match error {
            ActionError::Forbidden { required } => assert_eq!(required, "admin"),
            _ => panic!("Expected Forbidden"),
        }
    }

    #[test]
    fn test_from_serde_error() {
        let result: Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let core: CoreError = result.unwrap_err().into();
        assert!(matches!(core, CoreError::Serialization(_)));
    }
}
