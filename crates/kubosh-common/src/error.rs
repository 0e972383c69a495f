//! Error types for the kubosh model
//!
//! Errors carry the offending value so an operator can fix the manifest
//! without reading logs.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Errors raised while reading or interpreting a deployment manifest
#[derive(Debug, Error)]
pub enum Error {
    /// A manifest value is malformed
    #[error("validation error for {context}: {message}")]
    Validation {
        /// What was being validated (instance group, field, ...)
        context: String,
        /// Description of what's invalid
        message: String,
    },

    /// A named manifest entity does not exist
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// Kind of entity (instance group, job, release, stemcell)
        kind: String,
        /// The name that was looked up
        name: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },
}

impl Error {
    /// Create a validation error without context
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            context: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a validation error with context
    pub fn validation_for(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}
