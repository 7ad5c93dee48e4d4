//! Foundational error types shared across the `waystation` workspace.
//!
//! Crate-specific errors (spool I/O, scheduler invariants) live in their own
//! crates; this module only holds the few error shapes that are common to
//! more than one of them, leaving domain-specific errors to their owning
//! crates.

use std::io;

use thiserror::Error;

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid configuration for {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("I/O error while reading configuration: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_field_message_includes_reason() {
        let err = ConfigError::Invalid {
            field: "qmgr_recipient_limit".to_string(),
            reason: "must be non-negative".to_string(),
        };
        assert!(err.to_string().contains("qmgr_recipient_limit"));
        assert!(err.to_string().contains("must be non-negative"));
    }
}
