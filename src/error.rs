//! Error types for pipegen
//!
//! Every fatal condition raised while normalizing configuration, building
//! the job graph, or materializing submit files maps to one variant of
//! [`PipeError`]. Recoverable conditions (a missing credential from the
//! environment) are logged and never surface here.

use std::io;
use std::path::PathBuf;

/// Main pipegen error type
#[derive(Debug, thiserror::Error)]
pub enum PipeError {
    /// Malformed or unknown parameter value
    #[error("invalid value for `{field}`: {message}")]
    InvalidParameter { field: String, message: String },

    /// Normalization left a required set empty
    #[error("`{field}` resolved to an empty set")]
    EmptySet { field: String },

    /// Explicitly supplied credential path is not a file
    #[error("credential file not found: {}", .0.display())]
    CredentialNotFound(PathBuf),

    /// Credential accessed while none was resolved
    #[error("credential unavailable: {0}")]
    CredentialUnavailable(String),

    /// Executable could not be located directly or in the library
    #[error("unable to identify executable '{name}' (searched library {})", .library.display())]
    ExecutableNotFound { name: String, library: PathBuf },

    /// Builder precondition violated
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Graph invariant violated
    #[error("graph construction failed: {0}")]
    GraphConstruction(String),

    /// External injection generator failed
    #[error("injection generation failed: {0}")]
    InjectionGeneration(String),

    /// Configuration file or command line could not be read
    #[error("configuration error: {0}")]
    Config(String),

    /// Submission backend failed to render or submit
    #[error("backend error: {0}")]
    Backend(String),

    /// Filesystem failure with context
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl PipeError {
    /// Shorthand for [`PipeError::InvalidParameter`].
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Wraps an I/O error with a description of what was being attempted.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, PipeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_parameter_names_field_and_value() {
        let err = PipeError::invalid("detectors", "unknown detector \"X9\"");
        let msg = err.to_string();
        assert!(msg.contains("detectors"));
        assert!(msg.contains("X9"));
    }

    #[test]
    fn test_io_error_keeps_source() {
        use std::error::Error;

        let err = PipeError::io(
            "copying credential",
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().starts_with("copying credential"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_empty_set_message() {
        let err = PipeError::EmptySet {
            field: "sampler".to_string(),
        };
        assert_eq!(err.to_string(), "`sampler` resolved to an empty set");
    }
}
