use std::fmt;

use thiserror::Error;

/// Application level error type used throughout the crate.
#[derive(Error, Debug)]
pub enum VigilError {
    /// I/O related failure
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error while parsing YAML configuration files
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Error while parsing JSON telemetry snapshots
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An event base that cannot be evaluated as configured
    #[error("Invalid event base '{description}': {reason}")]
    InvalidEventBase { description: String, reason: String },

    /// One or more alarm bases failed while the rest were still checked
    #[error("{} alarm base(s) failed to evaluate: {}", failures.len(), summarize(failures))]
    Evaluation { failures: Vec<AlarmBaseFailure> },

    /// Returned value type does not match the expected type
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: &'static str, actual: &'static str },
}

/// A single alarm base that could not be evaluated during `check_alarms`.
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmBaseFailure {
    /// Description of the offending event base
    pub description: String,
    /// Human readable cause
    pub reason: String,
}

impl fmt::Display for AlarmBaseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' ({})", self.description, self.reason)
    }
}

fn summarize(failures: &[AlarmBaseFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl VigilError {
    pub(crate) fn invalid(description: impl Into<String>, reason: impl Into<String>) -> Self {
        VigilError::InvalidEventBase {
            description: description.into(),
            reason: reason.into(),
        }
    }
}

/// Convenient alias over [`Result`] using [`VigilError`]
pub type Result<T> = std::result::Result<T, VigilError>;
