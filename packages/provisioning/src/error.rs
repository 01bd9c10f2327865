use std::fmt;

use thiserror::Error;

use crate::diagnostics::Requirement;
use crate::model::StatCategory;

/// Substring drivers without structured error codes use for duplicate objects.
/// Matched case-sensitively.
pub const ALREADY_EXISTS_MARKER: &str = "already exists";

/// Failure reported by a single target-system call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    #[error("already exists: {message}")]
    AlreadyExists { message: String },
    #[error("{message}")]
    Failed { message: String },
}

impl TargetError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::AlreadyExists {
            message: message.into(),
        }
    }

    /// Classify a raw driver message when no structured code is available.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.contains(ALREADY_EXISTS_MARKER) {
            Self::AlreadyExists { message }
        } else {
            Self::Failed { message }
        }
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

/// Identity of the provisioning step that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Database {
        database: String,
    },
    Table {
        database: String,
        table: String,
    },
    Index {
        database: String,
        table: String,
        field: String,
    },
    IndexWait {
        database: String,
        table: String,
        field: String,
    },
    User {
        username: String,
    },
    OperationLog {
        database: String,
    },
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Database { database } => write!(f, "database '{database}'"),
            Step::Table { database, table } => write!(f, "table '{database}.{table}'"),
            Step::Index {
                database,
                table,
                field,
            } => write!(f, "index '{field}' on '{database}.{table}'"),
            Step::IndexWait {
                database,
                table,
                field,
            } => write!(f, "readiness of index '{field}' on '{database}.{table}'"),
            Step::User { username } => write!(f, "user '{username}'"),
            Step::OperationLog { database } => write!(f, "operation log for '{database}'"),
        }
    }
}

/// Fatal error of a bootstrap run. Aborts the remaining setup.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Configuration error: {message}")]
    Config { message: String },
    #[error("Connection to {target} failed: {message}")]
    Connect { target: String, message: String },
    #[error("Provisioning failed at {step}: {source}")]
    Step {
        step: Step,
        #[source]
        source: TargetError,
    },
}

impl ProvisionError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn at(step: Step, source: TargetError) -> Self {
        Self::Step { step, source }
    }

    /// The failing step, when the error came from a target call.
    pub fn step(&self) -> Option<&Step> {
        match self {
            Self::Step { step, .. } => Some(step),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplePhase {
    Read,
    Append,
}

impl fmt::Display for SamplePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplePhase::Read => f.write_str("read"),
            SamplePhase::Append => f.write_str("append"),
        }
    }
}

/// Non-fatal failure of one sampler tick. Logged and swallowed.
#[derive(Debug, Clone, Error)]
#[error("Sampling {category} stats failed during {phase}: {source}")]
pub struct SamplingError {
    pub category: StatCategory,
    pub phase: SamplePhase,
    #[source]
    pub source: TargetError,
}

#[derive(Debug, Error)]
pub enum DiagnosticsError {
    #[error("Unknown diagnostic procedure: {id}")]
    UnknownProcedure { id: String },
    #[error("Failed to capture {requirement} for {id}: {source}")]
    Capture {
        id: String,
        requirement: Requirement,
        #[source]
        source: TargetError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_with_marker_is_already_exists() {
        let err = TargetError::from_message("role \"developer\" already exists");
        assert!(err.is_already_exists());
    }

    #[test]
    fn marker_match_is_case_sensitive() {
        let err = TargetError::from_message("Role Already Exists");
        assert!(!err.is_already_exists());
        assert_eq!(err.to_string(), "Role Already Exists");
    }

    #[test]
    fn step_error_names_the_failing_object() {
        let err = ProvisionError::at(
            Step::Index {
                database: "development".into(),
                table: "users".into(),
                field: "email".into(),
            },
            TargetError::failed("disk full"),
        );
        let text = err.to_string();
        assert!(text.contains("index 'email' on 'development.users'"));
        assert!(text.contains("disk full"));
        assert!(err.step().is_some());
    }
}
