//! Error types for the migration engine
//!
//! Every failure carries enough context to identify the offending migration:
//! its version and the file it was loaded from.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for migration operations
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Errors raised while loading migration scripts
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("duplicate version {version}: {first} and {second}")]
    DuplicateVersion {
        version: i64,
        first: String,
        second: String,
    },

    #[error("unparsable filename {file}")]
    UnparsableFilename { file: String },
}

/// Errors raised by the migration engine
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("cannot initialize migrator: {message}")]
    Initialization {
        message: String,
        #[source]
        source: Option<sqlx::Error>,
    },

    #[error("{} is unreadable: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("storage error: {source}")]
    Storage {
        #[source]
        source: sqlx::Error,
    },

    #[error("migration {version} ({file}) failed to execute: {source}")]
    ScriptExecution {
        version: i64,
        file: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("commit of migration {version} ({file}) failed: {source}")]
    CommitConflict {
        version: i64,
        file: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("migration run cancelled{}", .version.map(|v| format!(" while applying version {}", v)).unwrap_or_default())]
    Cancelled { version: Option<i64> },

    #[error("target version {target} is behind current version {current}; down-migrations are not supported")]
    TargetBehind { target: i64, current: i64 },

    #[error("target version {target} is not among the loaded migrations")]
    UnknownTarget { target: i64 },
}

impl MigrateError {
    /// Create an initialization error without an underlying driver error
    pub fn initialization<T: Into<String>>(message: T) -> Self {
        MigrateError::Initialization {
            message: message.into(),
            source: None,
        }
    }

    /// Create an initialization error caused by a driver error
    pub fn initialization_with_source<T: Into<String>>(message: T, source: sqlx::Error) -> Self {
        MigrateError::Initialization {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Wrap a tracking-table failure
    pub fn storage(source: sqlx::Error) -> Self {
        MigrateError::Storage { source }
    }

    /// Whether the failure is a commit conflict, the only class a retry policy sees
    pub fn is_retryable(&self) -> bool {
        matches!(self, MigrateError::CommitConflict { .. })
    }

    /// Version of the migration the failure is attributed to, if any
    pub fn version(&self) -> Option<i64> {
        match self {
            MigrateError::ScriptExecution { version, .. }
            | MigrateError::CommitConflict { version, .. } => Some(*version),
            MigrateError::Cancelled { version } => *version,
            MigrateError::Parse(ParseError::DuplicateVersion { version, .. }) => Some(*version),
            _ => None,
        }
    }

    /// The driver error behind this failure, if there is one
    pub fn database_error(&self) -> Option<&sqlx::Error> {
        match self {
            MigrateError::Storage { source }
            | MigrateError::ScriptExecution { source, .. }
            | MigrateError::CommitConflict { source, .. } => Some(source),
            MigrateError::Initialization { source, .. } => source.as_ref(),
            _ => None,
        }
    }
}

/// Check if a driver error is a transient conflict that retrying can resolve
///
/// Recognises PostgreSQL `serialization_failure` (40001) and
/// `deadlock_detected` (40P01).
pub fn is_serialization_failure(error: &sqlx::Error) -> bool {
    match error.as_database_error().and_then(|e| e.code()) {
        Some(code) => code == "40001" || code == "40P01",
        None => false,
    }
}
