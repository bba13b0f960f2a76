//! Migration Definitions - Core types shared by the loader, store and migrator

use chrono::NaiveDateTime;
use std::time::Duration;

/// A single versioned schema-change script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// Position in the ordered sequence, always positive
    pub version: i64,
    /// Human-readable label taken from the filename
    pub name: String,
    /// File the script was read from, or a synthetic name for programmatic migrations
    pub file: String,
    /// Script body, executed verbatim
    pub sql: String,
}

impl Migration {
    /// Create a migration that does not come from a file
    pub fn new<N: Into<String>, S: Into<String>>(version: i64, name: N, sql: S) -> Self {
        let name = name.into();
        Self {
            version,
            file: format!("{}_{}", version, name.replace(' ', "_")),
            name,
            sql: sql.into(),
        }
    }
}

/// A row of the tracking table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    pub version: i64,
    pub applied_at: NaiveDateTime,
}

/// Result of a `migrate` run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Versions committed by this run, in order
    pub applied: Vec<i64>,
    /// Loaded migrations found already applied (by an earlier run or a concurrent instance)
    pub skipped: usize,
    /// Commit attempts that failed and were retried
    pub commit_retries: u32,
    /// Wall time of the run
    pub elapsed: Duration,
}

impl MigrationReport {
    /// Whether the run changed the schema
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}
