//! Version Store - the durable tracking table
//!
//! One row per applied migration: `(version BIGINT PRIMARY KEY, applied_at TIMESTAMP)`.
//! The store never opens, commits or rolls back a transaction; the migrator hands
//! it one, so recording a version commits or fails together with the script.

use crate::connection::MigrationTransaction;
use crate::definitions::AppliedMigration;
use crate::error::{MigrateError, MigrateResult};

/// Tracking table access, keyed by a configurable table name
#[derive(Debug, Clone)]
pub struct VersionStore {
    table: String,
}

impl VersionStore {
    /// Create a store for `table`
    ///
    /// The name is interpolated into SQL, so only plain identifiers, optionally
    /// schema-qualified (`ops.schema_version`), are accepted.
    pub fn new<T: Into<String>>(table: T) -> MigrateResult<Self> {
        let table = table.into();
        if !is_valid_table_name(&table) {
            return Err(MigrateError::initialization(format!(
                "invalid version table name '{}'",
                table
            )));
        }
        Ok(Self { table })
    }

    /// Name of the tracking table
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the tracking table if it does not exist yet
    ///
    /// Uses the database's own `IF NOT EXISTS`, so concurrent callers are safe.
    pub async fn ensure_table_exists(&self, tx: &mut dyn MigrationTransaction) -> MigrateResult<()> {
        tx.execute(&self.create_table_sql())
            .await
            .map_err(MigrateError::storage)
    }

    /// Highest recorded version, or 0 when nothing has been applied
    pub async fn current_version(&self, tx: &mut dyn MigrationTransaction) -> MigrateResult<i64> {
        tx.fetch_version(&self.current_version_sql())
            .await
            .map_err(MigrateError::storage)
    }

    /// Record `version` as applied
    pub async fn record_version(
        &self,
        tx: &mut dyn MigrationTransaction,
        version: i64,
    ) -> MigrateResult<()> {
        tx.execute_with_version(&self.record_version_sql(), version)
            .await
            .map_err(MigrateError::storage)
    }

    /// All tracking rows, ascending by version
    pub async fn applied(&self, tx: &mut dyn MigrationTransaction) -> MigrateResult<Vec<AppliedMigration>> {
        tx.fetch_applied(&self.applied_sql())
            .await
            .map_err(MigrateError::storage)
    }

    /// SQL to create the tracking table
    pub fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
                version BIGINT PRIMARY KEY,\n    \
                applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP\n\
            )",
            self.table
        )
    }

    /// SQL to read the current version
    pub fn current_version_sql(&self) -> String {
        format!("SELECT COALESCE(MAX(version), 0) FROM {}", self.table)
    }

    /// SQL to record a version
    pub fn record_version_sql(&self) -> String {
        format!("INSERT INTO {} (version) VALUES ($1)", self.table)
    }

    /// SQL to list applied versions
    pub fn applied_sql(&self) -> String {
        format!(
            "SELECT version, applied_at FROM {} ORDER BY version",
            self.table
        )
    }
}

fn is_valid_table_name(name: &str) -> bool {
    let mut parts = 0;
    for part in name.split('.') {
        parts += 1;
        let mut chars = part.chars();
        let head_ok = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
        if !head_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return false;
        }
    }
    parts <= 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_validation() {
        assert!(VersionStore::new("schema_version").is_ok());
        assert!(VersionStore::new("ops.schema_version").is_ok());
        assert!(VersionStore::new("_v2").is_ok());

        for bad in ["", "1table", "a.b.c", "schema version", "t; DROP TABLE x", "t-1", "a."] {
            let err = VersionStore::new(bad).unwrap_err();
            assert!(
                matches!(err, MigrateError::Initialization { .. }),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_sql_generation() {
        let store = VersionStore::new("schema_version").unwrap();

        let create = store.create_table_sql();
        assert!(create.contains("CREATE TABLE IF NOT EXISTS schema_version"));
        assert!(create.contains("version BIGINT PRIMARY KEY"));
        assert!(create.contains("applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP"));

        assert_eq!(
            store.current_version_sql(),
            "SELECT COALESCE(MAX(version), 0) FROM schema_version"
        );
        assert_eq!(
            store.record_version_sql(),
            "INSERT INTO schema_version (version) VALUES ($1)"
        );
        assert!(store.applied_sql().ends_with("ORDER BY version"));
    }
}
