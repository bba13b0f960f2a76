//! Database seam for the migration engine
//!
//! The migrator only needs to open a transaction, run opaque SQL inside it, read a
//! scalar or two, and commit or roll back. These traits capture exactly that so the
//! engine is independent of the driver. Implementations are provided for sqlx
//! PostgreSQL and SQLite connections.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::{Executor, PgConnection, Postgres, Row, Sqlite, SqliteConnection};

use crate::definitions::AppliedMigration;

/// A connection the migrator can open transactions on
///
/// The migrator borrows the connection for its whole lifetime and uses it
/// strictly sequentially, one transaction at a time.
#[async_trait]
pub trait MigrationConnection: Send {
    /// Begin a new transaction
    async fn begin<'c>(&'c mut self) -> Result<Box<dyn MigrationTransaction + 'c>, sqlx::Error>;
}

/// An open transaction
///
/// Dropping a transaction without committing rolls it back.
#[async_trait]
pub trait MigrationTransaction: Send {
    /// Execute a script verbatim as one unit; it may contain several statements
    async fn execute(&mut self, sql: &str) -> Result<(), sqlx::Error>;

    /// Execute a statement with the version bound as its only parameter (`$1`)
    async fn execute_with_version(&mut self, sql: &str, version: i64) -> Result<(), sqlx::Error>;

    /// Run a query returning a single integer
    async fn fetch_version(&mut self, sql: &str) -> Result<i64, sqlx::Error>;

    /// Run a query returning `(version, applied_at)` rows
    async fn fetch_applied(&mut self, sql: &str) -> Result<Vec<AppliedMigration>, sqlx::Error>;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> Result<(), sqlx::Error>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> Result<(), sqlx::Error>;
}

/// PostgreSQL transaction, opened at SERIALIZABLE isolation
///
/// Two service instances migrating the same database concurrently then conflict
/// instead of interleaving; the loser sees a serialization failure.
pub struct PostgresTransaction<'c> {
    tx: sqlx::Transaction<'c, Postgres>,
}

#[async_trait]
impl MigrationConnection for PgConnection {
    async fn begin<'c>(&'c mut self) -> Result<Box<dyn MigrationTransaction + 'c>, sqlx::Error> {
        let mut tx = sqlx::Connection::begin(self).await?;
        (&mut *tx)
            .execute("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .await?;
        Ok(Box::new(PostgresTransaction { tx }))
    }
}

#[async_trait]
impl<'c> MigrationTransaction for PostgresTransaction<'c> {
    async fn execute(&mut self, sql: &str) -> Result<(), sqlx::Error> {
        // A bare &str runs through the simple query protocol, which accepts
        // multi-statement scripts.
        (&mut *self.tx).execute(sql).await?;
        Ok(())
    }

    async fn execute_with_version(&mut self, sql: &str, version: i64) -> Result<(), sqlx::Error> {
        sqlx::query(sql).bind(version).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn fetch_version(&mut self, sql: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(sql)
            .fetch_one(&mut *self.tx)
            .await
    }

    async fn fetch_applied(&mut self, sql: &str) -> Result<Vec<AppliedMigration>, sqlx::Error> {
        let rows = sqlx::query(sql).fetch_all(&mut *self.tx).await?;
        rows.iter()
            .map(|row| {
                Ok(AppliedMigration {
                    version: row.try_get::<i64, _>(0)?,
                    applied_at: row.try_get::<NaiveDateTime, _>(1)?,
                })
            })
            .collect()
    }

    async fn commit(self: Box<Self>) -> Result<(), sqlx::Error> {
        self.tx.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), sqlx::Error> {
        self.tx.rollback().await
    }
}

/// SQLite transaction
///
/// SQLite serializes writers itself, so no isolation level is set.
pub struct SqliteTransaction<'c> {
    tx: sqlx::Transaction<'c, Sqlite>,
}

#[async_trait]
impl MigrationConnection for SqliteConnection {
    async fn begin<'c>(&'c mut self) -> Result<Box<dyn MigrationTransaction + 'c>, sqlx::Error> {
        let tx = sqlx::Connection::begin(self).await?;
        Ok(Box::new(SqliteTransaction { tx }))
    }
}

#[async_trait]
impl<'c> MigrationTransaction for SqliteTransaction<'c> {
    async fn execute(&mut self, sql: &str) -> Result<(), sqlx::Error> {
        (&mut *self.tx).execute(sql).await?;
        Ok(())
    }

    async fn execute_with_version(&mut self, sql: &str, version: i64) -> Result<(), sqlx::Error> {
        sqlx::query(sql).bind(version).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn fetch_version(&mut self, sql: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(sql)
            .fetch_one(&mut *self.tx)
            .await
    }

    async fn fetch_applied(&mut self, sql: &str) -> Result<Vec<AppliedMigration>, sqlx::Error> {
        let rows = sqlx::query(sql).fetch_all(&mut *self.tx).await?;
        rows.iter()
            .map(|row| {
                Ok(AppliedMigration {
                    version: row.try_get::<i64, _>(0)?,
                    applied_at: row.try_get::<NaiveDateTime, _>(1)?,
                })
            })
            .collect()
    }

    async fn commit(self: Box<Self>) -> Result<(), sqlx::Error> {
        self.tx.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), sqlx::Error> {
        self.tx.rollback().await
    }
}
