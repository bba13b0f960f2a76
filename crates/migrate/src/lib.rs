//! # phonebook-migrate: Versioned SQL schema migrations
//!
//! Discovers `<version>_<label>.sql` scripts in a directory and applies the ones
//! a database has not seen yet, in ascending version order. Each migration and its
//! tracking row commit in one transaction. Several service instances may migrate
//! the same database at once; the loser of a commit race asks a caller-supplied
//! [`RetryPolicy`] whether to try again, and re-checks the version before doing so.
//!
//! ```no_run
//! use phonebook_migrate::{Migrator, RetrySerializationFailures};
//! use sqlx::{Connection, PgConnection};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut conn = PgConnection::connect("postgres://localhost/app").await?;
//! let mut migrator = Migrator::create(&mut conn, "schema_version").await?;
//! migrator.load("./migrations")?;
//! let report = migrator.migrate(RetrySerializationFailures::default()).await?;
//! println!("applied {:?}", report.applied);
//! # Ok(())
//! # }
//! ```
//!
//! The crate emits `tracing` events but never installs a subscriber.

pub mod connection;
pub mod definitions;
pub mod error;
pub mod loader;
pub mod migrator;
pub mod policy;
pub mod store;

pub use connection::{MigrationConnection, MigrationTransaction, PostgresTransaction, SqliteTransaction};
pub use definitions::{AppliedMigration, Migration, MigrationReport};
pub use error::{is_serialization_failure, MigrateError, MigrateResult, ParseError};
pub use loader::{load_migrations, parse_filename};
pub use migrator::Migrator;
pub use policy::{NeverRetry, RetryPolicy, RetrySerializationFailures};
pub use store::VersionStore;
