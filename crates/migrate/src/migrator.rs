//! Migrator - applies pending migrations against a borrowed connection
//!
//! Each migration runs in its own transaction: the script and the tracking row
//! commit together or not at all. Inside that transaction the current version is
//! read again, so an instance that lost a race to a concurrent deployment skips
//! the migration instead of applying it twice. Only a failed commit is handed to
//! the caller's [`RetryPolicy`].

use std::future::Future;
use std::path::Path;
use std::time::Instant as StdInstant;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::{MigrationConnection, MigrationTransaction};
use crate::definitions::{AppliedMigration, Migration, MigrationReport};
use crate::error::{MigrateError, MigrateResult};
use crate::loader::{insert_sorted, load_migrations};
use crate::policy::RetryPolicy;
use crate::store::VersionStore;

/// Schema migrator bound to one connection for its lifetime
pub struct Migrator<'c, C: MigrationConnection + ?Sized> {
    conn: &'c mut C,
    store: VersionStore,
    migrations: Vec<Migration>,
    cancellation: Cancellation,
}

impl<'c, C: MigrationConnection + ?Sized> Migrator<'c, C> {
    /// Create a migrator tracking versions in `version_table`
    ///
    /// The tracking table is created here if it is missing, so
    /// [`current_version`](Self::current_version) works before the first
    /// [`migrate`](Self::migrate).
    pub async fn create(conn: &'c mut C, version_table: &str) -> MigrateResult<Self> {
        let store = VersionStore::new(version_table)?;

        let mut tx = conn
            .begin()
            .await
            .map_err(|e| init_error(version_table, e))?;
        if let Err(err) = store.ensure_table_exists(tx.as_mut()).await {
            return Err(match err {
                MigrateError::Storage { source } => init_error(version_table, source),
                other => other,
            });
        }
        tx.commit().await.map_err(|e| init_error(version_table, e))?;

        debug!(table = version_table, "Migrator initialized");
        Ok(Self {
            conn,
            store,
            migrations: Vec::new(),
            cancellation: Cancellation::default(),
        })
    }

    /// Abort in-flight work when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation.token = Some(token);
        self
    }

    /// Abort in-flight work once `deadline` passes
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.cancellation.deadline = Some(deadline);
        self
    }

    /// Name of the tracking table
    pub fn version_table(&self) -> &str {
        self.store.table()
    }

    /// Load migration scripts from `dir`
    ///
    /// The scripts are merged with anything already registered. On any error
    /// nothing is added.
    pub fn load<P: AsRef<Path>>(&mut self, dir: P) -> MigrateResult<()> {
        let loaded = load_migrations(dir)?;
        let mut merged = self.migrations.clone();
        for migration in loaded {
            insert_sorted(&mut merged, migration)?;
        }
        self.migrations = merged;
        Ok(())
    }

    /// Register a single migration
    pub fn add_migration(&mut self, migration: Migration) -> MigrateResult<()> {
        if migration.version <= 0 {
            return Err(crate::error::ParseError::UnparsableFilename {
                file: migration.file,
            }
            .into());
        }
        insert_sorted(&mut self.migrations, migration)?;
        Ok(())
    }

    /// Registered migrations, ascending by version
    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// Apply every pending migration
    pub async fn migrate<P: RetryPolicy>(&mut self, policy: P) -> MigrateResult<MigrationReport> {
        self.run(None, policy).await
    }

    /// Apply pending migrations up to and including `target`
    pub async fn migrate_to<P: RetryPolicy>(
        &mut self,
        target: i64,
        policy: P,
    ) -> MigrateResult<MigrationReport> {
        if !self.migrations.iter().any(|m| m.version == target) {
            return Err(MigrateError::UnknownTarget { target });
        }
        self.run(Some(target), policy).await
    }

    /// Highest applied version, 0 for a fresh database
    pub async fn current_version(&mut self) -> MigrateResult<i64> {
        let signal = self.cancellation.clone();
        let mut tx = signal
            .until_cancelled(None, self.conn.begin())
            .await?
            .map_err(MigrateError::storage)?;
        let current = signal
            .until_cancelled(None, self.store.current_version(tx.as_mut()))
            .await??;
        signal
            .until_cancelled(None, tx.rollback())
            .await?
            .map_err(MigrateError::storage)?;
        Ok(current)
    }

    /// Registered migrations not yet applied
    pub async fn pending(&mut self) -> MigrateResult<Vec<&Migration>> {
        let current = self.current_version().await?;
        Ok(self
            .migrations
            .iter()
            .filter(|m| m.version > current)
            .collect())
    }

    /// Contents of the tracking table
    pub async fn applied(&mut self) -> MigrateResult<Vec<AppliedMigration>> {
        let signal = self.cancellation.clone();
        let mut tx = signal
            .until_cancelled(None, self.conn.begin())
            .await?
            .map_err(MigrateError::storage)?;
        let applied = signal
            .until_cancelled(None, self.store.applied(tx.as_mut()))
            .await??;
        signal
            .until_cancelled(None, tx.rollback())
            .await?
            .map_err(MigrateError::storage)?;
        Ok(applied)
    }

    async fn run<P: RetryPolicy>(
        &mut self,
        target: Option<i64>,
        mut policy: P,
    ) -> MigrateResult<MigrationReport> {
        let started = StdInstant::now();
        let signal = self.cancellation.clone();
        let mut report = MigrationReport::default();

        signal.check(None)?;

        // Ensure the table and read where we are
        let mut tx = signal
            .until_cancelled(None, self.conn.begin())
            .await?
            .map_err(MigrateError::storage)?;
        signal
            .until_cancelled(None, self.store.ensure_table_exists(tx.as_mut()))
            .await??;
        let current = signal
            .until_cancelled(None, self.store.current_version(tx.as_mut()))
            .await??;
        signal
            .until_cancelled(None, tx.commit())
            .await?
            .map_err(MigrateError::storage)?;

        if let Some(target) = target {
            if target < current {
                return Err(MigrateError::TargetBehind { target, current });
            }
        }

        let limit = target.unwrap_or(i64::MAX);
        report.skipped = self
            .migrations
            .iter()
            .filter(|m| m.version <= current)
            .count();

        debug!(
            table = self.store.table(),
            current_version = current,
            pending = self
                .migrations
                .iter()
                .filter(|m| m.version > current && m.version <= limit)
                .count(),
            "Starting migration run"
        );

        for migration in self
            .migrations
            .iter()
            .filter(|m| m.version > current && m.version <= limit)
        {
            apply(
                &mut *self.conn,
                &self.store,
                &signal,
                migration,
                &mut policy,
                &mut report,
            )
            .await?;
        }

        report.elapsed = started.elapsed();
        debug!(
            applied = report.applied.len(),
            skipped = report.skipped,
            commit_retries = report.commit_retries,
            "Migration run finished"
        );
        Ok(report)
    }
}

/// APPLY(v): begin, re-read version, execute, record, commit; retry on policy
async fn apply<C, P>(
    conn: &mut C,
    store: &VersionStore,
    signal: &Cancellation,
    migration: &Migration,
    policy: &mut P,
    report: &mut MigrationReport,
) -> MigrateResult<()>
where
    C: MigrationConnection + ?Sized,
    P: RetryPolicy,
{
    let version = Some(migration.version);

    loop {
        signal.check(version)?;

        let mut tx = signal
            .until_cancelled(version, conn.begin())
            .await?
            .map_err(MigrateError::storage)?;

        let current = signal
            .until_cancelled(version, store.current_version(tx.as_mut()))
            .await??;
        if migration.version <= current {
            debug!(
                version = migration.version,
                current_version = current,
                "Migration already applied by another instance, skipping"
            );
            signal
                .until_cancelled(version, tx.rollback())
                .await?
                .map_err(MigrateError::storage)?;
            report.skipped += 1;
            return Ok(());
        }

        debug!(version = migration.version, file = %migration.file, "Executing migration script");
        let executed = signal
            .until_cancelled(version, tx.execute(&migration.sql))
            .await?;
        if let Err(source) = executed {
            rollback_after_failure(tx, migration).await;
            return Err(MigrateError::ScriptExecution {
                version: migration.version,
                file: migration.file.clone(),
                source,
            });
        }

        let recorded = signal
            .until_cancelled(version, store.record_version(tx.as_mut(), migration.version))
            .await?;
        if let Err(err) = recorded {
            rollback_after_failure(tx, migration).await;
            return Err(err);
        }

        match signal.until_cancelled(version, tx.commit()).await? {
            Ok(()) => {
                info!(
                    version = migration.version,
                    name = %migration.name,
                    "Applied migration"
                );
                report.applied.push(migration.version);
                return Ok(());
            }
            Err(source) => {
                let err = MigrateError::CommitConflict {
                    version: migration.version,
                    file: migration.file.clone(),
                    source,
                };
                if !policy.decide(&err) {
                    return Err(err);
                }
                warn!(
                    version = migration.version,
                    error = %err,
                    "Commit failed, retrying migration"
                );
                report.commit_retries += 1;
            }
        }
    }
}

async fn rollback_after_failure(tx: Box<dyn MigrationTransaction + '_>, migration: &Migration) {
    if let Err(e) = tx.rollback().await {
        warn!(
            version = migration.version,
            error = %e,
            "Rollback after failed migration also failed"
        );
    }
}

fn init_error(table: &str, source: sqlx::Error) -> MigrateError {
    MigrateError::initialization_with_source(
        format!("cannot create version table '{}'", table),
        source,
    )
}

/// The caller's cancellation signal and deadline
#[derive(Debug, Clone, Default)]
struct Cancellation {
    token: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl Cancellation {
    fn is_cancelled(&self) -> bool {
        self.token.as_ref().is_some_and(|t| t.is_cancelled())
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn check(&self, version: Option<i64>) -> MigrateResult<()> {
        if self.is_cancelled() {
            return Err(MigrateError::Cancelled { version });
        }
        Ok(())
    }

    /// Drive `fut` unless cancellation or the deadline wins first
    async fn until_cancelled<F: Future>(
        &self,
        version: Option<i64>,
        fut: F,
    ) -> MigrateResult<F::Output> {
        if self.token.is_none() && self.deadline.is_none() {
            return Ok(fut.await);
        }

        let cancelled = async {
            match &self.token {
                Some(token) => token.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => Err(MigrateError::Cancelled { version }),
            _ = expired => Err(MigrateError::Cancelled { version }),
            out = fut => Ok(out),
        }
    }
}
