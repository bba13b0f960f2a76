//! Startup schema migration

use std::time::Duration;

use phonebook_migrate::{MigrateError, MigrateResult, Migrator};
use sqlx::PgPool;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::MigrationsConfig;

/// Bring the schema up to date using one pooled connection
///
/// Returns the schema version afterwards. The connection goes back to the pool
/// when this returns.
pub async fn migrate_database(
    pool: &PgPool,
    config: &MigrationsConfig,
    shutdown: CancellationToken,
) -> MigrateResult<i64> {
    let mut conn = pool.acquire().await.map_err(|source| {
        MigrateError::initialization_with_source("unable to acquire a database connection", source)
    })?;

    let mut migrator = Migrator::create(&mut *conn, &config.table)
        .await?
        .with_cancellation(shutdown);
    if let Some(secs) = config.timeout_secs {
        migrator = migrator.with_deadline(Instant::now() + Duration::from_secs(secs));
    }

    migrator.load(&config.dir)?;
    info!(
        dir = %config.dir.display(),
        count = migrator.migrations().len(),
        "Loaded migrations"
    );

    let report = migrator
        .migrate(commit_retry_policy(config.max_commit_retries))
        .await?;
    let version = migrator.current_version().await?;

    info!(
        version,
        applied = ?report.applied,
        commit_retries = report.commit_retries,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "Migration done"
    );
    Ok(version)
}

/// Retry any failed commit, at most `max_retries` times per run
pub fn commit_retry_policy(max_retries: u32) -> impl FnMut(&MigrateError) -> bool {
    let mut retries = 0;
    move |err: &MigrateError| {
        if retries >= max_retries {
            error!(retries, error = %err, "Commit failed during migration, giving up");
            return false;
        }
        retries += 1;
        info!(attempt = retries, error = %err, "Commit failed during migration, retrying");
        true
    }
}
