//! Scripted in-memory connection for exercising the migrator's control flow
//!
//! Scripts containing `FAIL` error out, scripts containing `SLEEP` block for an
//! hour, and the next `fail_commits` migration commits are rejected as if a concurrent
//! transaction had won. `fail_records` breaks the tracking-table insert and
//! `hang_rollbacks` makes rollbacks block for an hour.

#![allow(dead_code)]

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use phonebook_migrate::{AppliedMigration, MigrationConnection, MigrationTransaction};

#[derive(Debug, Default)]
pub struct FakeState {
    /// Versions in the tracking table, in commit order
    pub versions: Vec<i64>,
    /// Committed migration scripts, in commit order
    pub scripts: Vec<String>,
    pub table_created: bool,
    /// Reject this many upcoming commits of transactions that record a version
    pub fail_commits: u32,
    /// When a commit is rejected, pretend another instance committed the same work
    pub concurrent_winner: bool,
    /// Reject every tracking-table insert
    pub fail_records: bool,
    pub hang_rollbacks: bool,
    pub begins: u32,
    pub commits: u32,
    pub rollbacks: u32,
}

#[derive(Clone, Default)]
pub struct FakeConnection {
    state: Arc<Mutex<FakeState>>,
}

impl FakeConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }
}

struct FakeTransaction {
    state: Arc<Mutex<FakeState>>,
    scripts: Vec<String>,
    versions: Vec<i64>,
    creates_table: bool,
}

#[async_trait]
impl MigrationConnection for FakeConnection {
    async fn begin<'c>(&'c mut self) -> Result<Box<dyn MigrationTransaction + 'c>, sqlx::Error> {
        self.state().begins += 1;
        Ok(Box::new(FakeTransaction {
            state: self.state.clone(),
            scripts: Vec::new(),
            versions: Vec::new(),
            creates_table: false,
        }))
    }
}

#[async_trait]
impl MigrationTransaction for FakeTransaction {
    async fn execute(&mut self, sql: &str) -> Result<(), sqlx::Error> {
        if sql.starts_with("CREATE TABLE IF NOT EXISTS") {
            self.creates_table = true;
            return Ok(());
        }
        if sql.contains("SLEEP") {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if sql.contains("FAIL") {
            return Err(sqlx::Error::Protocol(format!("syntax error in {sql:?}")));
        }
        self.scripts.push(sql.to_string());
        Ok(())
    }

    async fn execute_with_version(&mut self, _sql: &str, version: i64) -> Result<(), sqlx::Error> {
        if self.state.lock().unwrap().fail_records {
            return Err(sqlx::Error::Protocol(format!(
                "relation is read-only, cannot record {version}"
            )));
        }
        if self.state.lock().unwrap().versions.contains(&version) || self.versions.contains(&version) {
            return Err(sqlx::Error::Protocol(format!("duplicate key {version}")));
        }
        self.versions.push(version);
        Ok(())
    }

    async fn fetch_version(&mut self, _sql: &str) -> Result<i64, sqlx::Error> {
        let state = self.state.lock().unwrap();
        Ok(state
            .versions
            .iter()
            .chain(self.versions.iter())
            .copied()
            .max()
            .unwrap_or(0))
    }

    async fn fetch_applied(&mut self, _sql: &str) -> Result<Vec<AppliedMigration>, sqlx::Error> {
        let applied_at = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let mut versions = self.state.lock().unwrap().versions.clone();
        versions.sort();
        Ok(versions
            .into_iter()
            .map(|version| AppliedMigration {
                version,
                applied_at,
            })
            .collect())
    }

    async fn commit(self: Box<Self>) -> Result<(), sqlx::Error> {
        let mut state = self.state.lock().unwrap();
        if state.fail_commits > 0 && !self.versions.is_empty() {
            state.fail_commits -= 1;
            if state.concurrent_winner {
                state.versions.extend(self.versions.iter().copied());
                state.scripts.extend(self.scripts.iter().cloned());
            }
            return Err(sqlx::Error::Protocol(
                "could not serialize access due to concurrent update".to_string(),
            ));
        }
        state.commits += 1;
        state.table_created |= self.creates_table;
        state.versions.extend(self.versions.iter().copied());
        state.scripts.extend(self.scripts.iter().cloned());
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), sqlx::Error> {
        let hang = self.state.lock().unwrap().hang_rollbacks;
        if hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.state.lock().unwrap().rollbacks += 1;
        Ok(())
    }
}
