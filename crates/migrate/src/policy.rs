//! Retry policies for failed commits
//!
//! A policy is consulted only when committing a migration's transaction fails.
//! Script failures, bookkeeping failures and cancellation never reach it.

use crate::error::{is_serialization_failure, MigrateError};

/// Decides whether a failed commit should be retried from a fresh transaction
///
/// The engine puts no bound on the number of retries; a policy that always
/// answers `true` retries forever. Any `FnMut(&MigrateError) -> bool` closure is a
/// policy, which is the usual way to add logging or counting.
pub trait RetryPolicy {
    /// `true` to re-run the same migration, `false` to abort and surface `error`
    fn decide(&mut self, error: &MigrateError) -> bool;
}

impl<F> RetryPolicy for F
where
    F: FnMut(&MigrateError) -> bool,
{
    fn decide(&mut self, error: &MigrateError) -> bool {
        self(error)
    }
}

/// Never retry; the first failed commit aborts the run
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverRetry;

impl RetryPolicy for NeverRetry {
    fn decide(&mut self, _error: &MigrateError) -> bool {
        false
    }
}

/// Retry serialization failures and deadlocks, up to `max_attempts` retries in total
#[derive(Debug, Clone)]
pub struct RetrySerializationFailures {
    pub max_attempts: u32,
    attempts: u32,
}

impl RetrySerializationFailures {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            attempts: 0,
        }
    }

    /// Retries granted so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl Default for RetrySerializationFailures {
    fn default() -> Self {
        Self::new(3)
    }
}

impl RetryPolicy for RetrySerializationFailures {
    fn decide(&mut self, error: &MigrateError) -> bool {
        let transient = error
            .database_error()
            .map(is_serialization_failure)
            .unwrap_or(false);
        if !transient || self.attempts >= self.max_attempts {
            return false;
        }
        self.attempts += 1;
        true
    }
}
