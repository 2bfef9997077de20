//! Index Applier (C7): advisory-locked, idempotent concurrent creation of
//! accepted index suggestions.
//!
//! Only invoked when `--create` is set and the suggestion set is non-empty.
//! Serializes concurrent instances of this tool against the same database
//! through a single fixed-id advisory lock, re-checks the catalog (another
//! process may have already built the index), and issues `CREATE INDEX
//! CONCURRENTLY` one suggestion at a time.

use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::catalog;
use crate::error::{AdvisorError, Result};
use crate::evaluator::Suggestion;
use crate::gateway::Gateway;
use crate::model::CandidateIndex;

/// Fixed advisory-lock id shared by every instance of this tool that
/// connects to the same database.
const ADVISORY_LOCK_ID: i64 = 123_456;

/// How long to wait between `pg_try_advisory_lock` poll attempts.
const LOCK_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Outcome of attempting to apply one accepted suggestion.
#[derive(Debug)]
pub struct ApplyResult {
    pub index: CandidateIndex,
    pub outcome: ApplyOutcome,
}

#[derive(Debug)]
pub enum ApplyOutcome {
    /// `CREATE INDEX CONCURRENTLY` succeeded; elapsed wall time recorded.
    Created(Duration),
    /// Another process had already built an equivalent index.
    AlreadyExists,
    /// `lock_not_available` (55P03) during the individual `CREATE INDEX`;
    /// the suggestion is skipped, not retried.
    LockNotAvailable,
}

/// A held process-wide advisory lock. Acquired with [`AdvisoryLock::acquire`];
/// callers must invoke [`AdvisoryLock::release`] on every exit path (the
/// index applier does so in a single `apply_suggestions` body with no early
/// returns after acquisition, per spec §9's scoped-acquisition requirement).
pub struct AdvisoryLock {
    id: i64,
}

impl AdvisoryLock {
    /// Tries `pg_try_advisory_lock` once; if unavailable, logs
    /// "Waiting for lock..." exactly once and polls every second until
    /// acquired.
    pub async fn acquire(gateway: &mut Gateway) -> Result<Self> {
        if try_lock(gateway, ADVISORY_LOCK_ID).await? {
            return Ok(Self { id: ADVISORY_LOCK_ID });
        }
        info!("Waiting for lock...");
        loop {
            sleep(LOCK_POLL_INTERVAL).await;
            if try_lock(gateway, ADVISORY_LOCK_ID).await? {
                return Ok(Self { id: ADVISORY_LOCK_ID });
            }
        }
    }

    /// Releases the lock, suppressing any error from the release statement
    /// itself (spec §4.7 step 5: "suppressing messages during release").
    pub async fn release(self, gateway: &mut Gateway) {
        let sql = format!("SELECT pg_advisory_unlock({})", self.id);
        let _ = gateway.query_rows(&sql, &[]).await;
    }
}

async fn try_lock(gateway: &mut Gateway, id: i64) -> Result<bool> {
    let rows = gateway
        .query_rows(&format!("SELECT pg_try_advisory_lock({id})"), &[])
        .await?;
    Ok(rows
        .first()
        .map(|row| {
            use sqlx_core::row::Row;
            row.get::<bool, _>(0)
        })
        .unwrap_or(false))
}

/// Applies every suggestion not already present as a real index, holding the
/// advisory lock for the whole operation. The lock is released in every exit
/// path, including when a suggestion fails to create.
pub async fn apply_suggestions(
    gateway: &mut Gateway,
    suggestions: &[Suggestion],
) -> Result<Vec<ApplyResult>> {
    if suggestions.is_empty() {
        return Ok(Vec::new());
    }

    let lock = AdvisoryLock::acquire(gateway).await?;
    let results = apply_locked(gateway, suggestions).await;
    lock.release(gateway).await;
    results
}

async fn apply_locked(gateway: &mut Gateway, suggestions: &[Suggestion]) -> Result<Vec<ApplyResult>> {
    let tables: std::collections::BTreeSet<String> =
        suggestions.iter().map(|s| s.index.table.clone()).collect();
    // Re-read existing indexes: another process may have already built one
    // of these while we were evaluating or waiting for the lock.
    let existing = catalog::indexes(gateway, &tables).await?;

    let mut results = Vec::with_capacity(suggestions.len());
    for suggestion in suggestions {
        if existing
            .iter()
            .any(|idx| idx.table == suggestion.index.table && idx.columns == suggestion.index.columns)
        {
            results.push(ApplyResult {
                index: suggestion.index.clone(),
                outcome: ApplyOutcome::AlreadyExists,
            });
            continue;
        }
        results.push(create_one(gateway, &suggestion.index).await?);
    }
    Ok(results)
}

/// Issues `CREATE INDEX CONCURRENTLY` for one suggestion. Per spec §4.7 step
/// 4, only the `lock_not_available` class is recovered at this level (the
/// suggestion is logged and skipped); every other error class propagates,
/// consistent with the taxonomy in spec §7.
async fn create_one(gateway: &mut Gateway, index: &CandidateIndex) -> Result<ApplyResult> {
    let columns: Vec<String> = index.columns.iter().map(|c| Gateway::quote_identifier(c)).collect();
    let sql = format!(
        "CREATE INDEX CONCURRENTLY ON {} ({})",
        Gateway::quote_identifier(&index.table),
        columns.join(", ")
    );
    let start = Instant::now();
    match gateway.execute(&sql).await {
        Ok(()) => Ok(ApplyResult {
            index: index.clone(),
            outcome: ApplyOutcome::Created(start.elapsed()),
        }),
        Err(AdvisorError::Connection(db_err)) if AdvisorError::is_lock_not_available(&db_err) => {
            warn!(table = %index.table, columns = ?index.columns, "lock not available, skipping index");
            Ok(ApplyResult {
                index: index.clone(),
                outcome: ApplyOutcome::LockNotAvailable,
            })
        }
        Err(other) => Err(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_outcome_variants_are_distinguishable() {
        let created = ApplyOutcome::Created(Duration::from_secs(1));
        let exists = ApplyOutcome::AlreadyExists;
        let locked = ApplyOutcome::LockNotAvailable;
        assert!(matches!(created, ApplyOutcome::Created(_)));
        assert!(matches!(exists, ApplyOutcome::AlreadyExists));
        assert!(matches!(locked, ApplyOutcome::LockNotAvailable));
    }
}
