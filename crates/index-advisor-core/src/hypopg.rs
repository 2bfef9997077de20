//! Hypothetical Index Engine (C5): wraps HypoPG.

use std::collections::HashMap;

use sqlx_core::row::Row;

use crate::error::Result;
use crate::gateway::Gateway;
use crate::model::CandidateIndex;

/// Keeps the reverse mapping from a hypothetical index's opaque name back to
/// the ordered column set that produced it, for the current batch only.
/// Reset discards the entire map — hypothetical indexes are session-wide
/// state inside the database and must never carry over between batches.
#[derive(Debug, Default)]
pub struct HypoEngine {
    reverse: HashMap<String, CandidateIndex>,
}

impl HypoEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets all hypothetical indexes in the session and clears the
    /// reverse mapping. Must run at the start of every batch before any
    /// `create` call.
    pub async fn reset(&mut self, gateway: &mut Gateway) -> Result<()> {
        gateway.execute("SELECT hypopg_reset()").await?;
        self.reverse.clear();
        Ok(())
    }

    /// Creates a hypothetical B-tree index on `candidate` and records the
    /// name the database assigned it.
    pub async fn create(&mut self, gateway: &mut Gateway, candidate: CandidateIndex) -> Result<String> {
        let quoted_columns: Vec<String> = candidate
            .columns
            .iter()
            .map(|c| Gateway::quote_identifier(c))
            .collect();
        let create_stmt = format!(
            "CREATE INDEX ON {} ({})",
            Gateway::quote_identifier(&candidate.table),
            quoted_columns.join(", ")
        );
        let sql = format!(
            "SELECT indexname FROM hypopg_create_index({})",
            Gateway::quote_literal(&create_stmt)
        );
        let rows = gateway.query_rows(&sql, &[]).await?;
        let name: String = rows
            .first()
            .map(|row| row.get("indexname"))
            .unwrap_or_default();
        self.record(name.clone(), candidate);
        Ok(name)
    }

    /// Records a name -> candidate mapping directly, bypassing the database.
    /// Used by `create` itself and by tests that need a populated engine
    /// without a live connection.
    pub fn record(&mut self, name: impl Into<String>, candidate: CandidateIndex) {
        self.reverse.insert(name.into(), candidate);
    }

    /// Looks up the column set a hypothetical index's opaque name maps to.
    #[must_use]
    pub fn columns_for(&self, name: &str) -> Option<&CandidateIndex> {
        self.reverse.get(name)
    }

    /// Number of hypothetical indexes created so far this batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.reverse.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reverse.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_map_starts_empty() {
        let engine = HypoEngine::new();
        assert!(engine.is_empty());
        assert_eq!(engine.columns_for("anything"), None);
    }
}
