//! Source Adapters (C4): turn a raw input stream into batches of
//! fingerprint-unique [`Query`] records.
//!
//! All three adapters here share one shape — "produce the next batch" —
//! via [`SourceAdapter`]. The log-tail adapter is deliberately absent: the
//! specification treats it as an input contract only (`{statement_text,
//! duration_ms}` per line over stdin), and its line parsing lives in the CLI
//! binary, which owns process I/O.

use std::collections::HashSet;

use async_trait::async_trait;
use sqlx_core::row::Row;

use crate::error::Result;
use crate::gateway::{Gateway, Param};
use crate::model::{Query, RawQuery, UNKNOWN_FINGERPRINT};
use crate::parser::parse_statement;

/// Converts a raw batch into fingerprint-unique [`Query`] records, parsing
/// each statement and keeping only the first occurrence of each known
/// fingerprint. Unparseable statements (fingerprint `unknown`) are never
/// deduplicated against each other — each is a distinct failure worth
/// surfacing in debug output.
#[must_use]
pub fn into_queries(raw: Vec<RawQuery>) -> Vec<Query> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(raw.len());
    for item in raw {
        let parsed = parse_statement(&item.statement_text);
        if parsed.fingerprint != UNKNOWN_FINGERPRINT && !seen.insert(parsed.fingerprint.clone()) {
            continue;
        }
        out.push(Query::new(item, parsed.fingerprint, parsed.tree, parsed.tables));
    }
    out
}

/// Produces the next batch of raw queries for one evaluation cycle.
#[async_trait]
pub trait SourceAdapter {
    async fn next_batch(&mut self, gateway: &mut Gateway) -> Result<Option<Vec<RawQuery>>>;
}

/// Polls `pg_stat_statements`, filtering by accumulated execution time.
/// A streaming source: every call re-polls and never signals exhaustion —
/// the CLI's batch loop drives the `--interval` cadence.
pub struct StatsViewSource {
    min_time_minutes: f64,
}

impl StatsViewSource {
    #[must_use]
    pub fn new(min_time_minutes: f64) -> Self {
        Self { min_time_minutes }
    }
}

#[async_trait]
impl SourceAdapter for StatsViewSource {
    async fn next_batch(&mut self, gateway: &mut Gateway) -> Result<Option<Vec<RawQuery>>> {
        let min_time_ms = self.min_time_minutes * 60_000.0;
        let rows = gateway
            .query_rows(
                "SELECT query, total_exec_time, calls FROM pg_stat_statements \
                 WHERE total_exec_time >= $1",
                &[Param::Float(min_time_ms)],
            )
            .await?;
        let raw = rows
            .into_iter()
            .map(|row| RawQuery {
                statement_text: row.get("query"),
                total_time_ms: row.try_get::<f64, _>("total_exec_time").ok(),
                calls: row.try_get::<i64, _>("calls").ok(),
            })
            .collect();
        Ok(Some(raw))
    }
}

/// Splits the concatenated content of one or more files into statements,
/// evaluated once as a single batch.
pub struct FileSource {
    content: Option<String>,
}

impl FileSource {
    #[must_use]
    pub fn new(contents: Vec<String>) -> Self {
        Self {
            content: Some(contents.join("\n")),
        }
    }
}

#[async_trait]
impl SourceAdapter for FileSource {
    async fn next_batch(&mut self, _gateway: &mut Gateway) -> Result<Option<Vec<RawQuery>>> {
        let Some(content) = self.content.take() else {
            return Ok(None);
        };
        Ok(Some(split_statements(&content)))
    }
}

/// Evaluates a single literal statement, then exits (`-s`).
pub struct SingleStatementSource {
    statement: Option<String>,
}

impl SingleStatementSource {
    #[must_use]
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: Some(statement.into()),
        }
    }
}

#[async_trait]
impl SourceAdapter for SingleStatementSource {
    async fn next_batch(&mut self, _gateway: &mut Gateway) -> Result<Option<Vec<RawQuery>>> {
        let Some(statement) = self.statement.take() else {
            return Ok(None);
        };
        Ok(Some(vec![RawQuery::new(statement)]))
    }
}

/// Splits file content into individual statements on top-level `;`
/// terminators, dropping blank fragments.
fn split_statements(content: &str) -> Vec<RawQuery> {
    content
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(RawQuery::new)
        .collect()
}
