//! The SQL Gateway: a single serialized connection to the database.
//!
//! All SQL issued by the advisor flows through one [`Gateway`], held for the
//! process lifetime (§5 of the specification — there is no in-process
//! parallelism, so a connection pool would buy nothing). Every helper here
//! accepts at most one SQL command per call, matching the gateway's
//! contract.

use sqlx_core::connection::Connection;
use sqlx_postgres::{PgConnectOptions, PgConnection, PgRow};
use tracing::{debug, instrument, trace};

use crate::error::{AdvisorError, Result};

/// A bound parameter for [`Gateway::query_rows`].
#[derive(Debug, Clone)]
pub enum Param {
    Text(String),
    Int(i64),
    Float(f64),
}

impl From<&str> for Param {
    fn from(s: &str) -> Self {
        Param::Text(s.to_string())
    }
}

impl From<String> for Param {
    fn from(s: String) -> Self {
        Param::Text(s)
    }
}

impl From<i64> for Param {
    fn from(v: i64) -> Self {
        Param::Int(v)
    }
}

impl From<f64> for Param {
    fn from(v: f64) -> Self {
        Param::Float(v)
    }
}

/// The single serialized connection to the database (C1).
pub struct Gateway {
    conn: PgConnection,
    log_sql: bool,
}

impl Gateway {
    /// Connects and performs the one-time session setup: a 5s lock timeout
    /// (bounds DDL-style waits), `client_min_messages = warning` (suppress
    /// chatty NOTICE output), and ensures the HypoPG extension is loaded.
    #[instrument(skip(options))]
    pub async fn connect(options: &PgConnectOptions, log_sql: bool) -> Result<Self> {
        let conn = PgConnection::connect_with(options).await?;
        let mut gateway = Self { conn, log_sql };
        gateway.init_session().await?;
        Ok(gateway)
    }

    async fn init_session(&mut self) -> Result<()> {
        self.execute("SET lock_timeout = '5s'").await?;
        self.execute("SET client_min_messages = warning").await?;
        self.ensure_hypopg().await?;
        debug!("session initialized");
        Ok(())
    }

    async fn ensure_hypopg(&mut self) -> Result<()> {
        self.log("CREATE EXTENSION IF NOT EXISTS hypopg");
        sqlx_core::query::query("CREATE EXTENSION IF NOT EXISTS hypopg")
            .execute(&mut self.conn)
            .await
            .map_err(AdvisorError::from_extension_install)?;
        Ok(())
    }

    fn log(&self, sql: &str) {
        if self.log_sql {
            tracing::info!(sql, "executing SQL");
        } else {
            trace!(sql, "executing SQL");
        }
    }

    /// Executes a single SQL command with no expected result rows.
    pub async fn execute(&mut self, sql: &str) -> Result<()> {
        self.log(sql);
        sqlx_core::query::query(sql).execute(&mut self.conn).await?;
        Ok(())
    }

    /// Executes a single parameterized query, returning its result rows.
    pub async fn query_rows(&mut self, sql: &str, params: &[Param]) -> Result<Vec<PgRow>> {
        self.log(sql);
        let mut query = sqlx_core::query::query(sql);
        for param in params {
            query = match param {
                Param::Text(s) => query.bind(s.clone()),
                Param::Int(i) => query.bind(*i),
                Param::Float(f) => query.bind(*f),
            };
        }
        let rows = query.fetch_all(&mut self.conn).await?;
        Ok(rows)
    }

    /// Runs `EXPLAIN (FORMAT JSON) <stmt>` (or a caller-supplied `EXPLAIN`
    /// variant prefix, e.g. with `ANALYZE, BUFFERS`) and returns the single
    /// plan object the server replies with as a [`crate::model::Node`].
    pub async fn explain_json(&mut self, prefix: &str, stmt: &str) -> Result<crate::model::Node> {
        let sanitized = sanitize_for_explain(stmt);
        let sql = format!("{prefix} {sanitized}");
        self.log(&sql);
        let row: (serde_json::Value,) = sqlx_core::query_as::query_as(&sql)
            .fetch_one(&mut self.conn)
            .await
            .map_err(|e| AdvisorError::Explain(e.to_string()))?;
        let wrapper = row
            .0
            .as_array()
            .and_then(|arr| arr.first())
            .cloned()
            .ok_or_else(|| AdvisorError::Explain("empty EXPLAIN output".to_string()))?;
        let plan = wrapper
            .get("Plan")
            .cloned()
            .ok_or_else(|| AdvisorError::Explain("EXPLAIN output missing Plan node".to_string()))?;
        Ok(crate::model::Node::from(plan))
    }

    /// Quotes an identifier (table/column/index name) for safe interpolation
    /// into DDL, where it cannot be a bind parameter.
    #[must_use]
    pub fn quote_identifier(s: &str) -> String {
        format!("\"{}\"", s.replace('"', "\"\""))
    }

    /// Reverses [`Gateway::quote_identifier`], stripping the surrounding
    /// quotes and undoubling escaped `""`.
    #[must_use]
    pub fn unquote_identifier(s: &str) -> String {
        let inner = s.strip_prefix('"').and_then(|s| s.strip_suffix('"'));
        match inner {
            Some(inner) => inner.replace("\"\"", "\""),
            None => s.to_string(),
        }
    }

    /// Quotes a string literal, doubling `'` and escaping backslashes.
    #[must_use]
    pub fn quote_literal(s: &str) -> String {
        let escaped = s.replace('\\', "\\\\").replace('\'', "''");
        format!("'{escaped}'")
    }
}

/// Strips `;` from a statement before wrapping it in `EXPLAIN`, as a
/// secondary defense against statement stacking (the gateway already
/// enforces at most one command per call).
fn sanitize_for_explain(stmt: &str) -> String {
    stmt.replace(';', "")
}
