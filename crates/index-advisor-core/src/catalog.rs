//! Catalog Probe (C2): enumerates user tables, columns, and existing
//! B-tree indexes.

use std::collections::BTreeSet;

use sqlx_core::row::Row;

use crate::error::Result;
use crate::gateway::{Gateway, Param};
use crate::model::{ColumnDescriptor, ExistingIndex};

/// Base tables under the current database, excluding system schemas.
pub async fn list_tables(gateway: &mut Gateway) -> Result<BTreeSet<String>> {
    let rows = gateway
        .query_rows(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_type = 'BASE TABLE' \
               AND table_schema NOT IN ('pg_catalog', 'information_schema')",
            &[],
        )
        .await?;
    Ok(rows
        .into_iter()
        .map(|row| row.get::<String, _>("table_name"))
        .collect())
}

/// Column descriptors for `tables`, filtered to schema `public`.
pub async fn columns(
    gateway: &mut Gateway,
    tables: &BTreeSet<String>,
) -> Result<Vec<ColumnDescriptor>> {
    if tables.is_empty() {
        return Ok(Vec::new());
    }
    let table_list = join_for_any(tables);
    let rows = gateway
        .query_rows(
            "SELECT table_name, column_name, data_type \
             FROM information_schema.columns \
             WHERE table_schema = 'public' \
               AND table_name = ANY(string_to_array($1, ','))",
            &[Param::Text(table_list)],
        )
        .await?;
    Ok(rows
        .into_iter()
        .map(|row| ColumnDescriptor {
            table: row.get("table_name"),
            column: row.get("column_name"),
            data_type: row.get("data_type"),
        })
        .collect())
}

/// Existing valid B-tree indexes on `tables`, excluding expression and
/// partial indexes. Column lists are reconstructed by stripping the
/// parenthesized column list from `pg_get_indexdef` and splitting on `, `,
/// unquoting identifiers wrapped in `"`.
pub async fn indexes(
    gateway: &mut Gateway,
    tables: &BTreeSet<String>,
) -> Result<Vec<ExistingIndex>> {
    if tables.is_empty() {
        return Ok(Vec::new());
    }
    let table_list = join_for_any(tables);
    let rows = gateway
        .query_rows(
            "SELECT n.nspname AS schema_name, \
                    t.relname AS table_name, \
                    ic.relname AS index_name, \
                    am.amname AS access_method, \
                    pg_get_indexdef(i.indexrelid) AS index_def \
             FROM pg_index i \
             JOIN pg_class ic ON ic.oid = i.indexrelid \
             JOIN pg_class t ON t.oid = i.indrelid \
             JOIN pg_namespace n ON n.oid = t.relnamespace \
             JOIN pg_am am ON am.oid = ic.relam \
             WHERE i.indisvalid \
               AND i.indexprs IS NULL \
               AND i.indpred IS NULL \
               AND am.amname = 'btree' \
               AND t.relname = ANY(string_to_array($1, ','))",
            &[Param::Text(table_list)],
        )
        .await?;

    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let index_def: String = row.get("index_def");
            let columns = parse_index_columns(&index_def)?;
            Some(ExistingIndex {
                schema: row.get("schema_name"),
                table: row.get("table_name"),
                name: row.get("index_name"),
                columns,
                access_method: row.get("access_method"),
            })
        })
        .collect())
}

/// Tables whose last analyze timestamp (autovacuum or manual) is older than
/// one hour, or missing entirely.
pub async fn tables_needing_analyze(
    gateway: &mut Gateway,
    tables: &BTreeSet<String>,
) -> Result<Vec<String>> {
    if tables.is_empty() {
        return Ok(Vec::new());
    }
    let table_list = join_for_any(tables);
    let rows = gateway
        .query_rows(
            "SELECT relname AS table_name \
             FROM pg_stat_user_tables \
             WHERE relname = ANY(string_to_array($1, ',')) \
               AND COALESCE(GREATEST(last_analyze, last_autoanalyze), 'epoch') \
                   < now() - interval '1 hour'",
            &[Param::Text(table_list)],
        )
        .await?;
    let mut stale: BTreeSet<String> = rows
        .into_iter()
        .map(|row| row.get::<String, _>("table_name"))
        .collect();

    // Tables absent from pg_stat_user_tables (never analyzed) are missing
    // entirely and must be analyzed too.
    let known = gateway
        .query_rows(
            "SELECT relname AS table_name FROM pg_stat_user_tables \
             WHERE relname = ANY(string_to_array($1, ','))",
            &[Param::Text(table_list)],
        )
        .await?
        .into_iter()
        .map(|row| row.get::<String, _>("table_name"))
        .collect::<BTreeSet<_>>();
    for table in tables {
        if !known.contains(table) {
            stale.insert(table.clone());
        }
    }
    Ok(stale.into_iter().collect())
}

fn join_for_any(tables: &BTreeSet<String>) -> String {
    tables.iter().cloned().collect::<Vec<_>>().join(",")
}

/// Strips the parenthesized column list from an index definition
/// (`CREATE INDEX ... ON table USING btree (a, b)`), splits on `, `, and
/// unquotes each identifier.
fn parse_index_columns(index_def: &str) -> Option<Vec<String>> {
    let open = index_def.find('(')?;
    let close = index_def.rfind(')')?;
    if close <= open {
        return None;
    }
    let inner = &index_def[open + 1..close];
    Some(
        inner
            .split(", ")
            .map(|raw| Gateway::unquote_identifier(raw.trim()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_column_list() {
        let def = "CREATE INDEX ratings_user_id_idx ON public.ratings USING btree (user_id)";
        assert_eq!(
            parse_index_columns(def),
            Some(vec!["user_id".to_string()])
        );
    }

    #[test]
    fn parses_multi_column_quoted_list() {
        let def = r#"CREATE INDEX idx ON public.ratings USING btree ("User Id", movie_id)"#;
        assert_eq!(
            parse_index_columns(def),
            Some(vec!["User Id".to_string(), "movie_id".to_string()])
        );
    }

    #[test]
    fn missing_parens_returns_none() {
        assert_eq!(parse_index_columns("not an index def"), None);
    }
}
