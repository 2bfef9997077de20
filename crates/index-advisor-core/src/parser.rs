//! Thin wrapper around the external SQL parser/fingerprinter.
//!
//! The specification treats parsing and fingerprinting as an external
//! collaborator: "assumed to be a library providing a canonical parse tree
//! and a stable fingerprint per query shape" (spec §1). `pg_query` (the
//! Rust bindings to libpg_query used by pganalyze and others) is that
//! library here.
//!
//! `pg_query::ParseResult::protobuf` is the prost-generated AST; serializing
//! it (the `serde` cargo feature) yields JSON that wraps every `Node`
//! message in its `oneof` field and spells the `String` node's payload
//! `sval`. [`crate::model::column_ref_candidates`] is written against that
//! shape, not libpg_query's older bare-JSON output.

use crate::model::{Node, UNKNOWN_FINGERPRINT};

/// The result of parsing and fingerprinting one raw SQL statement.
#[derive(Debug, Clone)]
pub struct ParsedStatement {
    /// Stable identifier for the query's shape, or [`UNKNOWN_FINGERPRINT`]
    /// if the statement failed to parse.
    pub fingerprint: String,
    /// The parse tree as a generic [`Node`], absent if parsing failed.
    pub tree: Option<Node>,
    /// Tables referenced by the statement, as reported by the parser.
    pub tables: Vec<String>,
}

/// Parses and fingerprints a single raw SQL statement. Never fails: an
/// unparseable statement yields the `unknown` sentinel fingerprint, no
/// tree, and no referenced tables, per spec §7 class (e).
#[must_use]
pub fn parse_statement(sql: &str) -> ParsedStatement {
    match pg_query::parse(sql) {
        Ok(result) => {
            let tables = result.tables();
            let tree = serde_json::to_value(&result.protobuf)
                .ok()
                .map(Node::from);
            let fingerprint = pg_query::fingerprint(sql)
                .map(|f| f.hex)
                .unwrap_or_else(|_| UNKNOWN_FINGERPRINT.to_string());
            ParsedStatement {
                fingerprint,
                tree,
                tables,
            }
        }
        Err(_) => ParsedStatement {
            fingerprint: UNKNOWN_FINGERPRINT.to_string(),
            tree: None,
            tables: Vec::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unparseable_statement_gets_unknown_fingerprint() {
        let parsed = parse_statement("SELEKT this is not sql (((");
        assert_eq!(parsed.fingerprint, UNKNOWN_FINGERPRINT);
        assert!(parsed.tree.is_none());
        assert!(parsed.tables.is_empty());
    }

    #[test]
    fn parses_simple_statement_and_reports_its_table() {
        let parsed = parse_statement("SELECT * FROM ratings WHERE user_id = 1");
        assert_ne!(parsed.fingerprint, UNKNOWN_FINGERPRINT);
        assert_eq!(parsed.tables, vec!["ratings".to_string()]);
    }

    #[test]
    fn column_ref_candidates_mines_real_parse_tree() {
        // The one seam no hand-built fixture can stand in for: run an
        // actual statement through `pg_query` and confirm the column-mining
        // walker finds `user_id` in the real, oneof-wrapped AST shape.
        let parsed = parse_statement("SELECT * FROM ratings WHERE user_id = 1");
        let tree = parsed.tree.expect("a well-formed statement parses");
        let candidates = crate::model::column_ref_candidates(&tree);
        assert!(
            candidates.contains(&"user_id".to_string()),
            "expected user_id among mined candidates, got {candidates:?}"
        );
    }
}
