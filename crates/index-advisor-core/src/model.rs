//! Query model, column/index descriptors, and generic tree walking.
//!
//! The parse tree `pg_query` returns and the `EXPLAIN (FORMAT JSON)` plan the
//! server returns are both heterogeneous, deeply nested structures with
//! variant node shapes. Rather than modeling every node type, both are
//! normalized into the same tagged-variant [`Node`] and walked with a single
//! [`find_by_key`] visitor.

use std::collections::BTreeMap;

/// A generic tagged-variant view over a JSON-shaped tree (parse tree or
/// EXPLAIN plan), addressable by the visitor in [`find_by_key`].
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Map(BTreeMap<String, Node>),
    Seq(Vec<Node>),
    Leaf(serde_json::Value),
}

impl From<serde_json::Value> for Node {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Object(map) => {
                Node::Map(map.into_iter().map(|(k, v)| (k, Node::from(v))).collect())
            }
            serde_json::Value::Array(items) => {
                Node::Seq(items.into_iter().map(Node::from).collect())
            }
            leaf => Node::Leaf(leaf),
        }
    }
}

impl Node {
    /// The string this leaf holds, if it is a string leaf.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::Leaf(serde_json::Value::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// The number this leaf holds as `f64`, if it is a numeric leaf.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Node::Leaf(serde_json::Value::Number(n)) => n.as_f64(),
            _ => None,
        }
    }
}

/// Walks `tree` recursively through maps and sequences, collecting every
/// value whose enclosing map key equals `key`.
pub fn find_by_key<'a>(tree: &'a Node, key: &str) -> Vec<&'a Node> {
    let mut out = Vec::new();
    find_by_key_into(tree, key, &mut out);
    out
}

fn find_by_key_into<'a>(tree: &'a Node, key: &str, out: &mut Vec<&'a Node>) {
    match tree {
        Node::Map(map) => {
            for (k, v) in map {
                if k == key {
                    out.push(v);
                }
                find_by_key_into(v, key, out);
            }
        }
        Node::Seq(items) => {
            for item in items {
                find_by_key_into(item, key, out);
            }
        }
        Node::Leaf(_) => {}
    }
}

/// Mines candidate column names from a parsed query's `ColumnRef` nodes:
/// for each `ColumnRef`, the last element of its `fields` sequence is taken,
/// and if that element carries a `String.sval` value, it is a candidate
/// column name.
#[must_use]
pub fn column_ref_candidates(tree: &Node) -> Vec<String> {
    let mut candidates = Vec::new();
    for col_ref in find_by_key(tree, "ColumnRef") {
        let Node::Map(fields_map) = col_ref else {
            continue;
        };
        let Some(Node::Seq(fields)) = fields_map.get("fields") else {
            continue;
        };
        let Some(last) = fields.last() else {
            continue;
        };
        if let Some(name) = string_field(last) {
            candidates.push(name);
        }
    }
    candidates
}

/// Reads a `String` node's scalar payload out of `node`.
///
/// `pg_query`'s protobuf-derived JSON wraps every `Node` message in its
/// `oneof` field (`{"node": {"ColumnRef": {...}}}` rather than the bare
/// `{"ColumnRef": {...}}` libpg_query's old JSON output used), and the
/// `String` message names its payload `sval`, not `str` (renamed upstream
/// to dodge the reserved-word clash `str` has in several target languages).
/// `unwrap_node_field` descends through that wrapper once; a node that
/// isn't wrapped (e.g. a value already unwrapped by a caller) is used as-is.
fn string_field(node: &Node) -> Option<String> {
    let map = unwrap_node_field(node)?;
    let string_node = map.get("String")?;
    let inner = unwrap_node_field(string_node)?;
    inner.get("sval")?.as_str().map(str::to_string)
}

fn unwrap_node_field(node: &Node) -> Option<&BTreeMap<String, Node>> {
    let Node::Map(map) = node else { return None };
    match map.get("node") {
        Some(Node::Map(inner)) => Some(inner),
        _ => Some(map),
    }
}

/// Reads the `Index Name` nodes a planner chose out of an EXPLAIN plan,
/// i.e. the hypothetical (or real) indexes actually used to satisfy a query.
#[must_use]
pub fn plan_index_names(plan: &Node) -> Vec<String> {
    find_by_key(plan, "Index Name")
        .into_iter()
        .filter_map(Node::as_str)
        .map(str::to_string)
        .collect()
}

/// `{table, column, data_type}` — a column in the `public` schema catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub table: String,
    pub column: String,
    pub data_type: String,
}

impl ColumnDescriptor {
    /// JSON-typed columns are ineligible as B-tree key positions.
    #[must_use]
    pub fn is_json(&self) -> bool {
        matches!(self.data_type.as_str(), "json" | "jsonb")
    }
}

/// `{schema, table, name, columns, access_method}` — an existing, valid,
/// non-expression, non-partial index reconstructed from the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingIndex {
    pub schema: String,
    pub table: String,
    pub name: String,
    pub columns: Vec<String>,
    pub access_method: String,
}

impl ExistingIndex {
    /// True if `columns` is covered by this index's first one or two
    /// leading columns — i.e. `columns` is a prefix-duplicate of an
    /// existing index and therefore not worth suggesting.
    #[must_use]
    pub fn covers_prefix(&self, columns: &[String]) -> bool {
        if columns.is_empty() {
            return false;
        }
        let leading_one = self.columns.first().map(std::slice::from_ref);
        let leading_two = if self.columns.len() >= 2 {
            Some(&self.columns[..2])
        } else {
            None
        };
        leading_one == Some(columns) || leading_two == Some(columns)
    }
}

/// `{table, columns}` — a candidate index. Identity is the pair with column
/// order significant, matching `CREATE INDEX`'s own column-order semantics.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CandidateIndex {
    pub table: String,
    pub columns: Vec<String>,
}

impl CandidateIndex {
    #[must_use]
    pub fn new(table: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            table: table.into(),
            columns,
        }
    }

    /// The candidate's single leading column, as the `(table, [col1])` form
    /// used by the subsumption and dedup rules.
    #[must_use]
    pub fn leading_single(&self) -> Option<CandidateIndex> {
        self.columns
            .first()
            .map(|c| CandidateIndex::new(self.table.clone(), vec![c.clone()]))
    }
}

/// A raw, not-yet-deduplicated workload statement as delivered by a source
/// adapter, before fingerprinting and parsing.
#[derive(Debug, Clone)]
pub struct RawQuery {
    pub statement_text: String,
    pub total_time_ms: Option<f64>,
    pub calls: Option<i64>,
}

impl RawQuery {
    #[must_use]
    pub fn new(statement_text: impl Into<String>) -> Self {
        Self {
            statement_text: statement_text.into(),
            total_time_ms: None,
            calls: None,
        }
    }
}

/// Sentinel fingerprint used when a statement could not be parsed.
pub const UNKNOWN_FINGERPRINT: &str = "unknown";

/// Up to three pass-indexed cost/plan samples captured during evaluation.
#[derive(Debug, Clone, Default)]
pub struct PassSamples<T> {
    slots: [Option<T>; 3],
}

impl<T> PassSamples<T> {
    #[must_use]
    pub fn get(&self, pass: usize) -> Option<&T> {
        self.slots.get(pass).and_then(|s| s.as_ref())
    }

    pub fn set(&mut self, pass: usize, value: T) {
        if let Some(slot) = self.slots.get_mut(pass) {
            *slot = Some(value);
        }
    }
}

/// Normalized per-query record: text, parse tree, fingerprint, referenced
/// tables, cost samples, and the final chosen indexes.
#[derive(Debug, Clone)]
pub struct Query {
    pub text: String,
    pub fingerprint: String,
    pub tree: Option<Node>,
    pub tables: Vec<String>,
    pub missing_tables: bool,
    pub total_time_ms: Option<f64>,
    pub calls: Option<i64>,
    pub costs: PassSamples<f64>,
    pub plans: PassSamples<Node>,
    pub chosen_indexes: Vec<CandidateIndex>,
    pub suggest_index: bool,
    pub pass1_indexes: Option<Vec<CandidateIndex>>,
    pub pass2_indexes: Option<Vec<CandidateIndex>>,
}

impl Query {
    #[must_use]
    pub fn new(raw: RawQuery, fingerprint: String, tree: Option<Node>, tables: Vec<String>) -> Self {
        Self {
            text: raw.statement_text,
            fingerprint,
            tree,
            tables,
            missing_tables: false,
            total_time_ms: raw.total_time_ms,
            calls: raw.calls,
            costs: PassSamples::default(),
            plans: PassSamples::default(),
            chosen_indexes: Vec::new(),
            suggest_index: false,
            pass1_indexes: None,
            pass2_indexes: None,
        }
    }

    /// True iff the database accepted this query's `EXPLAIN` at pass 0 (no
    /// exception raised during the current batch).
    #[must_use]
    pub fn explainable(&self) -> bool {
        self.costs.get(0).is_some()
    }

    /// True iff the query was explainable at the given pass.
    #[must_use]
    pub fn explainable_at(&self, pass: usize) -> bool {
        self.costs.get(pass).is_some()
    }

    /// A query's baseline planner cost meets the fixed threshold (≥ 100).
    #[must_use]
    pub fn is_high_cost(&self) -> bool {
        self.costs.get(0).is_some_and(|c| *c >= 100.0)
    }

    #[must_use]
    pub fn is_unparseable(&self) -> bool {
        self.fingerprint == UNKNOWN_FINGERPRINT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn find_by_key_collects_nested_matches() {
        let tree = Node::from(json!({
            "a": {"Index Name": "idx_1", "nested": {"Index Name": "idx_2"}},
            "b": [{"Index Name": "idx_3"}, {"other": 1}]
        }));
        let found = find_by_key(&tree, "Index Name");
        let names: Vec<&str> = found.iter().filter_map(|n| n.as_str()).collect();
        assert_eq!(names.len(), 3);
        assert!(names.contains(&"idx_1"));
        assert!(names.contains(&"idx_2"));
        assert!(names.contains(&"idx_3"));
    }

    #[test]
    fn column_ref_candidates_takes_last_field() {
        // Each `fields` entry is a full `Node` message, wrapped in pg_query's
        // `node` oneof, per the real protobuf-derived JSON shape.
        let tree = Node::from(json!({
            "ColumnRef": {
                "fields": [
                    {"node": {"String": {"sval": "ratings"}}},
                    {"node": {"String": {"sval": "user_id"}}}
                ]
            }
        }));
        let candidates = column_ref_candidates(&tree);
        assert_eq!(candidates, vec!["user_id".to_string()]);
    }

    #[test]
    fn column_ref_candidates_ignores_star_fields() {
        // A `*` ColumnRef (SELECT *) has an AStar field with no String.sval.
        let tree = Node::from(json!({
            "ColumnRef": {"fields": [{"node": {"AStar": {}}}]}
        }));
        assert!(column_ref_candidates(&tree).is_empty());
    }

    #[test]
    fn plan_index_names_collects_all_nodes() {
        let plan = Node::from(json!({
            "Node Type": "BitmapOr",
            "Plans": [
                {"Node Type": "Bitmap Index Scan", "Index Name": "idx_a"},
                {"Node Type": "Bitmap Index Scan", "Index Name": "idx_b"}
            ]
        }));
        let names = plan_index_names(&plan);
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn json_columns_are_ineligible() {
        let col = ColumnDescriptor {
            table: "t".into(),
            column: "meta".into(),
            data_type: "jsonb".into(),
        };
        assert!(col.is_json());
    }

    #[test]
    fn existing_index_covers_first_column_prefix() {
        let idx = ExistingIndex {
            schema: "public".into(),
            table: "ratings".into(),
            name: "ratings_user_id_movie_id_idx".into(),
            columns: vec!["user_id".into(), "movie_id".into()],
            access_method: "btree".into(),
        };
        assert!(idx.covers_prefix(&["user_id".to_string()]));
        assert!(idx.covers_prefix(&["user_id".to_string(), "movie_id".to_string()]));
        assert!(!idx.covers_prefix(&["movie_id".to_string()]));
    }

    #[test]
    fn candidate_index_leading_single() {
        let candidate = CandidateIndex::new("ratings", vec!["user_id".into(), "movie_id".into()]);
        assert_eq!(
            candidate.leading_single(),
            Some(CandidateIndex::new("ratings", vec!["user_id".into()]))
        );
    }

    #[test]
    fn query_is_high_cost_at_threshold() {
        let mut query = Query::new(RawQuery::new("select 1"), "fp".into(), None, vec![]);
        query.costs.set(0, 100.0);
        assert!(query.is_high_cost());
        query.costs.set(0, 99.99);
        assert!(!query.is_high_cost());
    }

    #[test]
    fn unparseable_query_carries_unknown_fingerprint() {
        let query = Query::new(
            RawQuery::new("not sql"),
            UNKNOWN_FINGERPRINT.to_string(),
            None,
            vec![],
        );
        assert!(query.is_unparseable());
    }
}
