//! Candidate Evaluator (C6) — the core algorithm.
//!
//! Given a fingerprint-unique batch of queries, mines candidate columns,
//! materializes hypothetical indexes through HypoPG, re-plans under each
//! candidate population, and applies the cost-savings decision policy.
//!
//! The orchestration in [`evaluate_batch`] drives the database (resets
//! hypothetical state, runs `ANALYZE`, issues `EXPLAIN`); the decision
//! policy itself — [`decide_for_query`] and [`dedup_suggestions`] — is pure
//! and unit-tested directly against fixture costs, plans, and catalogs,
//! without a database.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::catalog;
use crate::error::Result;
use crate::gateway::Gateway;
use crate::hypopg::HypoEngine;
use crate::model::{CandidateIndex, ExistingIndex, Node, Query, column_ref_candidates, plan_index_names};
use crate::reporter::Reporter;

/// Tables to never index (`--exclude`) and, if non-empty, the only tables
/// eligible for indexing (`--include`).
#[derive(Debug, Clone, Default)]
pub struct TableFilter {
    pub include: BTreeSet<String>,
    pub exclude: BTreeSet<String>,
}

/// An accepted index suggestion, with the queries that earned it.
#[derive(Debug, Clone)]
pub struct Suggestion {
    pub index: CandidateIndex,
    pub queries: Vec<usize>,
}

/// Outcome of evaluating one batch: the queries (mutated with their cost
/// traces and decisions) and the final, deduplicated suggestion set.
pub struct EvaluationOutcome {
    pub queries: Vec<Query>,
    pub suggestions: Vec<Suggestion>,
}

/// Runs the full 12-step evaluation algorithm over `queries`.
pub async fn evaluate_batch(
    gateway: &mut Gateway,
    hypo: &mut HypoEngine,
    mut queries: Vec<Query>,
    filter: &TableFilter,
    reporter: &Reporter,
) -> Result<EvaluationOutcome> {
    // 1. Reset hypothetical indexes.
    hypo.reset(gateway).await?;

    // 2. Table universe.
    let known_tables = catalog::list_tables(gateway).await?;
    let mut universe: BTreeSet<String> = BTreeSet::new();
    for query in &mut queries {
        let query_tables: BTreeSet<String> = query.tables.iter().cloned().collect();
        query.missing_tables = !query_tables.is_subset(&known_tables);
        universe.extend(query_tables);
    }
    universe = universe.intersection(&known_tables).cloned().collect();
    if !filter.include.is_empty() {
        universe = universe.intersection(&filter.include).cloned().collect();
    }
    for excluded in &filter.exclude {
        universe.remove(excluded);
    }

    // 3. Freshness.
    let stale = catalog::tables_needing_analyze(gateway, &universe).await?;
    for table in &stale {
        debug!(table, "analyzing stale table before evaluation");
        gateway
            .execute(&format!("ANALYZE {}", Gateway::quote_identifier(table)))
            .await?;
    }

    // 4. Pass 0 — baseline plans.
    for query in &mut queries {
        if query.missing_tables {
            continue;
        }
        run_pass(gateway, query, 0, "EXPLAIN (FORMAT JSON)").await;
    }

    // 5. Narrow to explainable, high-cost queries.
    let narrowed: Vec<usize> = queries
        .iter()
        .enumerate()
        .filter(|(_, q)| q.explainable() && q.is_high_cost())
        .map(|(i, _)| i)
        .collect();

    if narrowed.is_empty() {
        return Ok(EvaluationOutcome {
            queries,
            suggestions: Vec::new(),
        });
    }

    let mut narrow_tables: BTreeSet<String> = BTreeSet::new();
    for &i in &narrowed {
        narrow_tables.extend(queries[i].tables.iter().cloned());
    }
    narrow_tables = narrow_tables.intersection(&universe).cloned().collect();

    // 6. Candidate columns: union of ColumnRef last-segments over E,
    // intersected with the columns catalog, JSON types dropped, grouped by
    // table.
    let mut referenced: BTreeSet<String> = BTreeSet::new();
    for &i in &narrowed {
        if let Some(tree) = &queries[i].tree {
            referenced.extend(column_ref_candidates(tree));
        }
    }
    let catalog_columns = catalog::columns(gateway, &narrow_tables).await?;
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for column in &catalog_columns {
        if referenced.contains(&column.column) && !column.is_json() {
            let cols = grouped.entry(column.table.clone()).or_default();
            if !cols.contains(&column.column) {
                cols.push(column.column.clone());
            }
        }
    }
    for (table, columns) in &grouped {
        reporter.report_column_mining(table, columns);
    }

    // 7. Single-column hypothetical indexes.
    for (table, columns) in &grouped {
        for column in columns {
            let candidate = CandidateIndex::new(table.clone(), vec![column.clone()]);
            hypo.create(gateway, candidate).await?;
        }
    }

    // 8. Pass 1 — re-plan E under single-column hypos.
    for &i in &narrowed {
        run_pass(gateway, &mut queries[i], 1, "EXPLAIN (FORMAT JSON)").await;
    }

    // 9. Multi-column hypothetical indexes: every ordered pair (permutation
    // of size 2) of eligible columns per table.
    for (table, columns) in &grouped {
        for a in columns {
            for b in columns {
                if a == b {
                    continue;
                }
                let candidate = CandidateIndex::new(table.clone(), vec![a.clone(), b.clone()]);
                hypo.create(gateway, candidate).await?;
            }
        }
    }

    // 10. Pass 2 — re-plan E under single + multi-column hypos.
    for &i in &narrowed {
        run_pass(gateway, &mut queries[i], 2, "EXPLAIN (FORMAT JSON)").await;
    }

    // 11. Decision per explainable high-cost query.
    let existing = catalog::indexes(gateway, &narrow_tables).await?;
    let mut new_indexes: BTreeMap<CandidateIndex, Vec<usize>> = BTreeMap::new();
    for &i in &narrowed {
        decide_for_query(&mut queries[i], hypo, &existing, i, &mut new_indexes);
    }

    // 12. Global dedup.
    let suggestions = dedup_suggestions(new_indexes);

    Ok(EvaluationOutcome { queries, suggestions })
}

/// Runs one EXPLAIN pass for `query`, recording plan/cost on success.
/// A pass is only attempted if the previous pass succeeded — any failure
/// disqualifies the query from further evaluation for the batch (the
/// resolution of spec's Open Question in §9).
async fn run_pass(gateway: &mut Gateway, query: &mut Query, pass: usize, explain_prefix: &str) {
    if pass > 0 && !query.explainable_at(pass - 1) {
        return;
    }
    match gateway.explain_json(explain_prefix, &query.text).await {
        Ok(plan) => {
            if let Some(cost) = root_cost(&plan) {
                query.plans.set(pass, plan);
                query.costs.set(pass, cost);
            }
        }
        Err(_) => {
            // EXPLAIN failure is per-query recoverable (spec §7 class c):
            // the query is simply left non-explainable from this pass on.
        }
    }
}

/// Total cost of an EXPLAIN plan's root node.
fn root_cost(plan: &Node) -> Option<f64> {
    match plan {
        Node::Map(map) => map.get("Total Cost").and_then(Node::as_f64),
        _ => None,
    }
}

/// Maps a plan's `Index Name` nodes back to the candidate column sets that
/// produced them, deduplicated.
fn recovered_indexes(plan: &Node, hypo: &HypoEngine) -> Vec<CandidateIndex> {
    let mut recovered: Vec<CandidateIndex> = plan_index_names(plan)
        .into_iter()
        .filter_map(|name| hypo.columns_for(&name).cloned())
        .collect();
    recovered.sort();
    recovered.dedup();
    recovered
}

/// Drops candidates whose `(table, columns)` prefix-matches an existing
/// valid B-tree index's first one or two columns on the same table.
fn drop_covered(candidates: Vec<CandidateIndex>, existing: &[ExistingIndex]) -> Vec<CandidateIndex> {
    candidates
        .into_iter()
        .filter(|candidate| {
            !existing
                .iter()
                .any(|idx| idx.table == candidate.table && idx.covers_prefix(&candidate.columns))
        })
        .collect()
}

/// Applies the per-query decision policy (spec §4.4 step 11): computes
/// `savings1`/`savings2`, the bad-pair guard, and the existing-index
/// subsumption filter, recording the outcome on `query` and — when a
/// single index is accepted — registering it in `new_indexes`.
pub fn decide_for_query(
    query: &mut Query,
    hypo: &HypoEngine,
    existing: &[ExistingIndex],
    query_index: usize,
    new_indexes: &mut BTreeMap<CandidateIndex, Vec<usize>>,
) {
    let Some(cost0) = query.costs.get(0).copied() else {
        return;
    };
    let cost1 = query.costs.get(1).copied();
    let cost2 = query.costs.get(2).copied();

    if let Some(plan1) = query.plans.get(1) {
        query.pass1_indexes = Some(recovered_indexes(plan1, hypo));
    }
    if let Some(plan2) = query.plans.get(2) {
        query.pass2_indexes = Some(recovered_indexes(plan2, hypo));
    }

    let savings1 = cost1.is_some_and(|c1| c1 < 0.5 * cost0);
    let mut savings2 = match (cost1, cost2) {
        (Some(c1), Some(c2)) => c1 > 100.0 && c2 < 0.5 * c1,
        _ => false,
    };

    if !(savings1 || savings2) {
        query.suggest_index = false;
        return;
    }

    let chosen_pass_recovered = if savings2 {
        query.pass2_indexes.clone().unwrap_or_default()
    } else {
        query.pass1_indexes.clone().unwrap_or_default()
    };
    let mut recovered = drop_covered(chosen_pass_recovered, existing);

    // Bad-pair guard: the multi-column pass's plan touched more than one
    // hypothetical index — fall back to the single-column recovered set.
    if savings2 && recovered.len() > 1 {
        savings2 = false;
        recovered = drop_covered(query.pass1_indexes.clone().unwrap_or_default(), existing);
    }

    let suggest = (savings1 || savings2) && recovered.len() == 1;
    query.suggest_index = suggest;
    if suggest {
        let chosen = recovered[0].clone();
        query.chosen_indexes = vec![chosen.clone()];
        new_indexes.entry(chosen).or_default().push(query_index);
    }
}

/// Global dedup (spec §4.4 step 12): a multi-column suggestion is dropped
/// when its own single-column leading form is also present in the
/// suggestion set (the single-column form subsumes it).
pub fn dedup_suggestions(new_indexes: BTreeMap<CandidateIndex, Vec<usize>>) -> Vec<Suggestion> {
    let singles: BTreeSet<CandidateIndex> = new_indexes
        .keys()
        .filter(|c| c.columns.len() == 1)
        .cloned()
        .collect();

    let mut suggestions: Vec<Suggestion> = new_indexes
        .into_iter()
        .filter(|(candidate, _)| match candidate.leading_single() {
            Some(single) if candidate.columns.len() > 1 => !singles.contains(&single),
            _ => true,
        })
        .map(|(index, queries)| Suggestion { index, queries })
        .collect();
    suggestions.sort_by(|a, b| a.index.cmp(&b.index));
    suggestions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PassSamples, RawQuery};
    use serde_json::json;

    fn query_fixture(table: &str, cost0: f64) -> Query {
        let mut q = Query::new(RawQuery::new("select 1"), "fp".into(), None, vec![table.to_string()]);
        q.costs = PassSamples::default();
        q.costs.set(0, cost0);
        q
    }

    fn plan_with_index_names(names: &[&str]) -> Node {
        let nodes: Vec<serde_json::Value> = names
            .iter()
            .map(|n| json!({"Node Type": "Index Scan", "Index Name": n}))
            .collect();
        Node::from(json!({"Node Type": "Nested Loop", "Plans": nodes}))
    }

    fn hypo_with(entries: &[(&str, &str, Vec<&str>)]) -> HypoEngine {
        let mut hypo = HypoEngine::new();
        for (name, table, cols) in entries {
            hypo.record(
                *name,
                CandidateIndex::new(*table, cols.iter().map(|c| c.to_string()).collect()),
            );
        }
        hypo
    }

    #[test]
    fn scenario_single_column_win() {
        // §8 scenario 1: baseline cost 10000, single-column hypo cuts it
        // below half.
        let mut q = query_fixture("ratings", 10_000.0);
        q.costs.set(1, 10.0);
        q.plans.set(1, plan_with_index_names(&["hypo_1"]));
        let hypo = hypo_with(&[("hypo_1", "ratings", vec!["user_id"])]);
        let mut new_indexes = BTreeMap::new();
        decide_for_query(&mut q, &hypo, &[], 0, &mut new_indexes);

        assert!(q.suggest_index);
        assert_eq!(
            q.chosen_indexes,
            vec![CandidateIndex::new("ratings", vec!["user_id".into()])]
        );
    }

    #[test]
    fn scenario_multi_column_win() {
        // §8 scenario 2: pass-1 cost 500, pass-2 cost 50 -> savings2.
        let mut q = query_fixture("ratings", 10_000.0);
        q.costs.set(1, 500.0);
        q.costs.set(2, 50.0);
        q.plans.set(1, plan_with_index_names(&["hypo_single"]));
        q.plans.set(2, plan_with_index_names(&["hypo_pair"]));
        let hypo = hypo_with(&[
            ("hypo_single", "ratings", vec!["user_id"]),
            ("hypo_pair", "ratings", vec!["user_id", "movie_id"]),
        ]);
        let mut new_indexes = BTreeMap::new();
        decide_for_query(&mut q, &hypo, &[], 0, &mut new_indexes);

        assert!(q.suggest_index);
        assert_eq!(
            q.chosen_indexes,
            vec![CandidateIndex::new("ratings", vec!["user_id".into(), "movie_id".into()])]
        );
    }

    #[test]
    fn scenario_existing_index_subsumption() {
        // §8 scenario 3: existing (user_id, movie_id), suggestion
        // (user_id) alone is dropped as a prefix match.
        let mut q = query_fixture("ratings", 10_000.0);
        q.costs.set(1, 10.0);
        q.plans.set(1, plan_with_index_names(&["hypo_1"]));
        let hypo = hypo_with(&[("hypo_1", "ratings", vec!["user_id"])]);
        let existing = vec![ExistingIndex {
            schema: "public".into(),
            table: "ratings".into(),
            name: "ratings_user_movie_idx".into(),
            columns: vec!["user_id".into(), "movie_id".into()],
            access_method: "btree".into(),
        }];
        let mut new_indexes = BTreeMap::new();
        decide_for_query(&mut q, &hypo, &existing, 0, &mut new_indexes);

        assert!(!q.suggest_index);
        assert!(new_indexes.is_empty());
    }

    #[test]
    fn scenario_low_cost_is_never_considered() {
        // §8 scenario 5: baseline cost 30 (< 100) never enters the narrowed
        // set at all, but decide_for_query should also be a no-op on costs
        // that don't clear the high-cost bar upstream; verify a query with
        // no costs[1]/[2] (as would happen if it were never narrowed)
        // produces no suggestion.
        let q = query_fixture("ratings", 30.0);
        assert!(!q.is_high_cost());
    }

    #[test]
    fn scenario_multi_suggestion_guard_falls_back() {
        // §8 scenario 6: pass-2 plan mentions two hypothetical indexes ->
        // fall back to pass-1 recovered set; if that set also has more
        // than one entry, suggest = false.
        let mut q = query_fixture("ratings", 10_000.0);
        q.costs.set(1, 500.0);
        q.costs.set(2, 50.0);
        q.plans.set(1, plan_with_index_names(&["hypo_a", "hypo_b"]));
        q.plans.set(2, plan_with_index_names(&["hypo_pair_1", "hypo_pair_2"]));
        let hypo = hypo_with(&[
            ("hypo_a", "ratings", vec!["user_id"]),
            ("hypo_b", "ratings", vec!["movie_id"]),
            ("hypo_pair_1", "ratings", vec!["user_id", "movie_id"]),
            ("hypo_pair_2", "ratings", vec!["movie_id", "rating"]),
        ]);
        let mut new_indexes = BTreeMap::new();
        decide_for_query(&mut q, &hypo, &[], 0, &mut new_indexes);

        // pass-1 recovered set also has 2 entries -> no suggestion.
        assert!(!q.suggest_index);
    }

    #[test]
    fn scenario_multi_suggestion_guard_falls_back_to_single_winner() {
        let mut q = query_fixture("ratings", 10_000.0);
        q.costs.set(1, 500.0);
        q.costs.set(2, 50.0);
        q.plans.set(1, plan_with_index_names(&["hypo_a"]));
        q.plans.set(2, plan_with_index_names(&["hypo_pair_1", "hypo_pair_2"]));
        let hypo = hypo_with(&[
            ("hypo_a", "ratings", vec!["user_id"]),
            ("hypo_pair_1", "ratings", vec!["user_id", "movie_id"]),
            ("hypo_pair_2", "ratings", vec!["movie_id", "rating"]),
        ]);
        let mut new_indexes = BTreeMap::new();
        decide_for_query(&mut q, &hypo, &[], 0, &mut new_indexes);

        assert!(q.suggest_index);
        assert_eq!(
            q.chosen_indexes,
            vec![CandidateIndex::new("ratings", vec!["user_id".into()])]
        );
    }

    #[test]
    fn dedup_drops_multi_column_when_single_also_suggested() {
        let mut new_indexes: BTreeMap<CandidateIndex, Vec<usize>> = BTreeMap::new();
        new_indexes.insert(CandidateIndex::new("ratings", vec!["user_id".into()]), vec![0]);
        new_indexes.insert(
            CandidateIndex::new("ratings", vec!["user_id".into(), "movie_id".into()]),
            vec![1],
        );

        let suggestions = dedup_suggestions(new_indexes);
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].index.columns, vec!["user_id".to_string()]);
    }

    #[test]
    fn dedup_keeps_multi_column_without_competing_single() {
        let mut new_indexes: BTreeMap<CandidateIndex, Vec<usize>> = BTreeMap::new();
        new_indexes.insert(
            CandidateIndex::new("ratings", vec!["user_id".into(), "movie_id".into()]),
            vec![0],
        );

        let suggestions = dedup_suggestions(new_indexes);
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].index.columns.len(), 2);
    }

    #[test]
    fn dedup_has_no_table_column_duplicates() {
        let mut new_indexes: BTreeMap<CandidateIndex, Vec<usize>> = BTreeMap::new();
        new_indexes.insert(CandidateIndex::new("a", vec!["x".into()]), vec![0]);
        new_indexes.insert(CandidateIndex::new("b", vec!["y".into()]), vec![1]);
        let suggestions = dedup_suggestions(new_indexes);
        let mut seen = BTreeSet::new();
        for s in &suggestions {
            assert!(seen.insert((s.index.table.clone(), s.index.columns.clone())));
        }
    }

    #[test]
    fn json_column_never_becomes_candidate() {
        // §8 scenario 4 — the grouping step in evaluate_batch filters
        // ColumnDescriptor::is_json() out before any hypo is created;
        // exercised directly against the predicate used there.
        let meta = crate::model::ColumnDescriptor {
            table: "events".into(),
            column: "meta".into(),
            data_type: "jsonb".into(),
        };
        let referenced: BTreeSet<String> = ["meta".to_string()].into_iter().collect();
        assert!(referenced.contains(&meta.column) && meta.is_json());
    }
}
