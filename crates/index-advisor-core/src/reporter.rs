//! Reporter (C8): human-readable and debug diagnostics.
//!
//! `Verbosity` mirrors the five `--log-level` values in spec §6. `debug2`/
//! `debug3` are domain verbosity tiers layered on top of `tracing`'s own
//! severity levels (not distinct `tracing` levels themselves), matching the
//! teacher's habit of turning a CLI level string into both an `EnvFilter`
//! and content-level gating inside the component that does the reporting.

use crate::applier::{ApplyOutcome, ApplyResult};
use crate::evaluator::Suggestion;
use crate::model::Query;

/// The five `--log-level` values from spec §6. Ordered from least to most
/// verbose; `Error` suppresses info-level output entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    Error,
    #[default]
    Info,
    Debug,
    Debug2,
    Debug3,
}

impl Verbosity {
    /// Parses a `--log-level` argument; unrecognized values fall back to
    /// `Info`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "error" => Verbosity::Error,
            "debug" => Verbosity::Debug,
            "debug2" => Verbosity::Debug2,
            "debug3" => Verbosity::Debug3,
            _ => Verbosity::Info,
        }
    }

    /// The `tracing_subscriber::EnvFilter` directive this verbosity maps to.
    /// `Debug2`/`Debug3` reuse `debug`-level tracing output — their extra
    /// detail is the reporter's own content gating, not a tracing severity.
    #[must_use]
    pub fn tracing_directive(self) -> &'static str {
        match self {
            Verbosity::Error => "error",
            Verbosity::Info => "info",
            Verbosity::Debug | Verbosity::Debug2 | Verbosity::Debug3 => "debug",
        }
    }
}

/// Emits the human-readable report for one batch's evaluation outcome at the
/// configured verbosity.
pub struct Reporter {
    verbosity: Verbosity,
}

impl Reporter {
    #[must_use]
    pub fn new(verbosity: Verbosity) -> Self {
        Self { verbosity }
    }

    /// `info`: one line per accepted suggestion, or a single "no new
    /// indexes" line. `error` suppresses this entirely.
    pub fn report_suggestions(&self, suggestions: &[Suggestion]) {
        if self.verbosity < Verbosity::Info {
            return;
        }
        if suggestions.is_empty() {
            println!("No new indexes found");
            return;
        }
        for suggestion in suggestions {
            println!(
                "Index found: {} ({})",
                suggestion.index.table,
                suggestion.index.columns.join(", ")
            );
        }
    }

    /// `debug`: per-query block with total-time/avg/calls (if available),
    /// the reason a query did not produce a suggestion, and the
    /// Start/Pass1/Pass2/Final cost trace with recovered indexes.
    /// `debug2` additionally includes queries that produced no suggestion
    /// at all (as opposed to ones that were merely considered and dropped).
    pub fn report_queries(&self, queries: &[Query]) {
        if self.verbosity < Verbosity::Debug {
            return;
        }
        for query in queries {
            if !query.suggest_index && self.verbosity < Verbosity::Debug2 {
                continue;
            }
            self.report_one_query(query);
        }
    }

    fn report_one_query(&self, query: &Query) {
        println!("--- {}", query.text);
        if let (Some(total), Some(calls)) = (query.total_time_ms, query.calls) {
            let avg = if calls > 0 { total / calls as f64 } else { 0.0 };
            println!("  total_time={total:.2}ms avg={avg:.2}ms calls={calls}");
        }
        if let Some(reason) = self.non_suggestion_reason(query) {
            println!("  reason: {reason}");
        }
        println!(
            "  Start={} Pass1={} Pass2={} Final={}",
            fmt_cost(query.costs.get(0)),
            fmt_cost(query.costs.get(1)),
            fmt_cost(query.costs.get(2)),
            fmt_indexes(&query.chosen_indexes),
        );
        if let Some(pass1) = &query.pass1_indexes {
            println!("  pass1 recovered: {}", fmt_indexes(pass1));
        }
        if let Some(pass2) = &query.pass2_indexes {
            println!("  pass2 recovered: {}", fmt_indexes(pass2));
        }
    }

    fn non_suggestion_reason(&self, query: &Query) -> Option<&'static str> {
        if query.suggest_index {
            return None;
        }
        if query.is_unparseable() {
            Some("unparseable query")
        } else if query.tables.is_empty() {
            Some("no tables referenced")
        } else if query.missing_tables {
            Some("missing tables")
        } else if !query.explainable() {
            Some("explain failed")
        } else if !query.is_high_cost() {
            Some("low cost")
        } else {
            None
        }
    }

    /// `debug3`: logs every column-mining step (the candidate columns and
    /// the table they were grouped under).
    pub fn report_column_mining(&self, table: &str, columns: &[String]) {
        if self.verbosity < Verbosity::Debug3 {
            return;
        }
        println!("  mining {table}: candidates = [{}]", columns.join(", "));
    }

    /// Reports the outcome of applying accepted suggestions (C7).
    pub fn report_apply_results(&self, results: &[ApplyResult]) {
        if self.verbosity < Verbosity::Info {
            return;
        }
        for result in results {
            let cols = result.index.columns.join(", ");
            match &result.outcome {
                ApplyOutcome::Created(elapsed) => {
                    println!(
                        "Created index on {} ({}) in {:.2}s",
                        result.index.table,
                        cols,
                        elapsed.as_secs_f64()
                    );
                }
                ApplyOutcome::AlreadyExists => {
                    println!("Index on {} ({}) already exists, skipping", result.index.table, cols);
                }
                ApplyOutcome::LockNotAvailable => {
                    println!("Could not acquire lock for {} ({}), skipping", result.index.table, cols);
                }
            }
        }
    }
}

fn fmt_cost(cost: Option<&f64>) -> String {
    cost.map(|c| format!("{c:.2}")).unwrap_or_else(|| "-".to_string())
}

fn fmt_indexes(indexes: &[crate::model::CandidateIndex]) -> String {
    if indexes.is_empty() {
        return "-".to_string();
    }
    indexes
        .iter()
        .map(|i| format!("{}({})", i.table, i.columns.join(",")))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_parses_known_levels() {
        assert_eq!(Verbosity::parse("error"), Verbosity::Error);
        assert_eq!(Verbosity::parse("debug2"), Verbosity::Debug2);
        assert_eq!(Verbosity::parse("debug3"), Verbosity::Debug3);
        assert_eq!(Verbosity::parse("nonsense"), Verbosity::Info);
    }

    #[test]
    fn verbosity_orders_from_error_to_debug3() {
        assert!(Verbosity::Error < Verbosity::Info);
        assert!(Verbosity::Info < Verbosity::Debug);
        assert!(Verbosity::Debug < Verbosity::Debug2);
        assert!(Verbosity::Debug2 < Verbosity::Debug3);
    }

    #[test]
    fn tracing_directive_folds_debug_tiers() {
        assert_eq!(Verbosity::Debug2.tracing_directive(), "debug");
        assert_eq!(Verbosity::Debug3.tracing_directive(), "debug");
        assert_eq!(Verbosity::Error.tracing_directive(), "error");
    }

    #[test]
    fn non_suggestion_reason_reports_low_cost() {
        let reporter = Reporter::new(Verbosity::Debug);
        let mut q = Query::new(
            crate::model::RawQuery::new("select 1"),
            "fp".into(),
            None,
            vec!["t".into()],
        );
        q.costs.set(0, 30.0);
        assert_eq!(reporter.non_suggestion_reason(&q), Some("low cost"));
    }

    #[test]
    fn non_suggestion_reason_reports_unparseable() {
        let reporter = Reporter::new(Verbosity::Debug);
        let q = Query::new(
            crate::model::RawQuery::new("not sql"),
            crate::model::UNKNOWN_FINGERPRINT.to_string(),
            None,
            vec![],
        );
        assert_eq!(reporter.non_suggestion_reason(&q), Some("unparseable query"));
    }
}
