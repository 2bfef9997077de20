//! Log-tail source adapter (C4): reads `{statement_text, duration_ms}`
//! events from standard input.
//!
//! Out of core scope per spec §4.6 — "specified only as an input contract"
//! — but the contract is precise enough to give a real, testable
//! implementation: one JSON object per line, accumulated until `interval`
//! elapses. The upstream log-tailer producing these lines (parsing the
//! server's slow-query log) is an external collaborator this binary does
//! not implement.

use std::time::Duration;

use index_advisor_core::model::RawQuery;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Instant;
use tracing::debug;

/// Parses one stdin line as a `{statement_text, duration_ms}` event.
/// Malformed or incomplete lines are dropped rather than treated as a fatal
/// error — a single bad line from the tailer should not abort a long-running
/// streaming source.
fn parse_log_line(line: &str) -> Option<(String, f64)> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    let statement_text = value.get("statement_text")?.as_str()?.to_string();
    let duration_ms = value.get("duration_ms")?.as_f64()?;
    Some((statement_text, duration_ms))
}

/// A stdin line reader held across [`collect_batch`] calls. `BufReader` may
/// buffer bytes past the last complete line on any given read; rebuilding it
/// every batch would drop those bytes, silently losing statements between
/// batches. The caller constructs one `Lines` and keeps passing it back in.
pub type StdinLines = tokio::io::Lines<BufReader<tokio::io::Stdin>>;

/// Opens the stdin line stream. Call once; hand the result to every
/// [`collect_batch`] call for the life of the process.
#[must_use]
pub fn open_stdin_lines() -> StdinLines {
    BufReader::new(tokio::io::stdin()).lines()
}

/// Accumulates events from stdin for up to `interval`, dropping any whose
/// duration falls below `min_time_minutes` (converted to milliseconds, the
/// same unit the stats-view source filters on).
///
/// Returns the collected batch alongside whether stdin has been closed —
/// the caller's batch loop keeps polling on a plain timeout (normal, even
/// if it yields zero events) but must stop once the tailer's pipe is gone.
pub async fn collect_batch(
    lines: &mut StdinLines,
    interval: Duration,
    min_time_minutes: f64,
) -> (Vec<RawQuery>, bool) {
    let min_time_ms = min_time_minutes * 60_000.0;
    let deadline = Instant::now() + interval;
    let mut out = Vec::new();

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return (out, false);
        }
        match tokio::time::timeout(remaining, lines.next_line()).await {
            Ok(Ok(Some(line))) => match parse_log_line(&line) {
                Some((statement_text, duration_ms)) if duration_ms >= min_time_ms => {
                    let mut raw = RawQuery::new(statement_text);
                    raw.total_time_ms = Some(duration_ms);
                    out.push(raw);
                }
                Some(_) => debug!("dropping event below min-time threshold"),
                None => debug!(line, "dropping unparseable log-tail line"),
            },
            Ok(Ok(None)) => return (out, true), // stdin closed
            Ok(Err(_)) => return (out, true),
            Err(_) => return (out, false), // interval elapsed, stream still open
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_event() {
        let line = r#"{"statement_text": "select 1", "duration_ms": 42.5}"#;
        assert_eq!(
            parse_log_line(line),
            Some(("select 1".to_string(), 42.5))
        );
    }

    #[test]
    fn rejects_malformed_json() {
        assert_eq!(parse_log_line("not json"), None);
    }

    #[test]
    fn rejects_missing_fields() {
        assert_eq!(parse_log_line(r#"{"statement_text": "select 1"}"#), None);
    }
}
