mod cli;
mod log_source;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use index_advisor_core::adapters::{self, FileSource, SingleStatementSource, SourceAdapter, StatsViewSource};
use index_advisor_core::applier;
use index_advisor_core::config::{ConnTarget, ConnectionConfig};
use index_advisor_core::evaluator::{TableFilter, evaluate_batch};
use index_advisor_core::gateway::Gateway;
use index_advisor_core::hypopg::HypoEngine;
use index_advisor_core::model::RawQuery;
use index_advisor_core::reporter::{Reporter, Verbosity};

use cli::Cli;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{} {err:#}", "error:".red().bold());
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let verbosity = Verbosity::parse(&cli.log_level);
    init_tracing(verbosity);

    let options = connection_config(&cli).to_connect_options()?;
    let mut gateway = Gateway::connect(&options, cli.log_sql)
        .await
        .context("failed to connect to the database")?;

    let filter = TableFilter {
        include: cli.include.iter().cloned().collect(),
        exclude: cli.exclude.iter().cloned().collect(),
    };
    let reporter = Reporter::new(verbosity);
    let mut hypo = HypoEngine::new();

    // Source priority: a single literal statement, then positional files,
    // then the stats view, and finally the stdin log-tail as the default
    // streaming source (spec §6's external interfaces table).
    if let Some(statement) = cli.statement.clone() {
        let mut source = SingleStatementSource::new(statement);
        let raw = source
            .next_batch(&mut gateway)
            .await?
            .unwrap_or_default();
        return run_one_batch(&mut gateway, &mut hypo, raw, &filter, &reporter, cli.create).await;
    }

    if !cli.files.is_empty() {
        let contents = cli
            .files
            .iter()
            .map(|path| std::fs::read_to_string(path).with_context(|| format!("reading {path}")))
            .collect::<Result<Vec<_>>>()?;
        let mut source = FileSource::new(contents);
        let raw = source
            .next_batch(&mut gateway)
            .await?
            .unwrap_or_default();
        return run_one_batch(&mut gateway, &mut hypo, raw, &filter, &reporter, cli.create).await;
    }

    if cli.pg_stat_statements {
        let mut source = StatsViewSource::new(cli.min_time);
        loop {
            let raw = source
                .next_batch(&mut gateway)
                .await?
                .unwrap_or_default();
            run_one_batch(&mut gateway, &mut hypo, raw, &filter, &reporter, cli.create).await?;
            if !sleep_or_interrupt(cli.interval).await {
                break;
            }
        }
        return Ok(());
    }

    // Default: stdin log-tail, the per-statement batch cycle bounded by
    // `--interval`. The line reader is opened once and threaded through every
    // batch so bytes buffered past a line boundary survive between cycles.
    let mut lines = log_source::open_stdin_lines();
    loop {
        let (raw, eof) =
            log_source::collect_batch(&mut lines, Duration::from_secs(cli.interval), cli.min_time).await;
        if !raw.is_empty() {
            run_one_batch(&mut gateway, &mut hypo, raw, &filter, &reporter, cli.create).await?;
        }
        if eof {
            break;
        }
    }
    Ok(())
}

/// Runs one full evaluate/report/(optionally) apply cycle over a raw batch.
async fn run_one_batch(
    gateway: &mut Gateway,
    hypo: &mut HypoEngine,
    raw: Vec<RawQuery>,
    filter: &TableFilter,
    reporter: &Reporter,
    create: bool,
) -> Result<()> {
    if raw.is_empty() {
        reporter.report_suggestions(&[]);
        return Ok(());
    }
    let queries = adapters::into_queries(raw);
    let outcome = evaluate_batch(gateway, hypo, queries, filter, reporter).await?;
    reporter.report_queries(&outcome.queries);
    reporter.report_suggestions(&outcome.suggestions);

    if create && !outcome.suggestions.is_empty() {
        let results = applier::apply_suggestions(gateway, &outcome.suggestions).await?;
        reporter.report_apply_results(&results);
    }
    Ok(())
}

/// Sleeps for `secs` or until Ctrl-C is received, whichever comes first.
/// Returns `false` on interrupt so the caller's batch loop can exit
/// cleanly.
async fn sleep_or_interrupt(secs: u64) -> bool {
    if secs == 0 {
        return true;
    }
    tokio::select! {
        () = tokio::time::sleep(Duration::from_secs(secs)) => true,
        _ = tokio::signal::ctrl_c() => false,
    }
}

fn connection_config(cli: &Cli) -> ConnectionConfig {
    ConnectionConfig {
        target: cli.dbname.as_deref().map(ConnTarget::parse),
        host: cli.host.clone(),
        port: cli.port,
        user: cli.user.clone(),
    }
}

fn init_tracing(verbosity: Verbosity) {
    let filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(verbosity.tracing_directive()));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}
