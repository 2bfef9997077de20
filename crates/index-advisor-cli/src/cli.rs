use clap::Parser;

/// Automatic B-tree index advisor for a Postgres-family server.
///
/// Given a stream of executed SQL statements, proposes (and optionally
/// creates) indexes that measurably reduce planner cost for the observed
/// workload.
#[derive(Parser, Debug)]
#[command(name = "pg-index-advisor")]
#[command(about = "Automatic B-tree index advisor for Postgres, backed by HypoPG")]
#[command(version)]
pub struct Cli {
    /// Database host.
    #[arg(long, env = "PGHOST")]
    pub host: Option<String>,

    /// Database port.
    #[arg(short = 'p', long = "port", env = "PGPORT")]
    pub port: Option<u16>,

    /// Database target: bare name, `postgres://`/`postgresql://` URI, or a
    /// libpq key-value connection string.
    #[arg(short = 'd', long = "dbname")]
    pub dbname: Option<String>,

    /// Database user.
    #[arg(short = 'U', long = "user", env = "PGUSER")]
    pub user: Option<String>,

    /// Evaluate this single statement, then exit.
    #[arg(short = 's', long = "statement")]
    pub statement: Option<String>,

    /// Enable index creation for accepted suggestions.
    #[arg(long)]
    pub create: bool,

    /// Batch cadence, in seconds, on a streaming source.
    #[arg(long, default_value_t = 60)]
    pub interval: u64,

    /// Minimum accumulated-time filter, in minutes.
    #[arg(long = "min-time", default_value_t = 0.0)]
    pub min_time: f64,

    /// Tables never to index.
    #[arg(long, value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// If set, restrict index suggestions to these tables.
    #[arg(long, value_delimiter = ',')]
    pub include: Vec<String>,

    /// Verbosity: info, debug, debug2, debug3, or error.
    #[arg(long = "log-level", default_value = "info")]
    pub log_level: String,

    /// Echo every SQL statement issued to the database.
    #[arg(long = "log-sql")]
    pub log_sql: bool,

    /// Use the `pg_stat_statements` view as the workload source instead of
    /// stdin.
    #[arg(long = "pg-stat-statements")]
    pub pg_stat_statements: bool,

    /// Files to evaluate as a single batch. Mutually exclusive in practice
    /// with `-s` and `--pg-stat-statements`, but left unenforced — the
    /// source priority in `main` resolves which one wins.
    pub files: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_invocation() {
        let cli = Cli::parse_from(["pg-index-advisor"]);
        assert_eq!(cli.interval, 60);
        assert_eq!(cli.min_time, 0.0);
        assert!(!cli.create);
        assert!(!cli.pg_stat_statements);
    }

    #[test]
    fn parses_exclude_and_include_as_comma_lists() {
        let cli = Cli::parse_from([
            "pg-index-advisor",
            "--exclude",
            "a,b,c",
            "--include",
            "d,e",
        ]);
        assert_eq!(cli.exclude, vec!["a", "b", "c"]);
        assert_eq!(cli.include, vec!["d", "e"]);
    }

    #[test]
    fn parses_single_statement_flag() {
        let cli = Cli::parse_from(["pg-index-advisor", "-s", "select 1"]);
        assert_eq!(cli.statement.as_deref(), Some("select 1"));
    }

    #[test]
    fn parses_positional_files() {
        let cli = Cli::parse_from(["pg-index-advisor", "a.sql", "b.sql"]);
        assert_eq!(cli.files, vec!["a.sql", "b.sql"]);
    }
}
