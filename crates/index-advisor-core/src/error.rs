//! Error types for the index advisor core.

/// Errors raised by the advisor's database-facing components.
///
/// Variants are grouped to match the error taxonomy of the advisor:
/// `Connection`, `ExtensionMissing` and `InsufficientPrivilege` are fatal
/// (the process should abort); `Explain` and `LockNotAvailable` are
/// recoverable per-query/per-index conditions the caller absorbs and
/// reports through [`crate::reporter::Reporter`].
#[derive(Debug, thiserror::Error)]
pub enum AdvisorError {
    /// The connection to the database could not be established or was lost.
    #[error("database connection error: {0}")]
    Connection(#[from] sqlx_core::error::Error),

    /// The HypoPG extension's shared object is not installed on the server.
    #[error(
        "the hypopg extension is not installed on this server; install it with \
         `CREATE EXTENSION hypopg` or add the hypopg package to your Postgres installation"
    )]
    ExtensionMissing,

    /// The connecting role lacks the privilege to install the HypoPG extension.
    #[error(
        "insufficient privilege to install the hypopg extension; connect as a \
         superuser, or ask an administrator to run `CREATE EXTENSION hypopg` once"
    )]
    InsufficientPrivilege,

    /// An `EXPLAIN` issued for a workload statement failed. Recoverable: the
    /// query is marked non-explainable for the remainder of the batch.
    #[error("EXPLAIN failed: {0}")]
    Explain(String),

    /// `CREATE INDEX CONCURRENTLY` could not acquire the lock it needed.
    /// Recoverable: the suggestion is skipped for this run.
    #[error("lock not available while creating index: {0}")]
    LockNotAvailable(String),

    /// A malformed `--dbname` / connection-string argument.
    #[error("invalid connection target: {0}")]
    InvalidTarget(String),
}

impl AdvisorError {
    /// Classifies a raw `sqlx` error surfaced while installing the HypoPG
    /// extension into the two fatal environment variants the advisor
    /// distinguishes, falling back to a generic connection error.
    #[must_use]
    pub fn from_extension_install(err: sqlx_core::error::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            let message = db_err.message();
            if message.contains("No such file or directory") || message.contains("could not open")
            {
                return AdvisorError::ExtensionMissing;
            }
            if db_err.code().as_deref() == Some("42501") || message.contains("permission denied")
            {
                return AdvisorError::InsufficientPrivilege;
            }
        }
        AdvisorError::Connection(err)
    }

    /// True for the Postgres `lock_not_available` SQLSTATE (`55P03`).
    #[must_use]
    pub fn is_lock_not_available(err: &sqlx_core::error::Error) -> bool {
        err.as_database_error()
            .and_then(|e| e.code())
            .map(|code| code == "55P03")
            .unwrap_or(false)
    }
}

/// Result type alias used throughout the advisor core.
pub type Result<T> = std::result::Result<T, AdvisorError>;
