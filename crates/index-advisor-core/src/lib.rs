//! Index-candidate evaluation pipeline for the automatic Postgres index
//! advisor.
//!
//! This crate owns everything that talks to the database and everything
//! that decides what to suggest: the serialized SQL gateway (C1), the
//! catalog probe (C2), the query model and tree-walking helpers (C3), the
//! HypoPG wrapper (C5), the candidate evaluator (C6), the index applier
//! (C7), and the reporter (C8). Source adapters that need process I/O
//! (stdin tailing, `--host`/`-p`/`-U` CLI wiring) live in the `pg-index-advisor`
//! binary crate; the two source adapters that only need a database
//! connection (`pg_stat_statements`, file/statement batches) live here
//! alongside the rest of the pipeline.
//!
//! # Architecture
//!
//! - [`gateway`]: the single serialized connection (C1)
//! - [`catalog`]: table/column/index enumeration (C2)
//! - [`model`]: `Query`, descriptors, and the generic tree walker (C3)
//! - [`parser`]: the external parse/fingerprint collaborator (`pg_query`)
//! - [`adapters`]: source adapters that produce fingerprint-unique batches (C4)
//! - [`hypopg`]: the hypothetical-index engine (C5)
//! - [`evaluator`]: the core column-mining/cost-savings algorithm (C6)
//! - [`applier`]: advisory-locked concurrent index creation (C7)
//! - [`reporter`]: human-readable and debug diagnostics (C8)
//! - [`config`]: connection-string polymorphism
//! - [`error`]: the crate's error taxonomy

pub mod adapters;
pub mod applier;
pub mod catalog;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod gateway;
pub mod hypopg;
pub mod model;
pub mod parser;
pub mod reporter;

pub use error::{AdvisorError, Result};
pub use evaluator::{EvaluationOutcome, Suggestion, TableFilter, evaluate_batch};
pub use gateway::Gateway;
pub use hypopg::HypoEngine;
pub use reporter::{Reporter, Verbosity};
