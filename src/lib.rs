// RepliDB - replicated multi-site transaction engine.
//
// Ten in-process sites hold twenty numbered data items; even-indexed items
// are replicated at every site, odd-indexed items live at a single home
// site. The engine runs scripted workloads over them with:
//
// - lock-based execution for read-write transactions, with waits-for
//   deadlock detection and youngest-victim resolution;
// - multiversion snapshot reads for read-only transactions;
// - commit-time certification of read-write transactions: site-failure
//   invalidation, first-committer-wins, and a serialization-graph test
//   that refuses commits closing a cycle with two consecutive rw edges;
// - a fail/recover lifecycle per site, with the waiting queue re-driven at
//   every recovery, commit, and abort.
//
// The library is single-threaded by design: commands arrive in the strict
// total order of a logical clock and each runs to completion. "Blocking"
// parks an operation in a FIFO queue for later retries at its original
// tick.

pub mod common;
pub mod parser;
pub mod storage;
pub mod transaction;

pub use common::{SiteId, Tick, TransactionId, VariableId, SITE_COUNT, VARIABLE_COUNT};
pub use parser::{run_script, Command, ParseError};
pub use transaction::error::{AbortReason, TransactionError, TransactionResult};
pub use transaction::manager::TransactionManager;

/// Crate version, surfaced in the binary's startup diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
