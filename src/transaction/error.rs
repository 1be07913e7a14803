//! Transaction-subsystem error types.
//!
//! Structured errors via `thiserror`. Two layers exist on purpose:
//! `TransactionError` covers conditions the dispatcher reports and moves
//! past (unknown ids, writes from read-only transactions, a failing output
//! stream), while `AbortReason` names the causes that terminate a
//! transaction; its `Display` strings are the suffixes of the
//! `T<k> aborts due to ...` event messages.

use std::io;

use thiserror::Error;

use crate::common::{SiteId, TransactionId, VariableId};

/// Result type alias for transaction operations.
pub type TransactionResult<T> = std::result::Result<T, TransactionError>;

/// Errors surfaced by transaction-manager entry points.
///
/// None of these propagate past the command dispatcher: a command naming an
/// unknown id is logged and skipped, with the tick still advancing.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// The command names a transaction that never began or already ended.
    #[error("transaction T{0} is not known")]
    UnknownTransaction(TransactionId),

    /// The command names a site outside `1..=10`.
    #[error("site {0} is not known")]
    UnknownSite(SiteId),

    /// The command names a variable outside `1..=20`.
    #[error("variable x{0} is not known")]
    UnknownVariable(VariableId),

    /// A write was issued by a read-only transaction.
    #[error("transaction T{0} is read-only; write rejected")]
    ReadOnlyWrite(TransactionId),

    /// The event stream could not be written.
    #[error("failed to write event output: {0}")]
    Output(#[from] io::Error),
}

impl TransactionError {
    /// The transaction this error is associated with, if any.
    pub fn transaction_id(&self) -> Option<TransactionId> {
        match self {
            TransactionError::UnknownTransaction(id) => Some(*id),
            TransactionError::ReadOnlyWrite(id) => Some(*id),
            _ => None,
        }
    }
}

/// Why a transaction was terminated instead of committing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AbortReason {
    /// Victim of waits-for cycle resolution.
    #[error("deadlock")]
    Deadlock,

    /// A site this transaction read from or staged a write on went down
    /// before `end`, or a down event invalidated a pending write.
    #[error("previous access of a down site")]
    SiteFailure,

    /// Another transaction committed a write to a variable in this
    /// transaction's write set after this transaction began.
    #[error("first-committer-wins")]
    FirstCommitterWins,

    /// Committing would close a serialization-graph cycle with two
    /// consecutive rw edges.
    #[error("dangerous structure")]
    DangerousStructure,

    /// No live site can serve the read-only snapshot.
    #[error("unavailable snapshot")]
    UnavailableSnapshot,

    /// `end` arrived while operations were still parked in the waiting
    /// queue.
    #[error("outstanding blocked operations")]
    OutstandingOperations,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = TransactionError::UnknownTransaction(42);
        assert_eq!(err.to_string(), "transaction T42 is not known");
        assert_eq!(err.transaction_id(), Some(42));
        assert_eq!(TransactionError::UnknownSite(11).transaction_id(), None);
    }

    #[test]
    fn abort_reasons_match_event_vocabulary() {
        assert_eq!(AbortReason::Deadlock.to_string(), "deadlock");
        assert_eq!(
            AbortReason::SiteFailure.to_string(),
            "previous access of a down site"
        );
        assert_eq!(
            AbortReason::FirstCommitterWins.to_string(),
            "first-committer-wins"
        );
        assert_eq!(
            AbortReason::DangerousStructure.to_string(),
            "dangerous structure"
        );
    }
}
