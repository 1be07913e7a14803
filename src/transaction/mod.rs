// Transaction coordination.
//
// | Module | Responsibility |
// |--------|----------------|
// | [`types`] | Transaction records, modes, states, operations |
// | [`error`] | Structured errors and abort reasons |
// | [`manager`] | Routing, blocking, retry, commit |
// | [`deadlock`] | Waits-for graph and cycle detection |
// | [`serialization`] | Commit-time conflict graph and the SSI test |

pub mod deadlock;
pub mod error;
pub mod manager;
pub mod serialization;
pub mod types;

pub use deadlock::WaitsForGraph;
pub use error::{AbortReason, TransactionError, TransactionResult};
pub use manager::TransactionManager;
pub use serialization::{CommittedTransaction, ConflictEdge, ConflictKind, SerializationGraph};
pub use types::{
    Operation, OperationKind, PendingWrite, Transaction, TransactionMode, TransactionState,
};
