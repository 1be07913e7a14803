// Core transaction types and domain records.
//
// The records here are deliberately plain: a transaction is metadata about
// an in-flight unit of work, an operation is one read or write request
// frozen at its issue tick so a parked retry replays it unchanged.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::{SiteId, Tick, TransactionId, VariableId};

/// Concurrency-control mode, fixed at `begin` time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionMode {
    /// Lock-based execution with commit-time certification.
    ReadWrite,
    /// Lock-free execution against the multiversion snapshot taken at the
    /// start tick.
    ReadOnly,
}

/// Lifecycle state of a transaction.
///
/// ```text
/// Active -> Blocked -> Active        (parked operation retried)
///        -> Blocked -> Aborted       (deadlock victim)
/// Active -> Committed | Aborted      (end / certification)
/// ```
///
/// `Committed` and `Aborted` are terminal; a terminated transaction is
/// removed from the live tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionState {
    Active,
    Blocked,
    Committed,
    Aborted,
}

impl TransactionState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionState::Committed | TransactionState::Aborted)
    }
}

/// A write buffered in the transaction until commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingWrite {
    pub value: i64,
    /// Tick of the write command; becomes the version's commit tick if the
    /// transaction certifies.
    pub write_tick: Tick,
}

/// Metadata for one transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub start_tick: Tick,
    pub mode: TransactionMode,
    pub state: TransactionState,
    /// Variables this transaction has read.
    pub read_set: BTreeSet<VariableId>,
    /// Buffered writes, one slot per variable; a rewrite replaces the slot.
    pub write_set: BTreeMap<VariableId, PendingWrite>,
    /// Sites that served a read or staged a write for this transaction.
    pub accessed_sites: BTreeSet<SiteId>,
    /// Set when a site this transaction touched crashed before `end`; the
    /// transaction must abort at commit time.
    pub abort_on_commit: bool,
}

impl Transaction {
    pub fn new(id: TransactionId, start_tick: Tick, mode: TransactionMode) -> Self {
        Self {
            id,
            start_tick,
            mode,
            state: TransactionState::Active,
            read_set: BTreeSet::new(),
            write_set: BTreeMap::new(),
            accessed_sites: BTreeSet::new(),
            abort_on_commit: false,
        }
    }

    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.mode == TransactionMode::ReadOnly
    }

    pub fn record_write(&mut self, vid: VariableId, value: i64, write_tick: Tick) {
        self.write_set.insert(vid, PendingWrite { value, write_tick });
    }

    pub fn has_accessed(&self, site: SiteId) -> bool {
        self.accessed_sites.contains(&site)
    }
}

/// One read or write request, frozen at its issue tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub tick: Tick,
    pub txn_id: TransactionId,
    pub variable_id: VariableId,
    pub kind: OperationKind,
}

/// Payload distinguishing reads from writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    Read,
    Write { value: i64 },
}

impl Operation {
    pub fn read(tick: Tick, txn_id: TransactionId, variable_id: VariableId) -> Self {
        Self {
            tick,
            txn_id,
            variable_id,
            kind: OperationKind::Read,
        }
    }

    pub fn write(tick: Tick, txn_id: TransactionId, variable_id: VariableId, value: i64) -> Self {
        Self {
            tick,
            txn_id,
            variable_id,
            kind: OperationKind::Write { value },
        }
    }

    #[inline]
    pub fn is_write(&self) -> bool {
        matches!(self.kind, OperationKind::Write { .. })
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            OperationKind::Read => write!(f, "R(T{},x{})", self.txn_id, self.variable_id),
            OperationKind::Write { value } => {
                write!(f, "W(T{},x{},{})", self.txn_id, self.variable_id, value)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_terminality() {
        assert!(TransactionState::Committed.is_terminal());
        assert!(TransactionState::Aborted.is_terminal());
        assert!(!TransactionState::Active.is_terminal());
        assert!(!TransactionState::Blocked.is_terminal());
    }

    #[test]
    fn rewrite_replaces_the_pending_slot() {
        let mut txn = Transaction::new(1, 5, TransactionMode::ReadWrite);
        txn.record_write(2, 10, 6);
        txn.record_write(2, 11, 8);
        assert_eq!(txn.write_set.len(), 1);
        assert_eq!(
            txn.write_set[&2],
            PendingWrite {
                value: 11,
                write_tick: 8
            }
        );
    }

    #[test]
    fn operation_constructors() {
        let r = Operation::read(3, 1, 2);
        assert!(!r.is_write());
        let w = Operation::write(4, 1, 2, 9);
        assert!(w.is_write());
        assert_eq!(w.to_string(), "W(T1,x2,9)");
        assert_eq!(r.to_string(), "R(T1,x2)");
    }
}
