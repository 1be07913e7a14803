// Per-variable lock table.
//
// Each variable at each site carries its own `LockManager`. Writers exclude
// other writers and block new readers; a reader's own lock promotes in
// place when it upgrades to a write. Read locks held by other transactions
// do not exclude a writer: reader/writer serialization is enforced at
// commit time by the certification engine, not by the lock table.

use serde::{Deserialize, Serialize};

use crate::common::{TransactionId, VariableId};

/// Kind of lock held on a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockKind {
    Read,
    Write,
}

/// A granted lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    pub txn_id: TransactionId,
    pub kind: LockKind,
}

/// Lock table for a single variable.
///
/// At most one write lock exists at any time. Lock acquisition is
/// idempotent: re-locking an already held variable is a no-op, and a read
/// lock held by the requester promotes when a write lock is requested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockManager {
    pub variable_id: VariableId,
    locks: Vec<Lock>,
}

impl LockManager {
    pub fn new(variable_id: VariableId) -> Self {
        Self {
            variable_id,
            locks: Vec::new(),
        }
    }

    /// Whether `txn_id` could be granted a lock of `kind` right now.
    pub fn can_acquire(&self, kind: LockKind, txn_id: TransactionId) -> bool {
        match kind {
            LockKind::Read => self.write_holder().map_or(true, |h| h == txn_id),
            LockKind::Write => !self
                .locks
                .iter()
                .any(|l| l.kind == LockKind::Write && l.txn_id != txn_id),
        }
    }

    /// Grants a lock of `kind` to `txn_id`. Promotes a held read lock on a
    /// write request; no-op when the grant would be refused or is already
    /// held.
    pub fn lock(&mut self, kind: LockKind, txn_id: TransactionId) {
        if !self.can_acquire(kind, txn_id) {
            return;
        }
        match self.lock_of_mut(txn_id) {
            Some(held) => {
                if kind == LockKind::Write {
                    held.kind = LockKind::Write;
                }
            }
            None => self.locks.push(Lock { txn_id, kind }),
        }
    }

    /// Releases every lock held by `txn_id`.
    pub fn unlock(&mut self, txn_id: TransactionId) {
        self.locks.retain(|l| l.txn_id != txn_id);
    }

    /// Releases every lock. Used when the owning site crashes.
    pub fn unlock_all(&mut self) {
        self.locks.clear();
    }

    /// Transactions currently holding any lock here.
    pub fn holders(&self) -> Vec<TransactionId> {
        self.locks.iter().map(|l| l.txn_id).collect()
    }

    /// The transaction holding the write lock, if any.
    pub fn write_holder(&self) -> Option<TransactionId> {
        self.locks
            .iter()
            .find(|l| l.kind == LockKind::Write)
            .map(|l| l.txn_id)
    }

    pub fn is_write_locked_by(&self, txn_id: TransactionId) -> bool {
        self.write_holder() == Some(txn_id)
    }

    fn lock_of_mut(&mut self, txn_id: TransactionId) -> Option<&mut Lock> {
        self.locks.iter_mut().find(|l| l.txn_id == txn_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readers_share() {
        let mut lm = LockManager::new(2);
        lm.lock(LockKind::Read, 1);
        lm.lock(LockKind::Read, 2);
        assert_eq!(lm.holders(), vec![1, 2]);
        assert!(lm.write_holder().is_none());
    }

    #[test]
    fn writers_exclude_writers() {
        let mut lm = LockManager::new(2);
        lm.lock(LockKind::Write, 1);
        assert!(!lm.can_acquire(LockKind::Write, 2));
        assert!(lm.can_acquire(LockKind::Write, 1));
        lm.lock(LockKind::Write, 2);
        assert_eq!(lm.write_holder(), Some(1));
    }

    #[test]
    fn foreign_read_lock_does_not_block_a_writer() {
        let mut lm = LockManager::new(2);
        lm.lock(LockKind::Read, 1);
        assert!(lm.can_acquire(LockKind::Write, 2));
        lm.lock(LockKind::Write, 2);
        assert!(lm.is_write_locked_by(2));
        // But a write lock blocks new foreign readers.
        assert!(!lm.can_acquire(LockKind::Read, 3));
        assert!(lm.can_acquire(LockKind::Read, 2));
    }

    #[test]
    fn own_read_lock_promotes() {
        let mut lm = LockManager::new(2);
        lm.lock(LockKind::Read, 1);
        lm.lock(LockKind::Write, 1);
        assert!(lm.is_write_locked_by(1));
        assert_eq!(lm.holders(), vec![1]);
    }

    #[test]
    fn unlock_releases_only_the_caller() {
        let mut lm = LockManager::new(2);
        lm.lock(LockKind::Read, 1);
        lm.lock(LockKind::Write, 2);
        lm.unlock(2);
        assert_eq!(lm.holders(), vec![1]);
        lm.unlock_all();
        assert!(lm.holders().is_empty());
    }
}
