// A simulated site: the per-site data manager.
//
// A site owns the variables resident on it under the replica placement
// rule, one lock table per variable, and its own failure history. All
// cross-site coordination lives in the transaction manager; a site only
// answers for its local state.

use serde::{Deserialize, Serialize};

use crate::common::{
    home_site, is_replicated, SiteId, Tick, TransactionId, VariableId, VARIABLE_COUNT,
};
use crate::storage::lock_manager::{LockKind, LockManager};
use crate::storage::variable::Variable;
use crate::transaction::types::{Operation, OperationKind, TransactionMode};

/// A lifecycle event in a site's failure history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SiteEvent {
    Down,
    Up,
}

/// One site of the simulated cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    active: bool,
    /// Dense slots indexed by `vid - 1`; `None` where the variable is not
    /// resident here.
    variables: Vec<Option<Variable>>,
    lock_managers: Vec<Option<LockManager>>,
    failure_history: Vec<(Tick, SiteEvent)>,
}

impl Site {
    /// Creates the site with its resident variables: every even-indexed
    /// variable, plus the odd-indexed ones whose home this is.
    pub fn new(id: SiteId) -> Self {
        let mut variables = Vec::with_capacity(VARIABLE_COUNT);
        let mut lock_managers = Vec::with_capacity(VARIABLE_COUNT);
        for vid in 1..=VARIABLE_COUNT {
            if is_replicated(vid) || home_site(vid) == id {
                variables.push(Some(Variable::new(vid)));
                lock_managers.push(Some(LockManager::new(vid)));
            } else {
                variables.push(None);
                lock_managers.push(None);
            }
        }
        Self {
            id,
            active: true,
            variables,
            lock_managers,
            failure_history: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn holds(&self, vid: VariableId) -> bool {
        vid >= 1 && vid <= VARIABLE_COUNT && self.variables[vid - 1].is_some()
    }

    pub fn variable(&self, vid: VariableId) -> Option<&Variable> {
        self.variables.get(vid - 1).and_then(|v| v.as_ref())
    }

    pub fn lock_manager(&self, vid: VariableId) -> Option<&LockManager> {
        self.lock_managers.get(vid - 1).and_then(|l| l.as_ref())
    }

    /// Whether a read issued by `op` could be served here right now.
    ///
    /// False when the site is down, the variable is absent or unreadable,
    /// or (read-write mode) the read lock cannot be granted.
    pub fn can_read(&self, mode: TransactionMode, op: &Operation) -> bool {
        if !self.active {
            return false;
        }
        let Some(var) = self.variable(op.variable_id) else {
            return false;
        };
        if !var.is_readable() {
            return false;
        }
        match mode {
            TransactionMode::ReadOnly => true,
            TransactionMode::ReadWrite => self.lock_managers[op.variable_id - 1]
                .as_ref()
                .map_or(false, |lm| lm.can_acquire(LockKind::Read, op.txn_id)),
        }
    }

    /// Serves a read. Read-only transactions resolve against the committed
    /// history as of their start tick; read-write transactions take the
    /// read lock and see their own staged value if one exists, else the
    /// last committed value.
    pub fn read(&mut self, mode: TransactionMode, start_tick: Tick, op: &Operation) -> Option<i64> {
        match mode {
            TransactionMode::ReadOnly => self.snapshot_read(op.variable_id, start_tick),
            TransactionMode::ReadWrite => {
                if !self.can_read(mode, op) {
                    return None;
                }
                if let Some(lm) = self.lock_managers[op.variable_id - 1].as_mut() {
                    lm.lock(LockKind::Read, op.txn_id);
                }
                let var = self.variables[op.variable_id - 1].as_ref()?;
                Some(var.staged_by(op.txn_id).unwrap_or_else(|| var.last_committed()))
            }
        }
    }

    /// Multiversion read used by read-only transactions.
    ///
    /// Returns the value of the version with the greatest commit tick
    /// `<= start_tick`, provided this site stayed up over the whole open
    /// interval between that commit and the snapshot point. A site that
    /// went down in between lost the guarantee that the retained value is
    /// the one the snapshot saw.
    pub fn snapshot_read(&self, vid: VariableId, start_tick: Tick) -> Option<i64> {
        if !self.active || !self.holds(vid) {
            return None;
        }
        let version = self.variables[vid - 1].as_ref()?.version_as_of(start_tick)?;
        if self.down_event_in(version.tick, start_tick) {
            return None;
        }
        Some(version.value)
    }

    /// Whether the write carried by `op` could be staged here right now.
    pub fn can_write(&self, mode: TransactionMode, op: &Operation) -> bool {
        if !self.active || mode == TransactionMode::ReadOnly || !self.holds(op.variable_id) {
            return false;
        }
        self.lock_managers[op.variable_id - 1]
            .as_ref()
            .map_or(false, |lm| lm.can_acquire(LockKind::Write, op.txn_id))
    }

    /// Takes (or promotes to) the write lock and stages the value.
    pub fn write(&mut self, mode: TransactionMode, op: &Operation) {
        let OperationKind::Write { value } = op.kind else {
            return;
        };
        if !self.can_write(mode, op) {
            return;
        }
        if let Some(lm) = self.lock_managers[op.variable_id - 1].as_mut() {
            lm.lock(LockKind::Write, op.txn_id);
        }
        if let Some(var) = self.variables[op.variable_id - 1].as_mut() {
            var.stage(value, op.txn_id, op.tick);
        }
    }

    /// Commits every value staged by `txn_id` here, each at the tick of
    /// the write that staged it, then releases all of the transaction's
    /// locks.
    pub fn commit(&mut self, txn_id: TransactionId) {
        for slot in 0..VARIABLE_COUNT {
            let write_locked = self.lock_managers[slot]
                .as_ref()
                .map_or(false, |lm| lm.is_write_locked_by(txn_id));
            if write_locked {
                if let Some(var) = self.variables[slot].as_mut() {
                    if let Some(write_tick) = var.staged_write_tick() {
                        var.commit(write_tick);
                    }
                }
            }
            if let Some(lm) = self.lock_managers[slot].as_mut() {
                lm.unlock(txn_id);
            }
        }
    }

    /// Releases the transaction's locks and drops its staged values.
    pub fn abort(&mut self, txn_id: TransactionId) {
        for slot in 0..VARIABLE_COUNT {
            if let Some(var) = self.variables[slot].as_mut() {
                var.discard_staged(txn_id);
            }
            if let Some(lm) = self.lock_managers[slot].as_mut() {
                lm.unlock(txn_id);
            }
        }
    }

    /// Crashes the site: all locks are released, every variable loses its
    /// older snapshots and becomes unreadable.
    pub fn fail(&mut self, tick: Tick) {
        self.active = false;
        for slot in 0..VARIABLE_COUNT {
            if let Some(var) = self.variables[slot].as_mut() {
                var.fail();
            }
            if let Some(lm) = self.lock_managers[slot].as_mut() {
                lm.unlock_all();
            }
        }
        self.failure_history.push((tick, SiteEvent::Down));
    }

    /// Brings the site back. Non-replicated variables become readable
    /// immediately; replicated ones wait for a committed write.
    pub fn recover(&mut self, tick: Tick) {
        self.active = true;
        for slot in 0..VARIABLE_COUNT {
            if let Some(var) = self.variables[slot].as_mut() {
                var.recover();
            }
        }
        self.failure_history.push((tick, SiteEvent::Up));
    }

    /// Tick of the most recent recovery, if the site ever came back up.
    pub fn last_recovery_tick(&self) -> Option<Tick> {
        self.failure_history
            .iter()
            .rev()
            .find(|(_, e)| *e == SiteEvent::Up)
            .map(|(t, _)| *t)
    }

    /// Whether a down event falls strictly inside the open interval
    /// `(lo, hi)`.
    pub fn down_event_in(&self, lo: Tick, hi: Tick) -> bool {
        self.failure_history
            .iter()
            .any(|&(t, e)| e == SiteEvent::Down && t > lo && t < hi)
    }

    /// One dump line: resident variables in ascending index order, down
    /// sites annotated after the id.
    pub fn dump_line(&self) -> String {
        let values: Vec<String> = (1..=VARIABLE_COUNT)
            .filter_map(|vid| self.variable(vid).map(|v| v.to_string()))
            .collect();
        let status = if self.active { "" } else { " (down)" };
        format!("site {}{} - {}", self.id, status, values.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_op(txn_id: TransactionId, vid: VariableId, tick: Tick) -> Operation {
        Operation {
            tick,
            txn_id,
            variable_id: vid,
            kind: OperationKind::Read,
        }
    }

    fn write_op(txn_id: TransactionId, vid: VariableId, value: i64, tick: Tick) -> Operation {
        Operation {
            tick,
            txn_id,
            variable_id: vid,
            kind: OperationKind::Write { value },
        }
    }

    #[test]
    fn residency_follows_placement_rule() {
        let s1 = Site::new(1);
        assert!(s1.holds(2));
        assert!(!s1.holds(1)); // x1's home is site 2
        let s2 = Site::new(2);
        assert!(s2.holds(1));
        assert!(s2.holds(11));
        assert!(!s2.holds(3));
    }

    #[test]
    fn read_write_read_takes_a_lock_and_sees_own_stage() {
        let mut site = Site::new(2);
        site.write(TransactionMode::ReadWrite, &write_op(1, 1, 77, 3));
        assert!(site.lock_manager(1).unwrap().is_write_locked_by(1));

        let own = site.read(TransactionMode::ReadWrite, 1, &read_op(1, 1, 4));
        assert_eq!(own, Some(77));

        // Another transaction is refused while the write lock is held.
        assert!(!site.can_read(TransactionMode::ReadWrite, &read_op(2, 1, 5)));
    }

    #[test]
    fn commit_applies_at_the_write_tick() {
        let mut site = Site::new(2);
        site.write(TransactionMode::ReadWrite, &write_op(1, 1, 77, 3));
        site.commit(1);

        let var = site.variable(1).unwrap();
        assert_eq!(var.last_committed(), 77);
        assert_eq!(var.last_commit_tick(), 3);
        assert!(site.lock_manager(1).unwrap().holders().is_empty());
    }

    #[test]
    fn abort_discards_the_stage() {
        let mut site = Site::new(2);
        site.write(TransactionMode::ReadWrite, &write_op(1, 1, 77, 3));
        site.abort(1);
        assert_eq!(site.variable(1).unwrap().last_committed(), 10);
        assert!(site.lock_manager(1).unwrap().holders().is_empty());
    }

    #[test]
    fn fail_releases_locks_and_recover_restores_odd_variables() {
        let mut site = Site::new(2);
        site.write(TransactionMode::ReadWrite, &write_op(1, 2, 5, 3));
        site.fail(4);
        assert!(!site.is_active());
        assert!(site.lock_manager(2).unwrap().holders().is_empty());
        assert!(!site.variable(2).unwrap().is_readable());

        site.recover(6);
        assert!(site.is_active());
        assert!(site.variable(1).unwrap().is_readable());
        assert!(!site.variable(2).unwrap().is_readable());
        assert_eq!(site.last_recovery_tick(), Some(6));
        assert!(site.down_event_in(3, 5));
        assert!(!site.down_event_in(4, 6));
    }

    #[test]
    fn snapshot_read_rejects_interrupted_intervals() {
        let mut site = Site::new(1);
        // Version (0, 20) with a crash at tick 2: a snapshot at tick 5 can
        // no longer trust this copy.
        site.fail(2);
        site.recover(3);
        assert_eq!(site.snapshot_read(2, 5), None);
        // A snapshot taken before the crash still qualifies.
        assert_eq!(site.snapshot_read(2, 1), Some(20));
    }

    #[test]
    fn dump_line_marks_down_sites() {
        let mut site = Site::new(3);
        assert!(site.dump_line().starts_with("site 3 - x2: 20, x4: 40"));
        site.fail(1);
        assert!(site.dump_line().starts_with("site 3 (down) - x2: 20"));
    }
}
