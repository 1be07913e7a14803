// The transaction coordinator.
//
// Owns every site and every live transaction, routes reads and writes to
// replicas, parks operations that cannot be served, and certifies
// read-write commits. Event messages go to the output sink the manager was
// built with; diagnostics go to the tracing subscriber.
//
// Routing rules:
//
// - A read-write read must be servable by every site holding the variable
//   (each copy live, readable, read lock grantable); the read locks all
//   copies and all of them count as accessed.
// - A write must be grantable at every live site holding the variable and
//   stages on all of them; down sites are skipped and pick the value up
//   only if they recover before the staging write's tick (they never do -
//   recovery is later), so recovered copies wait for a fresh committed
//   write.
// - A read-only read is served by the first live site whose history still
//   holds a version at or before the snapshot tick with no down event in
//   between.
//
// Blocked operations sit in a FIFO queue and are re-driven, at their
// original ticks, after site recovery, transaction end, and victim abort.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Write};

use tracing::debug;

use crate::common::{sites_holding, SiteId, Tick, TransactionId, VariableId, SITE_COUNT, VARIABLE_COUNT};
use crate::storage::site::Site;
use crate::transaction::deadlock::WaitsForGraph;
use crate::transaction::error::{AbortReason, TransactionError, TransactionResult};
use crate::transaction::serialization::{CommittedTransaction, ConflictEdge, SerializationGraph};
use crate::transaction::types::{
    Operation, OperationKind, Transaction, TransactionMode, TransactionState,
};

/// Result of one service attempt for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    /// Served, or the owning transaction is gone; drop the operation.
    Done,
    /// Cannot be served right now; keep it parked.
    Blocked,
}

/// Coordinator over the ten sites and all live transactions.
pub struct TransactionManager<W: Write> {
    sites: Vec<Site>,
    transactions: BTreeMap<TransactionId, Transaction>,
    /// FIFO queue of operations that could not be served.
    waiting: Vec<Operation>,
    waits_for: WaitsForGraph,
    history: SerializationGraph,
    out: W,
}

impl TransactionManager<io::Stdout> {
    /// Manager writing events to stdout.
    pub fn new() -> Self {
        Self::with_output(io::stdout())
    }
}

impl Default for TransactionManager<io::Stdout> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write> TransactionManager<W> {
    /// Manager writing events to an arbitrary sink.
    pub fn with_output(out: W) -> Self {
        Self {
            sites: (1..=SITE_COUNT).map(Site::new).collect(),
            transactions: BTreeMap::new(),
            waiting: Vec::new(),
            waits_for: WaitsForGraph::new(),
            history: SerializationGraph::new(),
            out,
        }
    }

    /// Consumes the manager and returns its output sink.
    pub fn into_output(self) -> W {
        self.out
    }

    /// Starts a read-write transaction. Duplicate ids are ignored.
    pub fn begin(&mut self, tid: TransactionId, tick: Tick) -> TransactionResult<()> {
        self.begin_with_mode(tid, tick, TransactionMode::ReadWrite)
    }

    /// Starts a read-only transaction. Duplicate ids are ignored.
    pub fn begin_ro(&mut self, tid: TransactionId, tick: Tick) -> TransactionResult<()> {
        self.begin_with_mode(tid, tick, TransactionMode::ReadOnly)
    }

    fn begin_with_mode(
        &mut self,
        tid: TransactionId,
        tick: Tick,
        mode: TransactionMode,
    ) -> TransactionResult<()> {
        if self.transactions.contains_key(&tid) {
            debug!(tid, "duplicate begin ignored");
            return Ok(());
        }
        self.transactions.insert(tid, Transaction::new(tid, tick, mode));
        match mode {
            TransactionMode::ReadWrite => writeln!(self.out, "T{tid} begins")?,
            TransactionMode::ReadOnly => writeln!(self.out, "T{tid} begins and is read-only")?,
        }
        Ok(())
    }

    /// Routes a read. Parks the operation and blocks the transaction when
    /// it cannot be served; a read-only read with no qualifying site
    /// aborts the transaction instead.
    pub fn read(&mut self, tid: TransactionId, vid: VariableId, tick: Tick) -> TransactionResult<()> {
        self.check_variable(vid)?;
        self.check_transaction(tid)?;
        let op = Operation::read(tick, tid, vid);
        match self.try_read(&op)? {
            Attempt::Done => Ok(()),
            Attempt::Blocked => self.park(op),
        }
    }

    /// Routes a write: all-or-nothing staging across every live site
    /// holding the variable.
    pub fn write(
        &mut self,
        tid: TransactionId,
        vid: VariableId,
        value: i64,
        tick: Tick,
    ) -> TransactionResult<()> {
        self.check_variable(vid)?;
        self.check_transaction(tid)?;
        if self.transactions.get(&tid).is_some_and(Transaction::is_read_only) {
            return Err(TransactionError::ReadOnlyWrite(tid));
        }
        let op = Operation::write(tick, tid, vid, value);
        match self.try_write(&op)? {
            Attempt::Done => Ok(()),
            Attempt::Blocked => self.park(op),
        }
    }

    /// Finishes a transaction: certification and commit, or abort.
    pub fn end(&mut self, tid: TransactionId, tick: Tick) -> TransactionResult<()> {
        let Some(txn) = self.transactions.get(&tid) else {
            return Err(TransactionError::UnknownTransaction(tid));
        };
        let flagged = txn.abort_on_commit;
        let read_only = txn.is_read_only();

        if flagged {
            return self.abort_with(tid, AbortReason::SiteFailure);
        }
        if self.waiting.iter().any(|op| op.txn_id == tid) {
            return self.abort_with(tid, AbortReason::OutstandingOperations);
        }

        let certification = match self.transactions.get(&tid) {
            Some(txn) if read_only => {
                let entry = CommittedTransaction::capture(txn, tick);
                let edges = self.history.tentative_edges(&entry);
                Ok((entry, edges))
            }
            Some(txn) => self.certify(txn, tick),
            None => return Err(TransactionError::UnknownTransaction(tid)),
        };

        match certification {
            Err(reason) => self.abort_with(tid, reason),
            Ok((entry, edges)) => {
                if !read_only {
                    let accessed: Vec<SiteId> = self
                        .transactions
                        .get(&tid)
                        .map(|t| t.accessed_sites.iter().copied().collect())
                        .unwrap_or_default();
                    for sid in accessed {
                        self.site_mut(sid).commit(tid);
                    }
                }
                writeln!(self.out, "T{tid} commits")?;
                self.history.record(entry, edges);
                self.complete_commit(tid)
            }
        }
    }

    /// Crashes a site and flags every read-write transaction that touched
    /// it for abort at its `end`.
    pub fn fail(&mut self, sid: SiteId, tick: Tick) -> TransactionResult<()> {
        self.check_site(sid)?;
        self.sites[sid - 1].fail(tick);
        for txn in self.transactions.values_mut() {
            if txn.mode == TransactionMode::ReadWrite && txn.has_accessed(sid) {
                txn.abort_on_commit = true;
            }
        }
        writeln!(self.out, "site {sid} fails")?;
        Ok(())
    }

    /// Recovers a site and re-drives the waiting queue.
    pub fn recover(&mut self, sid: SiteId, tick: Tick) -> TransactionResult<()> {
        self.check_site(sid)?;
        self.sites[sid - 1].recover(tick);
        writeln!(self.out, "site {sid} recovers")?;
        self.retry()
    }

    /// Prints every site's committed state, sites in ascending order.
    pub fn dump(&mut self) -> TransactionResult<()> {
        for index in 0..SITE_COUNT {
            let line = self.sites[index].dump_line();
            writeln!(self.out, "{line}")?;
        }
        Ok(())
    }

    /// Number of operations currently parked.
    pub fn waiting_count(&self) -> usize {
        self.waiting.len()
    }

    /// Whether a transaction is live (neither committed nor aborted).
    pub fn is_live(&self, tid: TransactionId) -> bool {
        self.transactions.contains_key(&tid)
    }

    // =========================================================================
    // Service attempts
    // =========================================================================

    fn try_read(&mut self, op: &Operation) -> TransactionResult<Attempt> {
        let Some(txn) = self.transactions.get(&op.txn_id) else {
            return Ok(Attempt::Done);
        };
        let start_tick = txn.start_tick;
        match txn.mode {
            TransactionMode::ReadOnly => self.try_snapshot_read(op, start_tick),
            TransactionMode::ReadWrite => self.try_locked_read(op, start_tick),
        }
    }

    /// Read-only read against the multiversion snapshot. Fails the whole
    /// transaction when no live site qualifies; never parks.
    fn try_snapshot_read(&mut self, op: &Operation, start_tick: Tick) -> TransactionResult<Attempt> {
        for sid in sites_holding(op.variable_id) {
            if let Some(value) = self.site(sid).snapshot_read(op.variable_id, start_tick) {
                if let Some(txn) = self.transactions.get_mut(&op.txn_id) {
                    txn.read_set.insert(op.variable_id);
                    txn.accessed_sites.insert(sid);
                }
                writeln!(self.out, "T{} reads x{}: {}", op.txn_id, op.variable_id, value)?;
                return Ok(Attempt::Done);
            }
        }
        writeln!(
            self.out,
            "T{} aborts due to {}",
            op.txn_id,
            AbortReason::UnavailableSnapshot
        )?;
        self.terminate(op.txn_id);
        Ok(Attempt::Done)
    }

    /// Read-write read: every copy of the variable must be live, readable,
    /// and read-lockable; all copies are locked and counted as accessed.
    fn try_locked_read(&mut self, op: &Operation, start_tick: Tick) -> TransactionResult<Attempt> {
        let holders = sites_holding(op.variable_id);
        let serviceable = holders
            .iter()
            .all(|&sid| self.site(sid).can_read(TransactionMode::ReadWrite, op));
        if !serviceable {
            return Ok(Attempt::Blocked);
        }

        let mut value = None;
        for &sid in &holders {
            let served = self.site_mut(sid).read(TransactionMode::ReadWrite, start_tick, op);
            if value.is_none() {
                value = served;
            }
        }
        let Some(value) = value else {
            return Ok(Attempt::Blocked);
        };

        if let Some(txn) = self.transactions.get_mut(&op.txn_id) {
            txn.read_set.insert(op.variable_id);
            txn.accessed_sites.extend(holders.iter().copied());
        }
        writeln!(self.out, "T{} reads x{}: {}", op.txn_id, op.variable_id, value)?;
        Ok(Attempt::Done)
    }

    /// Write staging: every live site holding the variable must grant the
    /// write lock; the value is staged on all of them.
    fn try_write(&mut self, op: &Operation) -> TransactionResult<Attempt> {
        if !self.transactions.contains_key(&op.txn_id) {
            return Ok(Attempt::Done);
        }
        let OperationKind::Write { value } = op.kind else {
            return Ok(Attempt::Done);
        };

        let live: Vec<SiteId> = sites_holding(op.variable_id)
            .into_iter()
            .filter(|&sid| self.site(sid).is_active())
            .collect();
        if live.is_empty() {
            return Ok(Attempt::Blocked);
        }
        let grantable = live
            .iter()
            .all(|&sid| self.site(sid).can_write(TransactionMode::ReadWrite, op));
        if !grantable {
            return Ok(Attempt::Blocked);
        }

        for &sid in &live {
            self.site_mut(sid).write(TransactionMode::ReadWrite, op);
        }
        if let Some(txn) = self.transactions.get_mut(&op.txn_id) {
            txn.record_write(op.variable_id, value, op.tick);
            txn.accessed_sites.extend(live.iter().copied());
        }
        writeln!(self.out, "T{} writes x{}: {}", op.txn_id, op.variable_id, value)?;
        Ok(Attempt::Done)
    }

    // =========================================================================
    // Blocking, retry, and deadlock resolution
    // =========================================================================

    /// Parks an operation, announces the block, and checks for deadlock.
    fn park(&mut self, op: Operation) -> TransactionResult<()> {
        let tid = op.txn_id;
        self.waiting.push(op);
        if let Some(txn) = self.transactions.get_mut(&tid) {
            txn.state = TransactionState::Blocked;
        }
        writeln!(self.out, "T{tid} blocked")?;
        self.rebuild_waits_for();
        if self.resolve_deadlock(tid)? {
            self.retry()?;
        }
        Ok(())
    }

    /// Re-drives the FIFO queue until a full pass makes no progress.
    /// Retried operations keep their original ticks, and a still-blocked
    /// retry is never re-announced.
    fn retry(&mut self) -> TransactionResult<()> {
        loop {
            let snapshot = self.waiting.clone();
            let mut progress = false;

            for op in snapshot {
                if !self.waiting.iter().any(|w| w.tick == op.tick) {
                    continue; // removed by an abort earlier in this pass
                }
                if !self.transactions.contains_key(&op.txn_id) {
                    self.waiting.retain(|w| w.tick != op.tick);
                    continue;
                }

                let attempt = if op.is_write() {
                    self.try_write(&op)?
                } else {
                    self.try_read(&op)?
                };
                match attempt {
                    Attempt::Done => {
                        self.waiting.retain(|w| w.tick != op.tick);
                        self.unblock_if_clear(op.txn_id);
                        progress = true;
                    }
                    Attempt::Blocked => {
                        self.rebuild_waits_for();
                        if self.resolve_deadlock(op.txn_id)? {
                            progress = true;
                        }
                    }
                }
            }

            if !progress {
                break;
            }
        }
        self.rebuild_waits_for();
        Ok(())
    }

    /// Marks a transaction active again once none of its operations are
    /// parked.
    fn unblock_if_clear(&mut self, tid: TransactionId) {
        if self.waiting.iter().any(|op| op.txn_id == tid) {
            return;
        }
        if let Some(txn) = self.transactions.get_mut(&tid) {
            txn.state = TransactionState::Active;
        }
    }

    /// Recomputes the waits-for graph from the queue. Both reads and
    /// writes can only be lock-blocked by a write-lock holder; operations
    /// waiting on a down or unreadable site contribute no edge.
    fn rebuild_waits_for(&mut self) {
        let mut by_waiter: BTreeMap<TransactionId, BTreeSet<TransactionId>> = BTreeMap::new();
        for op in &self.waiting {
            let entry = by_waiter.entry(op.txn_id).or_default();
            for sid in sites_holding(op.variable_id) {
                let site = &self.sites[sid - 1];
                if !site.is_active() {
                    continue;
                }
                if let Some(holder) =
                    site.lock_manager(op.variable_id).and_then(|lm| lm.write_holder())
                {
                    if holder != op.txn_id {
                        entry.insert(holder);
                    }
                }
            }
        }
        let mut graph = WaitsForGraph::new();
        for (waiter, holders) in by_waiter {
            graph.set_waits(waiter, holders);
        }
        self.waits_for = graph;
    }

    /// Runs cycle detection from a blocked transaction and aborts the
    /// youngest member of any cycle found.
    fn resolve_deadlock(&mut self, blocked: TransactionId) -> TransactionResult<bool> {
        let Some(cycle) = self.waits_for.find_cycle(blocked) else {
            return Ok(false);
        };
        let victim = cycle
            .iter()
            .copied()
            .max_by_key(|tid| self.transactions.get(tid).map(|t| t.start_tick))
            .unwrap_or(blocked);
        debug!(?cycle, victim, "deadlock detected");
        writeln!(self.out, "T{victim} aborts due to {}", AbortReason::Deadlock)?;
        self.terminate(victim);
        Ok(true)
    }

    // =========================================================================
    // Commit certification
    // =========================================================================

    /// Validates a read-write commit: live holders for every pending
    /// write, no down event between a write's tick and the commit, the
    /// first-committer-wins rule against every replica's history, and the
    /// dangerous-structure test on the serialization graph. Runs before
    /// any site state changes, so a refusal has nothing to undo.
    fn certify(
        &self,
        txn: &Transaction,
        commit_tick: Tick,
    ) -> Result<(CommittedTransaction, Vec<ConflictEdge>), AbortReason> {
        for (&vid, pending) in &txn.write_set {
            let holders = sites_holding(vid);
            if !holders.iter().any(|&sid| self.site(sid).is_active()) {
                return Err(AbortReason::SiteFailure);
            }
            for &sid in &holders {
                if self.site(sid).down_event_in(pending.write_tick, commit_tick) {
                    return Err(AbortReason::SiteFailure);
                }
                if let Some(var) = self.site(sid).variable(vid) {
                    if var.versions().iter().any(|v| v.tick > txn.start_tick) {
                        return Err(AbortReason::FirstCommitterWins);
                    }
                }
            }
        }

        let entry = CommittedTransaction::capture(txn, commit_tick);
        let edges = self.history.tentative_edges(&entry);
        if self.history.closes_dangerous_cycle(entry.id, &edges) {
            return Err(AbortReason::DangerousStructure);
        }
        Ok((entry, edges))
    }

    // =========================================================================
    // Termination
    // =========================================================================

    /// Announces an abort, cleans the transaction up, and re-drives the
    /// queue.
    fn abort_with(&mut self, tid: TransactionId, reason: AbortReason) -> TransactionResult<()> {
        writeln!(self.out, "T{tid} aborts due to {reason}")?;
        self.terminate(tid);
        self.retry()
    }

    /// Releases the transaction's locks and stages at every site, discards
    /// its parked operations, and removes it from the live tables.
    fn terminate(&mut self, tid: TransactionId) {
        for site in &mut self.sites {
            site.abort(tid);
        }
        self.waiting.retain(|op| op.txn_id != tid);
        self.waits_for.remove_transaction(tid);
        if let Some(txn) = self.transactions.get_mut(&tid) {
            txn.state = TransactionState::Aborted;
        }
        self.transactions.remove(&tid);
    }

    /// Removes a committed transaction and re-drives the queue.
    fn complete_commit(&mut self, tid: TransactionId) -> TransactionResult<()> {
        if let Some(txn) = self.transactions.get_mut(&tid) {
            txn.state = TransactionState::Committed;
        }
        self.transactions.remove(&tid);
        self.waits_for.remove_transaction(tid);
        self.retry()
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    fn site(&self, sid: SiteId) -> &Site {
        &self.sites[sid - 1]
    }

    fn site_mut(&mut self, sid: SiteId) -> &mut Site {
        &mut self.sites[sid - 1]
    }

    fn check_transaction(&self, tid: TransactionId) -> TransactionResult<()> {
        if self.transactions.contains_key(&tid) {
            Ok(())
        } else {
            Err(TransactionError::UnknownTransaction(tid))
        }
    }

    fn check_site(&self, sid: SiteId) -> TransactionResult<()> {
        if (1..=SITE_COUNT).contains(&sid) {
            Ok(())
        } else {
            Err(TransactionError::UnknownSite(sid))
        }
    }

    fn check_variable(&self, vid: VariableId) -> TransactionResult<()> {
        if (1..=VARIABLE_COUNT).contains(&vid) {
            Ok(())
        } else {
            Err(TransactionError::UnknownVariable(vid))
        }
    }
}
