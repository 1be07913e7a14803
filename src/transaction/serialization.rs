// Commit-time serialization graph and the dangerous-structure test.
//
// Every committed transaction is recorded with its read and write sets.
// When a read-write transaction asks to commit, its conflict edges against
// the committed population are computed tentatively first; the commit is
// refused when those edges would close a cycle containing two consecutive
// rw edges. Only after the check passes are the transaction and its edges
// recorded, so a refused commit leaves the graph untouched.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::common::{Tick, TransactionId, VariableId};
use crate::transaction::types::Transaction;

/// Kind of a conflict edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictKind {
    /// Writer-to-reader: the target read a variable the source wrote.
    Wr,
    /// The source (the later committer) wrote a variable the target read.
    Rw,
    /// Both wrote a common variable; earlier committer first.
    Ww,
}

/// A directed conflict edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictEdge {
    pub from: TransactionId,
    pub to: TransactionId,
    pub kind: ConflictKind,
}

/// The footprint a transaction leaves behind after committing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommittedTransaction {
    pub id: TransactionId,
    pub start_tick: Tick,
    pub commit_tick: Tick,
    pub read_set: BTreeSet<VariableId>,
    pub write_set: BTreeSet<VariableId>,
}

impl CommittedTransaction {
    /// Captures a live transaction's footprint at its commit tick.
    pub fn capture(txn: &Transaction, commit_tick: Tick) -> Self {
        Self {
            id: txn.id,
            start_tick: txn.start_tick,
            commit_tick,
            read_set: txn.read_set.clone(),
            write_set: txn.write_set.keys().copied().collect(),
        }
    }
}

/// Serialization graph over committed transactions.
#[derive(Debug, Clone, Default)]
pub struct SerializationGraph {
    committed: Vec<CommittedTransaction>,
    /// Outgoing adjacency; parallel edges of different kinds are kept.
    edges: BTreeMap<TransactionId, Vec<(TransactionId, ConflictKind)>>,
}

impl SerializationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn committed_count(&self) -> usize {
        self.committed.len()
    }

    /// Conflict edges the entry would contribute against every transaction
    /// committed so far:
    ///
    /// - `U -wr-> T` when T read a variable U wrote,
    /// - `T -rw-> U` when T wrote a variable U read,
    /// - `U -ww-> T` when both wrote a common variable (earlier committer
    ///   first; U committed first by construction).
    pub fn tentative_edges(&self, entry: &CommittedTransaction) -> Vec<ConflictEdge> {
        let mut out = Vec::new();
        for other in &self.committed {
            if other.id == entry.id {
                continue;
            }
            if !other.write_set.is_disjoint(&entry.read_set) {
                out.push(ConflictEdge {
                    from: other.id,
                    to: entry.id,
                    kind: ConflictKind::Wr,
                });
            }
            if !entry.write_set.is_disjoint(&other.read_set) {
                out.push(ConflictEdge {
                    from: entry.id,
                    to: other.id,
                    kind: ConflictKind::Rw,
                });
            }
            if !entry.write_set.is_disjoint(&other.write_set) {
                out.push(ConflictEdge {
                    from: other.id,
                    to: entry.id,
                    kind: ConflictKind::Ww,
                });
            }
        }
        out
    }

    /// Whether adding `tentative` would close a cycle through `entry_id`
    /// that carries two consecutive rw edges.
    ///
    /// Any new cycle must pass through the committing transaction, so the
    /// search enumerates simple paths from it back to itself over the
    /// merged edge set, checking each closed walk's kind sequence
    /// cyclically.
    pub fn closes_dangerous_cycle(
        &self,
        entry_id: TransactionId,
        tentative: &[ConflictEdge],
    ) -> bool {
        let adjacency = self.merged_adjacency(tentative);
        if adjacency.get(&entry_id).map_or(true, |e| e.is_empty()) {
            return false;
        }

        // Iterative DFS over simple paths; each frame tracks the next
        // outgoing edge index of its node.
        let mut frames: Vec<(TransactionId, usize)> = vec![(entry_id, 0)];
        let mut path_nodes: Vec<TransactionId> = vec![entry_id];
        let mut path_kinds: Vec<ConflictKind> = Vec::new();

        while let Some(frame) = frames.last_mut() {
            let (node, next) = (frame.0, frame.1);
            let outgoing: &[(TransactionId, ConflictKind)] =
                adjacency.get(&node).map(|v| v.as_slice()).unwrap_or(&[]);

            if next < outgoing.len() {
                frame.1 += 1;
                let (to, kind) = outgoing[next];
                if to == entry_id {
                    if has_consecutive_rw(&path_kinds, kind) {
                        return true;
                    }
                } else if !path_nodes.contains(&to) {
                    frames.push((to, 0));
                    path_nodes.push(to);
                    path_kinds.push(kind);
                }
            } else {
                frames.pop();
                path_nodes.pop();
                path_kinds.pop();
            }
        }
        false
    }

    /// Records a certified commit and its edges.
    pub fn record(&mut self, entry: CommittedTransaction, edges: Vec<ConflictEdge>) {
        for edge in edges {
            self.edges.entry(edge.from).or_default().push((edge.to, edge.kind));
        }
        self.committed.push(entry);
    }

    fn merged_adjacency(
        &self,
        tentative: &[ConflictEdge],
    ) -> BTreeMap<TransactionId, Vec<(TransactionId, ConflictKind)>> {
        let mut adjacency = self.edges.clone();
        for edge in tentative {
            adjacency
                .entry(edge.from)
                .or_default()
                .push((edge.to, edge.kind));
        }
        adjacency
    }
}

/// Checks the closed kind sequence `kinds + [closing]` for an adjacent
/// rw,rw pair, wrapping around the cycle boundary.
fn has_consecutive_rw(kinds: &[ConflictKind], closing: ConflictKind) -> bool {
    let mut seq: Vec<ConflictKind> = kinds.to_vec();
    seq.push(closing);
    let n = seq.len();
    if n < 2 {
        return false;
    }
    (0..n).any(|i| seq[i] == ConflictKind::Rw && seq[(i + 1) % n] == ConflictKind::Rw)
}
