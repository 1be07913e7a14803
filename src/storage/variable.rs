// A single data item and its multiversion history.
//
// Each `Variable` keeps the full sequence of committed versions ordered by
// commit tick, plus at most one staged (uncommitted) write held under a
// write lock. Snapshot reads resolve against the committed history; a site
// crash truncates the history to the most recent version, reflecting the
// loss of the site's log.

use serde::{Deserialize, Serialize};

use crate::common::{initial_value, is_replicated, Tick, TransactionId, VariableId};

/// One committed version of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    /// Tick at which this version committed.
    pub tick: Tick,
    /// The committed value.
    pub value: i64,
}

/// A tentative value staged under a write lock, not yet committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedWrite {
    pub value: i64,
    pub txn_id: TransactionId,
    /// Tick of the write operation that staged this value. Becomes the
    /// commit tick of the version when the owning transaction commits.
    pub write_tick: Tick,
}

/// A data item with its committed history and staged write.
///
/// # Invariants
///
/// - `versions` is non-empty and strictly increasing in `tick`; the first
///   entry is the seed version `(0, 10 * id)`.
/// - At most one staged write exists at a time; it belongs to the holder of
///   the write lock on this variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    pub id: VariableId,
    versions: Vec<Version>,
    staged: Option<StagedWrite>,
    readable: bool,
}

impl Variable {
    /// Creates the variable with its seed version.
    pub fn new(id: VariableId) -> Self {
        Self {
            id,
            versions: vec![Version {
                tick: 0,
                value: initial_value(id),
            }],
            staged: None,
            readable: true,
        }
    }

    /// The most recently committed value.
    pub fn last_committed(&self) -> i64 {
        self.versions[self.versions.len() - 1].value
    }

    /// Tick of the most recent commit.
    pub fn last_commit_tick(&self) -> Tick {
        self.versions[self.versions.len() - 1].tick
    }

    /// The version with the greatest commit tick `<= tick`, if any survives
    /// in the history.
    pub fn version_as_of(&self, tick: Tick) -> Option<Version> {
        self.versions
            .iter()
            .rev()
            .find(|v| v.tick <= tick)
            .copied()
    }

    /// Whether the variable currently serves read-write reads.
    pub fn is_readable(&self) -> bool {
        self.readable
    }

    /// Full committed history, oldest first.
    pub fn versions(&self) -> &[Version] {
        &self.versions
    }

    /// Records a pending write. Replaces any value the same transaction
    /// staged earlier.
    pub fn stage(&mut self, value: i64, txn_id: TransactionId, write_tick: Tick) {
        self.staged = Some(StagedWrite {
            value,
            txn_id,
            write_tick,
        });
    }

    /// The value staged by `txn_id`, if that transaction staged one here.
    pub fn staged_by(&self, txn_id: TransactionId) -> Option<i64> {
        match self.staged {
            Some(s) if s.txn_id == txn_id => Some(s.value),
            _ => None,
        }
    }

    /// Tick of the staged write, if any.
    pub fn staged_write_tick(&self) -> Option<Tick> {
        self.staged.map(|s| s.write_tick)
    }

    /// Appends the staged value to the history at `tick` and clears the
    /// stage. Committing re-establishes readability after recovery.
    pub fn commit(&mut self, tick: Tick) {
        if let Some(staged) = self.staged.take() {
            debug_assert!(tick > self.last_commit_tick());
            self.versions.push(Version {
                tick,
                value: staged.value,
            });
            self.readable = true;
        }
    }

    /// Drops the staged write if it belongs to `txn_id`.
    pub fn discard_staged(&mut self, txn_id: TransactionId) {
        if self.staged.map_or(false, |s| s.txn_id == txn_id) {
            self.staged = None;
        }
    }

    /// Site crash: the variable becomes unreadable and its history is
    /// truncated to the single most recent version.
    pub fn fail(&mut self) {
        self.readable = false;
        self.staged = None;
        let last = self.versions[self.versions.len() - 1];
        self.versions.clear();
        self.versions.push(last);
    }

    /// Site recovery. Non-replicated variables are immediately readable
    /// again; replicated ones stay unreadable until a commit writes them.
    pub fn recover(&mut self) {
        if !is_replicated(self.id) {
            self.readable = true;
        }
    }
}

impl std::fmt::Display for Variable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "x{}: {}", self.id, self.last_committed())
    }
}
