//! The per-table replica map: `row-id -> {primary, secondary}`, plus the
//! pure (non-networked) logic for picking and reassigning holders. Kept
//! free of I/O so it can be tested without a registry or HTTP peers.

use cluster::NodeId;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// The two peers designated to hold a row's canonical and backup copies.
///
/// `primary` is `None` only when no peer was live at insert time (the row
/// exists only on the local node until a peer joins); `secondary` is `None`
/// whenever fewer than two peers are live, per the specification's
/// "unassigned" sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub primary: Option<NodeId>,
    pub secondary: Option<NodeId>,
}

impl Assignment {
    fn unassigned() -> Self {
        Self {
            primary: None,
            secondary: None,
        }
    }

    /// The current holders, for sending a mutation message to both.
    pub fn holders(&self) -> impl Iterator<Item = &NodeId> {
        self.primary.iter().chain(self.secondary.iter())
    }
}

/// One row's assignment plus the last sequence number applied to it, so
/// redelivered messages (from replication retries or CLAIM_ROW races) can
/// be dropped instead of reapplied.
#[derive(Debug, Clone)]
struct Entry {
    assignment: Assignment,
    sequence: u64,
}

/// `row-id -> Assignment` for one `(database, table)`.
#[derive(Debug, Default)]
pub struct ReplicaMap {
    rows: BTreeMap<Uuid, Entry>,
}

impl ReplicaMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Picks two distinct peers uniformly at random from `candidates` and
    /// records the assignment for a newly inserted row. Idempotent under
    /// redelivery: a lower-or-equal `sequence` than what's already recorded
    /// is ignored.
    pub fn assign_for_insert(&mut self, row_id: Uuid, sequence: u64, candidates: &[NodeId]) -> Assignment {
        if let Some(existing) = self.rows.get(&row_id) {
            if existing.sequence >= sequence {
                return existing.assignment.clone();
            }
        }
        let assignment = pick_distinct(candidates, &[], 2);
        self.rows.insert(
            row_id,
            Entry {
                assignment: assignment.clone(),
                sequence,
            },
        );
        assignment
    }

    /// Returns the current assignment for `row_id`, if it exists.
    #[must_use]
    pub fn get(&self, row_id: Uuid) -> Option<Assignment> {
        self.rows.get(&row_id).map(|e| e.assignment.clone())
    }

    /// Returns the last-applied sequence number for `row_id`.
    #[must_use]
    pub fn sequence_of(&self, row_id: Uuid) -> Option<u64> {
        self.rows.get(&row_id).map(|e| e.sequence)
    }

    /// Records `sequence` as applied for `row_id` if it is newer than what's
    /// on file. Returns `true` if the message should be (re-)applied.
    pub fn advance_if_newer(&mut self, row_id: Uuid, sequence: u64) -> bool {
        match self.rows.get_mut(&row_id) {
            Some(entry) if entry.sequence >= sequence => false,
            Some(entry) => {
                entry.sequence = sequence;
                true
            }
            None => {
                self.rows.insert(
                    row_id,
                    Entry {
                        assignment: Assignment::unassigned(),
                        sequence,
                    },
                );
                true
            }
        }
    }

    /// Removes a row's assignment entirely (on delete).
    pub fn remove(&mut self, row_id: Uuid) {
        self.rows.remove(&row_id);
    }

    /// Installs `assignment` for `row_id` verbatim, for rebuilding a map
    /// from a persisted snapshot (sequence numbers are not part of the
    /// snapshot and reset to `0`; the first inbound message for a row after
    /// restart always has a higher sequence and so is still applied).
    pub fn overwrite(&mut self, row_id: Uuid, assignment: Assignment) {
        self.rows.insert(row_id, Entry { assignment, sequence: 0 });
    }

    /// Iterates every tracked `(row_id, assignment)` pair, newest bookkeeping
    /// first being irrelevant — order is by row id.
    pub fn iter(&self) -> impl Iterator<Item = (Uuid, &Assignment)> {
        self.rows.iter().map(|(id, e)| (*id, &e.assignment))
    }

    /// Number of rows with a tracked assignment.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Reassigns every row held by `lost`, promoting a surviving secondary
    /// to primary and drawing a fresh secondary from `candidates` (which
    /// must already exclude `lost`).
    ///
    /// Returns `(row_id, new_secondary)` pairs for every row where a new
    /// secondary was actually drawn — these are the rows a `CLAIM_ROW`
    /// message must be sent for, since the promoted former-secondary (if
    /// any) already holds the row's data and only the freshly drawn node
    /// needs it sent.
    pub fn reassign_after_loss(&mut self, lost: &str, candidates: &[NodeId]) -> Vec<(Uuid, NodeId)> {
        let mut claims = Vec::new();
        for (row_id, entry) in self.rows.iter_mut() {
            let a = &mut entry.assignment;
            let was_primary = a.primary.as_deref() == Some(lost);
            let was_secondary = a.secondary.as_deref() == Some(lost);
            if !was_primary && !was_secondary {
                continue;
            }

            if was_primary {
                // Promote the surviving secondary (if any); it already
                // holds the row and needs no CLAIM_ROW.
                a.primary = a.secondary.take();
            }
            // Either branch now needs a fresh secondary, excluding the new
            // primary (and the lost node, which `candidates` never contains).
            let exclude: Vec<&str> = a.primary.as_deref().into_iter().collect();
            let picked = pick_distinct(candidates, &exclude, 1);
            a.secondary = picked.primary;
            if let Some(new_secondary) = a.secondary.clone() {
                claims.push((*row_id, new_secondary));
            }
        }
        claims
    }
}

/// Shuffles `candidates` (excluding any id in `exclude`) and returns up to
/// `count` distinct picks packed into an [`Assignment`] (`count <= 2`).
fn pick_distinct(candidates: &[NodeId], exclude: &[&str], count: usize) -> Assignment {
    let mut pool: Vec<NodeId> = candidates
        .iter()
        .filter(|id| !exclude.contains(&id.as_str()))
        .cloned()
        .collect();
    pool.shuffle(&mut rand::thread_rng());

    let primary = if count >= 1 { pool.first().cloned() } else { None };
    let secondary = if count >= 2 { pool.get(1).cloned() } else { None };
    Assignment { primary, secondary }
}
