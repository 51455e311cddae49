//! The replica directory: tracks which two peers hold each row and
//! drives the `INSERT_ROW`/`UPDATE_ROW`/`DELETE_ROW`/`CLAIM_ROW` traffic that
//! keeps them in sync.

use crate::assignment::{Assignment, ReplicaMap};
use crate::error::ReplicaLoadError;
use cluster::{Message, NodeId, Registry};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const REPLICA_MAGIC: u32 = 0x5245_504c; // "REPL"
const REPLICA_VERSION: u16 = 1;
const INTER_NODE_TIMEOUT: Duration = Duration::from_secs(2);

/// Supplies a row's current payload so [`ReplicaDirectory`] can send it to a
/// freshly drawn secondary during reassignment, without `replication`
/// depending on `storage` directly (`storage::Table` implements this).
pub trait RowSource: Send + Sync {
    fn fetch_row(&self, row_id: Uuid) -> Option<Value>;
}

/// Drives replication for one `(database, table)`.
pub struct ReplicaDirectory {
    database: String,
    table: String,
    map: Mutex<ReplicaMap>,
    registry: Arc<Registry>,
    self_id: NodeId,
    client: reqwest::blocking::Client,
    row_source: Arc<dyn RowSource>,
}

impl ReplicaDirectory {
    #[must_use]
    pub fn new(
        database: impl Into<String>,
        table: impl Into<String>,
        registry: Arc<Registry>,
        self_id: NodeId,
        row_source: Arc<dyn RowSource>,
    ) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(INTER_NODE_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());
        Self {
            database: database.into(),
            table: table.into(),
            map: Mutex::new(ReplicaMap::new()),
            registry,
            self_id,
            client,
            row_source,
        }
    }

    /// Candidate peers for a fresh assignment: every currently live peer
    /// except the local node. Matches the specification's worked example
    /// ("with 3 live peers A, B, C..."), which never treats the writing
    /// node itself as a replication target.
    fn candidates(&self) -> Vec<NodeId> {
        self.registry
            .live_peers()
            .into_iter()
            .filter(|id| id != &self.self_id)
            .collect()
    }

    /// Records a freshly inserted row, assigns it to up to two live peers,
    /// and fires `INSERT_ROW` at both (best-effort — a delivery failure is
    /// logged, never surfaced to the caller, per the specification's
    /// at-least-once / fire-and-forget replication note).
    pub fn insert_row(&self, row_id: Uuid, sequence: u64, payload: Value) {
        let candidates = self.candidates();
        let assignment = self.map.lock().assign_for_insert(row_id, sequence, &candidates);
        for holder in assignment.holders() {
            self.send(
                holder,
                Message::InsertRow {
                    database: self.database.clone(),
                    table: self.table.clone(),
                    row_id,
                    sequence,
                    payload: payload.clone(),
                },
            );
        }
    }

    /// Propagates an update to whichever peers currently hold `row_id`. No
    /// reassignment happens here — holders don't change on update.
    pub fn update_row(&self, row_id: Uuid, sequence: u64, payload: Value) {
        let assignment = { self.map.lock().get(row_id) };
        let Some(assignment) = assignment else {
            return; // row was never assigned (single-node cluster); nothing to propagate.
        };
        for holder in assignment.holders() {
            self.send(
                holder,
                Message::UpdateRow {
                    database: self.database.clone(),
                    table: self.table.clone(),
                    row_id,
                    sequence,
                    payload: payload.clone(),
                },
            );
        }
    }

    /// Propagates a delete to current holders and drops the row's tracked
    /// assignment.
    pub fn delete_row(&self, row_id: Uuid, sequence: u64) {
        let assignment = {
            let mut map = self.map.lock();
            let assignment = map.get(row_id);
            map.remove(row_id);
            assignment
        };
        let Some(assignment) = assignment else {
            return;
        };
        for holder in assignment.holders() {
            self.send(
                holder,
                Message::DeleteRow {
                    database: self.database.clone(),
                    table: self.table.clone(),
                    row_id,
                    sequence,
                },
            );
        }
    }

    /// Applies an inbound message received from a peer: gates on sequence
    /// to stay idempotent under redelivery, then hands the effective
    /// mutation back to the caller (`storage::Table`) for application to
    /// the local row store. Returns `true` if the message was newer and
    /// should be applied.
    pub fn should_apply(&self, row_id: Uuid, sequence: u64) -> bool {
        self.map.lock().advance_if_newer(row_id, sequence)
    }

    /// Reacts to a peer being declared lost: reassigns every row it held,
    /// promoting a surviving secondary to primary and drawing a fresh
    /// secondary, then sends `CLAIM_ROW` to exactly the newly drawn node
    /// (the promoted node, if any, already has the row).
    pub fn handle_peer_lost(&self, lost: &NodeId) {
        let candidates = self.candidates();
        let claims = self.map.lock().reassign_after_loss(lost, &candidates);
        for (row_id, new_secondary) in claims {
            let Some(payload) = self.row_source.fetch_row(row_id) else {
                tracing::warn!(%row_id, "cannot claim-replicate a row with no local payload");
                continue;
            };
            let sequence = self.map.lock().sequence_of(row_id).unwrap_or(0);
            self.send(
                &new_secondary,
                Message::ClaimRow {
                    database: self.database.clone(),
                    table: self.table.clone(),
                    row_id,
                    sequence,
                    payload,
                },
            );
        }
    }

    /// The current assignment for `row_id`, if any — used by the storage
    /// layer's read path to know whether it's the sole holder of a row.
    #[must_use]
    pub fn assignment_of(&self, row_id: Uuid) -> Option<Assignment> {
        self.map.lock().get(row_id)
    }

    /// Snapshots every tracked assignment as `(row_id bytes, json value)`
    /// pairs, for persistence via [`blob::write_snapshot`].
    fn snapshot_entries(&self) -> Vec<(Vec<u8>, Option<Vec<u8>>)> {
        let map = self.map.lock();
        map.iter()
            .map(|(row_id, assignment)| {
                let value = serde_json::to_vec(assignment).unwrap_or_default();
                (row_id.as_bytes().to_vec(), Some(value))
            })
            .collect()
    }

    /// Persists the replica map for this table to `path`.
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> Result<(), ReplicaLoadError> {
        let entries = self.snapshot_entries();
        blob::write_snapshot(path, REPLICA_MAGIC, REPLICA_VERSION, entries)?;
        Ok(())
    }

    /// Loads a previously persisted replica map from `path`, replacing
    /// whatever this directory currently tracks.
    pub fn load(&self, path: impl AsRef<std::path::Path>) -> Result<(), ReplicaLoadError> {
        let entries = blob::load(path, REPLICA_MAGIC)?;
        let mut map = ReplicaMap::new();
        for (key, value) in entries {
            let Some(value) = value else { continue };
            let row_id = Uuid::from_slice(&key)
                .map_err(|e| ReplicaLoadError::Corrupt(format!("malformed row id: {e}")))?;
            let assignment: Assignment = serde_json::from_slice(&value)
                .map_err(|e| ReplicaLoadError::Corrupt(format!("malformed assignment: {e}")))?;
            map.overwrite(row_id, assignment);
        }
        *self.map.lock() = map;
        Ok(())
    }

    fn send(&self, peer_id: &str, message: Message) {
        let Some(descriptor) = self.registry.descriptor_of(peer_id) else {
            tracing::debug!(peer_id, "dropping replication message to a now-unknown peer");
            return;
        };
        let url = format!("http://{}:{}/__cluster/message", descriptor.ip, descriptor.port);
        if let Err(e) = self.client.post(&url).json(&message).send() {
            tracing::warn!(peer_id, error = %e, "replication message delivery failed");
        }
    }
}
