//! The per-`(database, table)` glue that ties the LSM engine, the B-tree
//! indexes, and the replica directory together into the row-level contract
//! the rest of the node (and, eventually, an external query pipeline) calls.
//!
//! Rows are keyed by a `Uuid` generated at insert time and stored in the
//! LSM engine under their raw 16-byte encoding; the document itself is
//! opaque JSON, serialized to bytes at this boundary only — the engine
//! underneath never interprets it. A row's JSON payload and its engine key
//! are therefore always in lockstep: the engine is this table's single
//! source of truth for "does this row exist and what is its value", with
//! `storage.file` (see [`Table::persist_storage_snapshot`]) kept only as the
//! on-disk-layout-compatible snapshot named in the specification, not
//! consulted on recovery (engine recovery already reconstructs the same
//! state from the WAL and SSTables).

use crate::auto_index::AutoIndexTracker;
use crate::column::encode_column;
use crate::error::StorageError;
use cluster::Message;
use config::{AutoIndexConfig, EngineConfig};
use engine::Engine;
use parking_lot::RwLock;
use replication::{ReplicaDirectory, RowSource};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

const STORAGE_MAGIC: u32 = 0x5354_4f52; // "STOR"
const STORAGE_VERSION: u16 = 1;

type Result<T> = std::result::Result<T, StorageError>;

/// One `(database, table)`'s full state: its LSM engine, its secondary
/// indexes, and its replica directory.
pub struct Table {
    database: String,
    name: String,
    dir: PathBuf,
    engine: Arc<Engine>,
    indexes: RwLock<HashMap<String, btree::BTreeIndex>>,
    auto_index: AutoIndexTracker,
    replica: Arc<ReplicaDirectory>,
}

impl Table {
    /// Opens (creating if necessary) the table rooted at `dir`, recovering
    /// its engine, loading or rebuilding every persisted index, and loading
    /// its replica map.
    ///
    /// `dir` is expected to already be `data/<db>/<table>`, per spec.md §6's
    /// on-disk layout; the caller (`node`'s recovery orchestrator) is
    /// responsible for creating that directory structure and for calling
    /// this once per table in the sequencing C10 requires.
    pub fn open(
        dir: impl Into<PathBuf>,
        database: impl Into<String>,
        name: impl Into<String>,
        engine_config: EngineConfig,
        auto_index_config: AutoIndexConfig,
        registry: Arc<cluster::Registry>,
        self_id: cluster::NodeId,
    ) -> Result<Arc<Self>> {
        let dir = dir.into();
        let database = database.into();
        let name = name.into();

        std::fs::create_dir_all(dir.join("lsm"))?;

        let engine = Engine::open(dir.join("lsm"), dir.join("lsm"), engine_config)?;

        let table = Arc::new_cyclic(|weak: &std::sync::Weak<Table>| {
            let row_source = WeakRowSource {
                table: weak.clone(),
            };
            Table {
                database: database.clone(),
                name: name.clone(),
                dir: dir.clone(),
                engine,
                indexes: RwLock::new(HashMap::new()),
                auto_index: AutoIndexTracker::new(auto_index_config),
                replica: Arc::new(ReplicaDirectory::new(
                    database,
                    name,
                    registry,
                    self_id,
                    Arc::new(row_source),
                )),
            }
        });

        table.load_indexes()?;
        match table.replica.load(table.replica_path()) {
            Ok(()) => {}
            Err(replication::ReplicaLoadError::Missing) => {
                tracing::debug!(table = %table.name, "no persisted replica map, starting fresh");
            }
            Err(e) => {
                tracing::error!(table = %table.name, error = %e, "replica map corrupt, starting fresh");
            }
        }

        Ok(table)
    }

    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn storage_path(&self) -> PathBuf {
        self.dir.join("storage.file")
    }

    fn replica_path(&self) -> PathBuf {
        self.dir.join("replica.file")
    }

    fn index_path(&self, column: &str) -> PathBuf {
        self.dir.join(format!("index.{column}.file"))
    }

    /// Inserts a new row, generating its id, propagating to replicas, and
    /// updating every maintained index.
    pub fn insert_row(&self, payload: Value) -> Result<Uuid> {
        let row_id = Uuid::new_v4();
        let bytes = serde_json::to_vec(&payload)?;
        self.engine.put(row_id.as_bytes().to_vec(), bytes)?;
        let sequence = self.engine.seq();

        self.index_insert(row_id, &payload);
        self.replica.insert_row(row_id, sequence, payload);
        Ok(row_id)
    }

    /// Updates an existing row's payload in place.
    pub fn update_row(&self, row_id: Uuid, payload: Value) -> Result<()> {
        let old = self.get_row(row_id)?.ok_or(StorageError::RowNotFound(row_id))?;
        let bytes = serde_json::to_vec(&payload)?;
        self.engine.put(row_id.as_bytes().to_vec(), bytes)?;
        let sequence = self.engine.seq();

        self.index_update(row_id, &old, &payload);
        self.replica.update_row(row_id, sequence, payload);
        Ok(())
    }

    /// Deletes a row, removing it from every index and the replica map.
    pub fn delete_row(&self, row_id: Uuid) -> Result<()> {
        let old = self.get_row(row_id)?;
        self.engine.delete(row_id.as_bytes().to_vec())?;
        let sequence = self.engine.seq();

        if let Some(old) = old {
            self.index_remove(row_id, &old);
        }
        self.replica.delete_row(row_id, sequence);
        Ok(())
    }

    /// Reads a row's current payload.
    pub fn get_row(&self, row_id: Uuid) -> Result<Option<Value>> {
        match self.engine.get(row_id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Applies an inbound replication message from a peer, gated on
    /// sequence for idempotence. `INSERT_ROW`/`UPDATE_ROW`/`CLAIM_ROW` all
    /// write the carried payload; `DELETE_ROW` removes it. Messages for a
    /// different `(database, table)` are rejected by the caller before
    /// reaching here (see `node`'s message dispatch).
    pub fn apply_remote(&self, message: &Message) -> Result<()> {
        let Some(row_id) = message.row_id() else {
            return Ok(());
        };
        let Some(sequence) = message.sequence() else {
            return Ok(());
        };
        if !self.replica.should_apply(row_id, sequence) {
            return Ok(());
        }

        match message {
            Message::InsertRow { payload, .. }
            | Message::UpdateRow { payload, .. }
            | Message::ClaimRow { payload, .. } => {
                let old = self.get_row(row_id)?;
                let bytes = serde_json::to_vec(payload)?;
                self.engine.put(row_id.as_bytes().to_vec(), bytes)?;
                match old {
                    Some(old) => self.index_update(row_id, &old, payload),
                    None => self.index_insert(row_id, payload),
                }
            }
            Message::DeleteRow { .. } => {
                let old = self.get_row(row_id)?;
                self.engine.delete(row_id.as_bytes().to_vec())?;
                if let Some(old) = old {
                    self.index_remove(row_id, &old);
                }
            }
            Message::JoinCluster { .. } | Message::Probe { .. } => {}
        }
        Ok(())
    }

    /// Reacts to a peer being declared lost, delegating straight to the
    /// replica directory.
    pub fn handle_peer_lost(&self, lost: &cluster::NodeId) {
        self.replica.handle_peer_lost(lost);
    }

    /// Records one equality-predicate use of `column`, building an index
    /// for it if this crosses `auto_index_threshold` and the table has
    /// capacity (spec.md §4.7's automatic indexing).
    pub fn record_predicate_use(&self, column: &str) -> Result<()> {
        if self.indexes.read().contains_key(column) {
            return Ok(());
        }
        if !self.auto_index.record_use(column) {
            return Ok(());
        }
        if self.indexes.read().len() >= self.auto_index.max_indexes_per_table() {
            tracing::debug!(table = %self.name, column, "auto-index threshold crossed but table is at capacity");
            return Ok(());
        }
        self.build_index(column)
    }

    /// Builds (or rebuilds) an index for `column` by scanning every row
    /// currently in the engine.
    pub fn build_index(&self, column: &str) -> Result<()> {
        let mut index = btree::BTreeIndex::new();
        for (key, value) in self.engine.range(&[], None)? {
            let Ok(row_id) = Uuid::from_slice(&key) else {
                continue;
            };
            let Ok(payload) = serde_json::from_slice::<Value>(&value) else {
                continue;
            };
            if let Some(encoded) = encode_column(&payload, column) {
                index.insert(encoded, row_id);
            }
        }
        self.indexes.write().insert(column.to_string(), index);
        Ok(())
    }

    fn load_indexes(&self) -> Result<()> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Ok(());
        };
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            let Some(column) = file_name
                .strip_prefix("index.")
                .and_then(|s| s.strip_suffix(".file"))
            else {
                continue;
            };
            match btree::BTreeIndex::load(entry.path()) {
                Ok(index) => {
                    self.indexes.write().insert(column.to_string(), index);
                }
                Err(btree::IndexLoadError::Missing) => {}
                Err(e) => {
                    tracing::error!(table = %self.name, column, error = %e, "index corrupt, rebuilding from row store");
                    self.build_index(column)?;
                }
            }
        }
        Ok(())
    }

    fn index_insert(&self, row_id: Uuid, payload: &Value) {
        let mut indexes = self.indexes.write();
        for (column, index) in indexes.iter_mut() {
            if let Some(key) = encode_column(payload, column) {
                index.insert(key, row_id);
            }
        }
    }

    fn index_remove(&self, row_id: Uuid, payload: &Value) {
        let mut indexes = self.indexes.write();
        for (column, index) in indexes.iter_mut() {
            if let Some(key) = encode_column(payload, column) {
                index.remove(&key, row_id);
            }
        }
    }

    fn index_update(&self, row_id: Uuid, old: &Value, new: &Value) {
        let mut indexes = self.indexes.write();
        for (column, index) in indexes.iter_mut() {
            let old_key = encode_column(old, column);
            let new_key = encode_column(new, column);
            match (old_key, new_key) {
                (Some(old_key), Some(new_key)) => index.update(&old_key, new_key, row_id),
                (Some(old_key), None) => index.remove(&old_key, row_id),
                (None, Some(new_key)) => index.insert(new_key, row_id),
                (None, None) => {}
            }
        }
    }

    /// Looks up every row id whose `column` equals `key`, via the
    /// maintained index for that column, if one exists.
    #[must_use]
    pub fn index_point_lookup(&self, column: &str, key: &[u8]) -> Vec<Uuid> {
        self.indexes
            .read()
            .get(column)
            .map(|idx| idx.point_lookup(key).collect())
            .unwrap_or_default()
    }

    /// Every column currently carrying a maintained index.
    #[must_use]
    pub fn indexed_columns(&self) -> Vec<String> {
        self.indexes.read().keys().cloned().collect()
    }

    /// Persists the row store as a full-snapshot framed blob at
    /// `storage.file`, the replica map at `replica.file`, and every
    /// maintained index at `index.<col>.file`, called once per scheduler
    /// tick.
    pub fn persist(&self) -> Result<()> {
        self.persist_storage_snapshot(self.storage_path())?;
        self.replica
            .save(self.replica_path())
            .map_err(|e| StorageError::Other(anyhow::anyhow!(e)))?;
        for (column, index) in self.indexes.read().iter() {
            index.save(self.index_path(column))?;
        }
        Ok(())
    }

    /// Writes the current row set as a framed blob snapshot, per the
    /// on-disk layout's `storage.file`. Not consulted on recovery — the
    /// engine's own WAL/SSTable state is authoritative — but kept so the
    /// file exists on disk exactly as spec.md §6 names it.
    fn persist_storage_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        let rows = self.engine.range(&[], None)?;
        let entries = rows.into_iter().map(|(k, v)| (k, Some(v)));
        blob::write_snapshot(path, STORAGE_MAGIC, STORAGE_VERSION, entries)
            .map_err(|e| StorageError::Other(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Runs at most one compaction pass on this table's engine.
    pub fn maybe_compact(&self) -> Result<bool> {
        Ok(self.engine.maybe_compact()?)
    }

    /// Flushes any pending writes, persists every on-disk snapshot, and
    /// releases the engine's file handles. Called once per table by the
    /// node's shutdown path; idempotent.
    pub fn close(&self) -> Result<()> {
        self.engine.close()?;
        self.persist()
    }
}

/// Implements [`RowSource`] via a weak handle back to the owning [`Table`],
/// breaking what would otherwise be a reference cycle (`Table` owns the
/// `ReplicaDirectory` owns an `Arc<dyn RowSource>` pointing back at the
/// `Table`), per the Design Notes' "cyclic ownership" guidance.
struct WeakRowSource {
    table: std::sync::Weak<Table>,
}

impl RowSource for WeakRowSource {
    fn fetch_row(&self, row_id: Uuid) -> Option<Value> {
        let table = self.table.upgrade()?;
        table.get_row(row_id).ok().flatten()
    }
}
