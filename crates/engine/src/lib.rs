//! # Engine — per-(database, table) LSM storage engine
//!
//! Coordinates the [`memtable`], [`wal`], [`sstable`] and [`compaction`]
//! crates into the read/write contract one table's storage is built from:
//! `put`, `delete`, `get`, `range`, `flush`, `close`.
//!
//! ## Layers, newest first
//!
//! ```text
//! active memtable          <- freshest, mutated under `write`
//! immutable memtable queue <- sealed, awaiting/undergoing flush
//! sstables                 <- persisted, newest-first
//! ```
//!
//! ## Memtable lifecycle
//!
//! `Active -> Sealed -> Flushing -> Persisted -> (dropped)`. A memtable is
//! sealed the instant it crosses `flush_threshold_bytes` (or when `flush()`
//! is called explicitly) and handed to the immutable queue; a fresh active
//! memtable and a fresh WAL segment take over incoming writes immediately.
//! Only one memtable is being flushed at a time — a single background
//! worker drains the queue in FIFO order, the same single-flight idiom the
//! storage scheduler uses at a coarser granularity.
//!
//! ## Concurrency
//!
//! One mutex (`write`) covers WAL append, active-memtable mutation and
//! sequence-number increment, so writers are totally ordered. The SSTable
//! list is a `RwLock<Vec<_>>`: readers take a cheap snapshot and proceed
//! without blocking writers or the flush/compaction worker. Lock order is
//! always write-mutex -> sstable list -> file descriptors, matching the
//! rest of the node.
//!
//! ## Crash safety
//!
//! Every write is appended to the WAL before the in-memory mutation. A WAL
//! segment is only deleted after the memtable it covers has been durably
//! flushed to an SSTable and the manifest updated. SSTables and the
//! manifest are both written via temp-file-then-rename. `.sst.tmp` debris
//! from an interrupted flush or compaction is swept on [`Engine::open`].

mod compact;
mod error;
mod manifest;
mod read;
mod recovery;
mod write;

use config::EngineConfig;
use memtable::Memtable;
use parking_lot::{Condvar, Mutex, RwLock};
use sstable::SSTableReader;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use wal::WalWriter;

pub use error::{EngineError, Result};
pub use manifest::Manifest;
pub use recovery::{recover, replay_wal_and_build, RecoveredState};

/// Maximum allowed key size in bytes (64 KiB).
pub const MAX_KEY_SIZE: usize = 64 * 1024;
/// Maximum allowed value size in bytes (10 MiB).
pub const MAX_VALUE_SIZE: usize = 10 * 1024 * 1024;

/// Builds the on-disk filename for SSTable `id`, matching the convention the
/// `compaction` crate uses for its merged outputs.
pub(crate) fn sst_filename(id: u64) -> String {
    format!("sst-{:020}.sst", id)
}

/// Builds the on-disk filename for WAL segment `id`.
pub(crate) fn wal_filename(id: u64) -> String {
    format!("wal-{:020}.log", id)
}

/// One sealed memtable sitting in the immutable queue, tagged with the WAL
/// segment id that still covers it (only deleted once this memtable is
/// durably flushed).
pub(crate) struct Sealed {
    pub wal_id: u64,
    pub mem: Arc<Memtable>,
}

/// State mutated only while holding [`Engine::write`].
pub(crate) struct WriteState {
    pub mem: Memtable,
    pub wal: WalWriter,
    pub wal_id: u64,
    pub seq: u64,
}

/// The per-(database, table) LSM storage engine.
///
/// Always constructed behind an `Arc` ([`Engine::open`] returns one) so it
/// can be shared with the background flush worker, the storage scheduler,
/// and the replica directory without the caller having to manage threading.
pub struct Engine {
    wal_dir: PathBuf,
    sst_dir: PathBuf,
    config: EngineConfig,

    write: Mutex<WriteState>,

    immutable: Mutex<VecDeque<Sealed>>,
    drained: Condvar,

    flushing: AtomicBool,
    unrecoverable: AtomicBool,

    sstables: RwLock<Vec<(u64, Arc<SSTableReader>)>>,
    manifest: Mutex<Manifest>,

    next_sst_id: AtomicU64,
    next_wal_id: AtomicU64,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("wal_dir", &self.wal_dir)
            .field("sst_dir", &self.sst_dir)
            .field("sstable_count", &self.sstables.read().len())
            .field("immutable_queue_len", &self.immutable.lock().len())
            .field("flushing", &self.flushing.load(Ordering::Relaxed))
            .field("unrecoverable", &self.unrecoverable.load(Ordering::Relaxed))
            .finish()
    }
}

impl Engine {
    /// Opens (and, if necessary, recovers) the engine rooted at `wal_dir`
    /// and `sst_dir`.
    ///
    /// Recovery order: sweep `.sst.tmp` debris, replay surviving WAL
    /// segments in ascending id order into a single combined memtable,
    /// load manifest-tracked SSTables, and adopt `max(WAL seq, SSTable
    /// max_seq)` as the sequence counter — the table is writable the
    /// instant this returns.
    pub fn open<P1: AsRef<Path>, P2: AsRef<Path>>(
        wal_dir: P1,
        sst_dir: P2,
        config: EngineConfig,
    ) -> anyhow::Result<Arc<Self>> {
        let wal_dir = wal_dir.as_ref().to_path_buf();
        let sst_dir = sst_dir.as_ref().to_path_buf();

        let recovered = recovery::recover(&wal_dir, &sst_dir)?;

        let wal_id = recovered.next_file_id;
        let wal_writer = WalWriter::create(
            wal_dir.join(wal_filename(wal_id)),
            durability_for(config.durability),
        )?;

        let sstables: Vec<(u64, Arc<SSTableReader>)> = recovered
            .sstables
            .into_iter()
            .rev() // recover() returns oldest-first; engine keeps newest-first
            .map(|(id, reader)| (id, Arc::new(reader)))
            .collect();

        let engine = Self {
            wal_dir,
            sst_dir,
            next_sst_id: AtomicU64::new(recovered.next_file_id),
            next_wal_id: AtomicU64::new(wal_id + 1),
            write: Mutex::new(WriteState {
                mem: recovered.mem,
                wal: wal_writer,
                wal_id,
                seq: recovered.max_seq,
            }),
            immutable: Mutex::new(VecDeque::new()),
            drained: Condvar::new(),
            flushing: AtomicBool::new(false),
            unrecoverable: AtomicBool::new(false),
            sstables: RwLock::new(sstables),
            manifest: Mutex::new(recovered.manifest),
            config,
        };

        Ok(Arc::new(engine))
    }

    /// Returns the current monotonic sequence number.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.write.lock().seq
    }

    /// Returns the number of SSTables currently backing this engine.
    #[must_use]
    pub fn sstable_count(&self) -> usize {
        self.sstables.read().len()
    }

    /// Returns the number of sealed memtables awaiting or undergoing flush.
    #[must_use]
    pub fn immutable_queue_len(&self) -> usize {
        self.immutable.lock().len()
    }

    /// Returns `true` once the engine has refused writes due to detected
    /// corruption (a WAL CRC mismatch or a bad SSTable footer).
    #[must_use]
    pub fn is_unrecoverable(&self) -> bool {
        self.unrecoverable.load(Ordering::Acquire)
    }

    pub(crate) fn mark_unrecoverable(&self) {
        self.unrecoverable.store(true, Ordering::Release);
    }

    pub(crate) fn config(&self) -> &EngineConfig {
        &self.config
    }
}

/// Converts the `serde`-friendly [`config::DurabilityMode`] into the `wal`
/// crate's runtime [`wal::Durability`].
pub(crate) fn durability_for(mode: config::DurabilityMode) -> wal::Durability {
    match mode {
        config::DurabilityMode::Sync => wal::Durability::Sync,
        config::DurabilityMode::Group { interval } => wal::Durability::Group { interval },
        config::DurabilityMode::Lazy => wal::Durability::Lazy,
    }
}

/// Best-effort flush on drop: any data still sitting in the active memtable
/// is sealed and handed to the flush worker so it isn't lost, but since
/// `Drop` cannot propagate errors the WAL remains the durability backstop —
/// an incomplete flush here is still replayed on the next [`Engine::open`].
impl Drop for Engine {
    fn drop(&mut self) {
        let mut w = self.write.lock();
        if w.mem.is_empty() {
            return;
        }
        w.mem.seal();
        let sealed = std::mem::replace(&mut w.mem, Memtable::new());
        drop(w);
        let _ = self.flush_memtable_to_sstable(&sealed);
    }
}

#[cfg(test)]
mod tests;
