//! # Memtable
//!
//! An in-memory, sorted, mutable write buffer for the LSM storage engine.
//!
//! The memtable is the first point of contact for every write operation. It buffers
//! recent `PUT` and `DELETE` operations in a sorted structure (`BTreeMap`) before
//! they are flushed to immutable on-disk SSTables.
//!
//! ## Key properties
//! - **Sorted order**: entries are always in ascending key order (required for SSTable flush).
//! - **Sequence-number gated**: stale writes (lower sequence number) are silently rejected.
//! - **Tombstone support**: deletes are recorded as `ValueEntry { value: None }` markers.
//! - **Size tracking**: tracks the byte size of keys + values plus a per-entry overhead
//!   constant, for flush threshold decisions.
//! - **Sealed state**: once sealed, a memtable becomes immutable and rejects further
//!   mutation; this is how the engine hands a memtable off to the flush path while
//!   new writes continue into a fresh active memtable.
//!
//! ## Example
//! ```rust
//! use memtable::Memtable;
//!
//! let mut m = Memtable::new();
//! m.put(b"hello".to_vec(), b"world".to_vec(), 1).unwrap();
//! assert_eq!(m.get(b"hello").unwrap().1, b"world".to_vec());
//!
//! m.delete(b"hello".to_vec(), 2).unwrap();
//! assert!(m.get(b"hello").is_none());
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

/// Fixed per-entry overhead charged against `size_bytes()`, approximating the
/// cost of a `BTreeMap` node (key/value pointers, tree metadata) beyond the
/// raw key and value byte lengths.
pub const ENTRY_OVERHEAD_BYTES: usize = 48;

/// Errors returned by mutating operations on a [`Memtable`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemtableError {
    /// The memtable has been sealed and no longer accepts writes.
    #[error("memtable is sealed")]
    Sealed,
}

/// A single entry in the memtable, pairing a sequence number with an optional value.
///
/// - `value == Some(bytes)` — the key holds a live value.
/// - `value == None` — the key has been deleted (tombstone).
///
/// Tombstones are retained in the memtable and flushed to SSTables so that
/// older values in lower levels are correctly shadowed during reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueEntry {
    /// Monotonically increasing sequence number assigned at write time.
    pub seq: u64,
    /// `Some(bytes)` for live values, `None` for tombstones (deletes).
    pub value: Option<Vec<u8>>,
}

/// An ordered, in-memory write buffer backed by a `BTreeMap`.
///
/// The memtable tracks a byte size estimate (keys + values + per-entry
/// overhead) so the engine can decide when to flush to an SSTable. Sequence
/// numbers gate every mutation: a write with a sequence number <= the
/// existing entry's sequence is silently dropped, ensuring consistency during
/// WAL replay and concurrent recovery.
///
/// A memtable starts `Active`. Calling [`seal`](Memtable::seal) transitions it
/// to sealed: further `put`/`delete` calls return `MemtableError::Sealed`
/// instead of mutating. This models the engine's `Active -> Sealed -> Flushing
/// -> Persisted` lifecycle — the sealed flag is the boundary past which the
/// memtable is treated as immutable and safe to flush from a background
/// thread while a new active memtable takes over incoming writes.
#[derive(Debug)]
pub struct Memtable {
    map: BTreeMap<Vec<u8>, ValueEntry>,
    size_bytes: usize,
    sealed: AtomicBool,
}

impl Memtable {
    /// Creates a new, empty, active memtable.
    pub fn new() -> Self {
        Self {
            map: BTreeMap::new(),
            size_bytes: 0,
            sealed: AtomicBool::new(false),
        }
    }

    /// Returns `true` once [`seal`](Memtable::seal) has been called.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Transitions the memtable to sealed. Idempotent — calling it more than
    /// once has no further effect.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    /// Inserts a key-value pair with the given sequence number.
    ///
    /// If the key already exists with a **newer or equal** sequence number, the
    /// write is silently ignored (stale-write protection). Otherwise the old
    /// entry is replaced and `size_bytes` is adjusted accordingly.
    ///
    /// Returns `Err(MemtableError::Sealed)` if the memtable has been sealed.
    ///
    /// # Arguments
    ///
    /// * `key` - the lookup key (ownership transferred to the memtable).
    /// * `value` - the payload bytes (ownership transferred).
    /// * `seq` - monotonically increasing sequence number.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>, seq: u64) -> Result<(), MemtableError> {
        if self.is_sealed() {
            return Err(MemtableError::Sealed);
        }

        match self.map.get(&key) {
            Some(old) if old.seq >= seq => {
                // stale or equal write, ignore
                return Ok(());
            }
            Some(old) => {
                // Replace existing entry: remove old value bytes from size_bytes if present.
                if let Some(ref ov) = old.value {
                    self.size_bytes = self.size_bytes.saturating_sub(ov.len());
                }
                // Key bytes and overhead already counted; do not subtract them here.
            }
            None => {
                // New key: count key bytes plus fixed per-entry overhead
                self.size_bytes = self
                    .size_bytes
                    .saturating_add(key.len())
                    .saturating_add(ENTRY_OVERHEAD_BYTES);
            }
        }

        // Add new value bytes
        self.size_bytes = self.size_bytes.saturating_add(value.len());

        self.map.insert(
            key,
            ValueEntry {
                seq,
                value: Some(value),
            },
        );
        Ok(())
    }

    /// Records a tombstone (delete marker) for the given key.
    ///
    /// A tombstone is stored as `ValueEntry { seq, value: None }`. It shadows
    /// any older value both in the memtable and in SSTables during reads.
    ///
    /// Stale-write protection applies: if the key already has a newer or equal
    /// sequence number, the delete is silently ignored.
    ///
    /// Returns `Err(MemtableError::Sealed)` if the memtable has been sealed.
    pub fn delete(&mut self, key: Vec<u8>, seq: u64) -> Result<(), MemtableError> {
        if self.is_sealed() {
            return Err(MemtableError::Sealed);
        }

        match self.map.get(&key) {
            Some(old) if old.seq >= seq => {
                // existing newer or equal entry; ignore
                return Ok(());
            }
            Some(old) => {
                // If there was a live value, subtract its size (key stays counted)
                if let Some(ref ov) = old.value {
                    self.size_bytes = self.size_bytes.saturating_sub(ov.len());
                }
                // Leave key bytes and overhead counted (charged when the key first appeared)
            }
            None => {
                // New tombstone for a key we haven't seen — count key bytes + overhead
                self.size_bytes = self
                    .size_bytes
                    .saturating_add(key.len())
                    .saturating_add(ENTRY_OVERHEAD_BYTES);
            }
        }

        self.map.insert(key, ValueEntry { seq, value: None });
        Ok(())
    }

    /// Returns a borrowed reference to the value for the given key if it exists
    /// and is **not** a tombstone.
    ///
    /// Returns `Some((seq, value_bytes))` for live entries, `None` for missing
    /// keys or tombstones. Callers should `.clone()` only when ownership is needed.
    ///
    /// **Prefer [`get_entry`](Memtable::get_entry)** when you need to distinguish
    /// between "key not found" and "key was deleted" (tombstone).
    pub fn get(&self, key: &[u8]) -> Option<(u64, &[u8])> {
        self.map
            .get(key)
            .and_then(|e| e.value.as_deref().map(|v| (e.seq, v)))
    }

    /// Returns an iterator over all entries in **ascending key order**.
    ///
    /// This includes tombstones. The ordering guarantee is provided by the
    /// underlying `BTreeMap` and is required for correct SSTable flush.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &ValueEntry)> {
        self.map.iter().map(|(k, v)| (k.as_slice(), v))
    }

    /// Returns the number of entries (including tombstones).
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns the estimated byte size of all keys, values, and per-entry
    /// overhead stored.
    ///
    /// This is used by the engine to decide when to flush the memtable to an
    /// SSTable. The size tracks key bytes + value bytes + `ENTRY_OVERHEAD_BYTES`
    /// per live entry, approximating `BTreeMap` node cost.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Returns `true` if the memtable contains zero entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns the raw [`ValueEntry`] for the given key, if present.
    ///
    /// Unlike [`get`], this does **not** filter out tombstones. The engine uses
    /// this to distinguish between "key not found" (returns `None`) and
    /// "key was deleted" (returns `Some(ValueEntry { value: None })`).
    pub fn get_entry(&self, key: &[u8]) -> Option<&ValueEntry> {
        self.map.get(key)
    }

    /// Returns `true` if the memtable contains the given key (including tombstones).
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.map.contains_key(key)
    }

    /// Removes all entries and resets `size_bytes` to zero.
    ///
    /// This is semantically equivalent to replacing the memtable with
    /// `Memtable::new()`, but reuses the existing allocations. Does not affect
    /// the sealed flag.
    pub fn clear(&mut self) {
        self.map.clear();
        self.size_bytes = 0;
    }
}

impl Default for Memtable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests;
