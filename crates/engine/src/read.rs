//! Read path: `get` and `range`.
//!
//! Both walk the same three layers, newest data first: the active memtable,
//! then the immutable queue (newest-sealed-first), then the SSTable list
//! (newest-flushed-first). The first layer holding a key wins, including a
//! tombstone, which shadows anything older without being returned to the
//! caller.

use crate::{Engine, EngineError, Result};
use memtable::ValueEntry;
use std::collections::BTreeMap;

impl Engine {
    /// Looks up `key`, returning its current value or `None` if absent or
    /// deleted.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if self.is_unrecoverable() {
            return Err(EngineError::UnrecoverableTable);
        }

        {
            let w = self.write.lock();
            if let Some(entry) = w.mem.get_entry(key) {
                return Ok(entry.value.clone());
            }
        }

        {
            let queue = self.immutable.lock();
            for sealed in queue.iter().rev() {
                if let Some(entry) = sealed.mem.get_entry(key) {
                    return Ok(entry.value.clone());
                }
            }
        }

        let snapshot = self.sstables.read().clone();
        for (_, reader) in snapshot.iter() {
            match reader.get(key) {
                Ok(Some(entry)) => return Ok(entry.value),
                Ok(None) => continue,
                Err(e) => {
                    self.mark_unrecoverable();
                    return Err(EngineError::Other(e));
                }
            }
        }

        Ok(None)
    }

    /// Returns all live (non-tombstone) key-value pairs with `lo <= key` and,
    /// if `hi` is given, `key <= hi`, merged across every layer with
    /// newest-sequence-wins semantics.
    ///
    /// Unlike [`get`](Engine::get), this reads every SSTable's data section
    /// via [`sstable::SSTableReader::range`] rather than the sparse index
    /// alone, since the sparse index only samples every Nth key.
    pub fn range(&self, lo: &[u8], hi: Option<&[u8]>) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        if self.is_unrecoverable() {
            return Err(EngineError::UnrecoverableTable);
        }

        // Oldest layers applied first, newest last, so a later `insert`
        // always overwrites an older value for the same key.
        let mut merged: BTreeMap<Vec<u8>, ValueEntry> = BTreeMap::new();

        let snapshot = self.sstables.read().clone();
        for (_, reader) in snapshot.iter().rev() {
            let iter = reader.range(lo, hi).map_err(|e| {
                self.mark_unrecoverable();
                EngineError::Other(e)
            })?;
            for item in iter {
                let (key, entry) = item.map_err(|e| {
                    self.mark_unrecoverable();
                    EngineError::Other(e)
                })?;
                merged.insert(key, entry);
            }
        }

        {
            let queue = self.immutable.lock();
            for sealed in queue.iter() {
                apply_memtable_range(&sealed.mem, lo, hi, &mut merged);
            }
        }

        {
            let w = self.write.lock();
            apply_memtable_range(&w.mem, lo, hi, &mut merged);
        }

        Ok(merged
            .into_iter()
            .filter_map(|(k, entry)| entry.value.map(|v| (k, v)))
            .collect())
    }
}

fn apply_memtable_range(
    mem: &memtable::Memtable,
    lo: &[u8],
    hi: Option<&[u8]>,
    merged: &mut BTreeMap<Vec<u8>, ValueEntry>,
) {
    for (key, entry) in mem.iter() {
        if key < lo {
            continue;
        }
        if let Some(hi) = hi {
            if key > hi {
                continue;
            }
        }
        merged.insert(key.to_vec(), entry.clone());
    }
}
