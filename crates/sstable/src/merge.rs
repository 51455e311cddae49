//! Merge iterator over multiple [`SSTableReader`]s.
//!
//! Produces `(key, ValueEntry)` pairs in ascending key order. When the same
//! key appears in multiple SSTables, only the entry with the **highest
//! sequence number** is emitted (newest wins).
//!
//! This is the core primitive for compaction: walk N input SSTables in sorted
//! order, deduplicate by seq, and write the result to a new SSTable. Each
//! source is read via [`SSTableReader::iter_all`], a full forward scan of the
//! data section — this is deliberate: the sparse index only samples every
//! Nth key, so a merge driven by the index alone would skip entries.

use anyhow::Result;
use memtable::ValueEntry;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::reader::SSTableRangeIter;
use crate::SSTableReader;

/// A pending `(key, entry)` from one source, used for heap-based merge ordering.
struct HeapEntry {
    key: Vec<u8>,
    entry: ValueEntry,
    /// Index into the `sources` array this entry came from.
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.source == other.source
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; we want the *smallest* key first,
        // so reverse the key comparison. On tie, prefer the entry from
        // the source with the lower index (arbitrary but deterministic).
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Merges multiple SSTables into a single sorted stream of `(key, ValueEntry)`.
///
/// Duplicate keys are resolved by keeping only the entry with the highest
/// sequence number. The iterator is lazy — it reads one record at a time from
/// each source's full data-section scan.
pub struct MergeIterator {
    sources: Vec<SSTableRangeIter>,
    heap: BinaryHeap<HeapEntry>,
}

impl MergeIterator {
    /// Creates a new merge iterator over the given SSTable readers.
    ///
    /// Each reader is opened for a full forward scan via
    /// [`SSTableReader::iter_all`], and the first entry from each is pushed
    /// onto a min-heap keyed by `(key, -source_index)`.
    pub fn new(readers: &[SSTableReader]) -> Result<Self> {
        let mut sources: Vec<SSTableRangeIter> = Vec::with_capacity(readers.len());
        let mut heap = BinaryHeap::new();

        for (i, reader) in readers.iter().enumerate() {
            let mut it = reader.iter_all()?;
            if let Some(first) = it.next() {
                let (key, entry) = first?;
                heap.push(HeapEntry {
                    key,
                    entry,
                    source: i,
                });
            }
            sources.push(it);
        }

        Ok(Self { sources, heap })
    }

    /// Returns the next `(key, ValueEntry)` in sorted order, or `None` when
    /// all sources are exhausted.
    ///
    /// Duplicate keys (same key from multiple SSTables) are resolved by
    /// keeping only the entry with the highest sequence number.
    pub fn next_entry(&mut self) -> Result<Option<(Vec<u8>, ValueEntry)>> {
        let top = match self.heap.pop() {
            Some(e) => e,
            None => return Ok(None),
        };

        if let Some(next) = self.sources[top.source].next() {
            let (key, entry) = next?;
            self.heap.push(HeapEntry {
                key,
                entry,
                source: top.source,
            });
        }

        let best_key = top.key;
        let mut best_entry = top.entry;

        // Drain all heap entries with the same key, keeping only the one
        // with the highest seq.
        while let Some(peek) = self.heap.peek() {
            if peek.key != best_key {
                break;
            }
            let dup = self.heap.pop().unwrap();

            if dup.entry.seq > best_entry.seq {
                best_entry = dup.entry;
            }

            if let Some(next) = self.sources[dup.source].next() {
                let (key, entry) = next?;
                self.heap.push(HeapEntry {
                    key,
                    entry,
                    source: dup.source,
                });
            }
        }

        Ok(Some((best_key, best_entry)))
    }

    /// Collects all remaining entries into a `Vec`.
    ///
    /// Useful for testing and for building a merged memtable for compaction.
    pub fn collect_all(&mut self) -> Result<Vec<(Vec<u8>, ValueEntry)>> {
        let mut result = Vec::new();
        while let Some(pair) = self.next_entry()? {
            result.push(pair);
        }
        Ok(result)
    }
}
