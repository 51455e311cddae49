use anyhow::Result;
use bloom::BloomFilter;
use byteorder::{LittleEndian, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use memtable::{Memtable, ValueEntry};
use std::fs::{rename, OpenOptions};
use std::io::{BufWriter, Seek, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::format::{write_footer_v4, SSTableMeta};

/// Current on-disk format version written into [`SSTableMeta::format_version`].
const CURRENT_FORMAT_VERSION: u32 = 4;

/// Default bloom filter false positive rate (1%).
const BLOOM_FPR: f64 = 0.01;

/// Default sparse-index sampling interval: every Nth key gets an index entry.
pub const DEFAULT_INDEX_INTERVAL: usize = 16;

/// Tuning knobs for [`SSTableWriter`]. `Default` matches the engine's
/// standard flush/compaction settings.
#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    /// Sample every Nth key into the sparse index. `1` recovers a full index.
    pub index_interval: usize,
    /// Target bloom filter false-positive rate.
    pub bloom_fpr: f64,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            index_interval: DEFAULT_INDEX_INTERVAL,
            bloom_fpr: BLOOM_FPR,
        }
    }
}

/// Writes a [`Memtable`] to disk as an immutable SSTable file.
///
/// The writer is stateless — all work happens inside the static methods. The
/// write is crash-safe: data is first written to a temporary file, fsynced,
/// and then atomically renamed to the final path.
pub struct SSTableWriter {}

impl SSTableWriter {
    /// Flushes `mem` to a new SSTable file at `path` using default write options.
    ///
    /// # File Layout (v4)
    ///
    /// ```text
    /// [DATA]  repeated: crc32(u32) | key_len(u32) | key | seq(u64) | present(u8) | [val_len(u32) | val]
    /// [META]  format_version(u32) | created_at(u64) | entry_count(u64) | min_key | max_key
    /// [BLOOM] serialized BloomFilter (num_bits + num_hashes + bits)
    /// [INDEX] sparse, repeated: key_len(u32) | key | data_offset(u64)
    /// [FOOTER] max_seq(u64) | meta_offset(u64) | bloom_offset(u64) | index_offset(u64) | magic(u32 = "SST4")
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error if the memtable is empty or on any I/O failure.
    pub fn write_from_memtable(path: &Path, mem: &Memtable) -> Result<()> {
        Self::write_from_memtable_with_options(path, mem, WriteOptions::default())
    }

    /// Like [`write_from_memtable`](Self::write_from_memtable) with explicit
    /// [`WriteOptions`].
    pub fn write_from_memtable_with_options(
        path: &Path,
        mem: &Memtable,
        opts: WriteOptions,
    ) -> Result<()> {
        if mem.is_empty() {
            anyhow::bail!("refusing to write an empty SSTable (empty memtable)");
        }
        let iter = mem.iter().map(|(k, v)| (k.to_vec(), v.clone()));
        Self::write_internal(path, mem.len(), iter, opts)
    }

    /// Writes an SSTable from an iterator of `(key, ValueEntry)` pairs, using
    /// default write options.
    ///
    /// This is the **streaming compaction** entry point. Unlike
    /// [`write_from_memtable`](SSTableWriter::write_from_memtable), this method
    /// does not require the entire dataset to be materialized in a `Memtable`.
    ///
    /// # Arguments
    ///
    /// * `path` – destination `.sst` file path.
    /// * `expected_count` – estimated number of entries (used to size the bloom
    ///   filter). Over-estimating is safe; under-estimating increases FPR.
    /// * `iter` – an iterator yielding `(key, ValueEntry)` in **sorted key
    ///   order** (ascending). The caller is responsible for deduplication.
    ///
    /// # Errors
    ///
    /// Returns an error if the iterator yields zero entries or on I/O failure.
    pub fn write_from_iterator<I>(path: &Path, expected_count: usize, iter: I) -> Result<()>
    where
        I: Iterator<Item = (Vec<u8>, ValueEntry)>,
    {
        Self::write_internal(path, expected_count.max(1), iter, WriteOptions::default())
    }

    /// Like [`write_from_iterator`](Self::write_from_iterator) with explicit
    /// [`WriteOptions`]. Used by the compactor, which may choose a coarser
    /// index interval for large merged tables.
    pub fn write_from_iterator_with_options<I>(
        path: &Path,
        expected_count: usize,
        iter: I,
        opts: WriteOptions,
    ) -> Result<()>
    where
        I: Iterator<Item = (Vec<u8>, ValueEntry)>,
    {
        Self::write_internal(path, expected_count.max(1), iter, opts)
    }

    /// Internal write implementation shared by all public entry points.
    ///
    /// Accepts any iterator of `(Vec<u8>, ValueEntry)` pairs. The iterator
    /// must yield entries in ascending key order.
    fn write_internal<I>(
        path: &Path,
        expected_count: usize,
        iter: I,
        opts: WriteOptions,
    ) -> Result<()>
    where
        I: Iterator<Item = (Vec<u8>, ValueEntry)>,
    {
        let index_interval = opts.index_interval.max(1);

        // Create temporary file next to target for atomic rename later
        let tmp_path = path.with_extension("sst.tmp");
        let raw_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        let mut file = BufWriter::new(raw_file);

        // Build bloom filter from all keys
        let mut bloom = BloomFilter::new(expected_count.max(1), opts.bloom_fpr);

        // Sparse in-memory index: (key, offset), sampled every `index_interval` entries.
        let mut index: Vec<(Vec<u8>, u64)> = Vec::new();

        let mut max_seq: u64 = 0;
        let mut entry_count: u64 = 0;
        let mut min_key: Option<Vec<u8>> = None;
        let mut max_key: Option<Vec<u8>> = None;

        // Reusable buffer for computing per-record CRC32 checksums.
        let mut record_buf: Vec<u8> = Vec::with_capacity(256);

        // Write DATA section
        for (key, entry) in iter {
            max_seq = max_seq.max(entry.seq);

            record_buf.clear();
            record_buf.write_u32::<LittleEndian>(key.len() as u32)?;
            record_buf.extend_from_slice(&key);
            record_buf.write_u64::<LittleEndian>(entry.seq)?;
            match &entry.value {
                Some(v) => {
                    record_buf.write_u8(1)?;
                    record_buf.write_u32::<LittleEndian>(v.len() as u32)?;
                    record_buf.extend_from_slice(v);
                }
                None => {
                    record_buf.write_u8(0)?;
                }
            }

            let mut hasher = Crc32::new();
            hasher.update(&record_buf);
            let crc = hasher.finalize();

            let offset = file.stream_position()?;
            file.write_u32::<LittleEndian>(crc)?;
            file.write_all(&record_buf)?;

            bloom.insert(&key);

            if min_key.is_none() {
                min_key = Some(key.clone());
            }
            max_key = Some(key.clone());

            if entry_count as usize % index_interval == 0 {
                index.push((key, offset));
            }
            entry_count += 1;
        }

        if entry_count == 0 {
            // Clean up the temp file and bail — nothing to write.
            drop(file);
            let _ = std::fs::remove_file(&tmp_path);
            anyhow::bail!("refusing to write an empty SSTable (no entries)");
        }

        // Write META section
        let meta_offset = file.stream_position()?;
        let meta = SSTableMeta {
            format_version: CURRENT_FORMAT_VERSION,
            created_at: now_millis(),
            entry_count,
            min_key: min_key.unwrap(),
            max_key: max_key.unwrap(),
        };
        meta.write_to(&mut file)?;

        // Write BLOOM section
        let bloom_offset = file.stream_position()?;
        bloom.write_to(&mut file)?;

        // Write INDEX section
        let index_offset = file.stream_position()?;
        for (key, data_offset) in &index {
            file.write_u32::<LittleEndian>(key.len() as u32)?;
            file.write_all(key)?;
            file.write_u64::<LittleEndian>(*data_offset)?;
        }

        // Write v4 FOOTER
        write_footer_v4(&mut file, max_seq, meta_offset, bloom_offset, index_offset)?;

        // Flush BufWriter, then sync the underlying file
        file.flush()?;
        file.into_inner()?.sync_all()?;

        // Atomically move into place
        rename(&tmp_path, path)?;

        // Fsync the parent directory to ensure the rename is durable.
        // On NTFS this is a no-op (metadata is journaled), but on ext4/XFS
        // a crash after rename but before dir sync can lose the entry.
        if let Some(parent) = path.parent() {
            if let Ok(dir) = std::fs::File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        Ok(())
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
