use anyhow::{bail, Result};
use bloom::BloomFilter;
use byteorder::{LittleEndian, ReadBytesExt};
use crc32fast::Hasher as Crc32;
use memtable::ValueEntry;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::format::{read_footer_versioned, Footer, SSTableMeta, FOOTER_BYTES_V1};

/// Maximum key size we'll allocate during reads (64 KiB). Prevents OOM on corrupt files.
const MAX_KEY_BYTES: usize = 64 * 1024;
/// Maximum value size we'll allocate during reads (10 MiB). Prevents OOM on corrupt files.
const MAX_VALUE_BYTES: usize = 10 * 1024 * 1024;

/// Reads an SSTable file for point lookups and range scans.
///
/// On [`open`](SSTableReader::open) the **sparse index** is loaded into memory
/// as a `BTreeMap<Vec<u8>, u64>` (every Nth key → data-section byte offset).
/// If the file carries a bloom filter (v2+) it is also loaded for fast
/// negative lookups, and if it carries a META section (v4+) the table's
/// key range, entry count and creation time are loaded too.
///
/// A persistent file handle is kept open for the lifetime of the reader,
/// wrapped in a `Mutex` so that `get` can be called through a shared `&self`
/// reference.
///
/// Point lookups use the sparse index to find the nearest preceding sampled
/// offset, then linear-scan the data section forward from there — one seek
/// plus a bounded scan, instead of a full-file read.
pub struct SSTableReader {
    /// Path to the `.sst` file on disk, reused to open independent handles
    /// for range iteration.
    path: PathBuf,
    /// Sparse (or, for legacy v1-v3 files, full) index: key -> byte offset.
    sparse_index: BTreeMap<Vec<u8>, u64>,
    /// Optional bloom filter (present for v2+ SSTables).
    bloom: Option<BloomFilter>,
    /// Persistent file handle, wrapped in Mutex for interior mutability.
    file: Mutex<BufReader<File>>,
    /// Parsed footer — used to determine version-specific read behaviour
    /// (e.g. whether to verify CRC32 on reads, or to expose max_seq).
    footer: Footer,
    /// Parsed META section (v4+ only).
    meta: Option<SSTableMeta>,
    /// Byte offset where the data section ends (start of META/BLOOM/INDEX,
    /// whichever comes first for this version).
    data_end: u64,
}

impl SSTableReader {
    /// Opens an SSTable file and loads its sparse index (and bloom filter /
    /// meta section, if present) into memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is too small, the magic is unrecognised,
    /// or any I/O operation fails.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_buf = path.as_ref().to_path_buf();
        let mut f = File::open(&path_buf)?;
        let metadata = f.metadata()?;
        let filesize = metadata.len();

        if filesize < FOOTER_BYTES_V1 {
            bail!("sstable file too small");
        }

        let footer = read_footer_versioned(&mut f)?;
        let index_offset = footer.index_offset();

        if index_offset >= filesize {
            bail!("invalid index_offset");
        }

        let footer_size = footer.footer_size();

        let meta = if let Some(meta_offset) = footer.meta_offset() {
            f.seek(SeekFrom::Start(meta_offset))?;
            Some(SSTableMeta::read_from(&mut f)?)
        } else {
            None
        };

        let bloom = if let Some(bloom_offset) = footer.bloom_offset() {
            f.seek(SeekFrom::Start(bloom_offset))?;
            Some(BloomFilter::read_from(&mut f)?)
        } else {
            None
        };

        // The data section ends where the first of (meta, bloom, index) begins.
        let data_end = footer
            .meta_offset()
            .or_else(|| footer.bloom_offset())
            .unwrap_or(index_offset);

        // Read index entries from index_offset up to footer start.
        f.seek(SeekFrom::Start(index_offset))?;
        let mut sparse_index = BTreeMap::new();

        while f.stream_position()? < (filesize - footer_size) {
            let key_len = f.read_u32::<LittleEndian>()? as usize;
            if key_len > MAX_KEY_BYTES {
                bail!(
                    "corrupt index: key_len {} exceeds maximum {}",
                    key_len,
                    MAX_KEY_BYTES
                );
            }
            let mut key = vec![0u8; key_len];
            f.read_exact(&mut key)?;
            let data_offset = f.read_u64::<LittleEndian>()?;
            sparse_index.insert(key, data_offset);
        }

        f.seek(SeekFrom::Start(0))?;

        Ok(Self {
            path: path_buf,
            sparse_index,
            bloom,
            file: Mutex::new(BufReader::new(f)),
            footer,
            meta,
            data_end,
        })
    }

    /// Returns `true` if the bloom filter (when present) says the key
    /// **might** be in this table. Returns `true` unconditionally when no
    /// bloom filter was loaded (legacy v1 files), since then nothing can rule
    /// the key out.
    #[must_use]
    pub fn might_contain(&self, key: &[u8]) -> bool {
        match &self.bloom {
            Some(bf) => bf.may_contain(key),
            None => true,
        }
    }

    /// Finds the byte offset to start a linear scan for `key`: the offset of
    /// the largest indexed key <= `key`, or `0` if `key` precedes every
    /// sampled entry.
    fn floor_offset(&self, key: &[u8]) -> u64 {
        use std::ops::Bound;
        self.sparse_index
            .range::<[u8], _>((Bound::Unbounded, Bound::Included(key)))
            .next_back()
            .map(|(_, &off)| off)
            .unwrap_or(0)
    }

    /// Reads one data-section record at the file's current position.
    ///
    /// Returns `(key, entry, next_offset)`, or `Ok(None)` at `data_end`.
    fn read_record_at<R: Read + Seek>(
        f: &mut R,
        has_crc: bool,
        data_end: u64,
    ) -> Result<Option<(Vec<u8>, ValueEntry)>> {
        let pos = f.stream_position()?;
        if pos >= data_end {
            return Ok(None);
        }

        let stored_crc = if has_crc {
            Some(f.read_u32::<LittleEndian>()?)
        } else {
            None
        };

        let key_len = f.read_u32::<LittleEndian>()? as usize;
        if key_len > MAX_KEY_BYTES {
            bail!(
                "corrupt data: key_len {} exceeds maximum {}",
                key_len,
                MAX_KEY_BYTES
            );
        }
        let mut key_buf = vec![0u8; key_len];
        f.read_exact(&mut key_buf)?;

        let seq = f.read_u64::<LittleEndian>()?;
        let present = f.read_u8()?;
        let value = if present == 1 {
            let val_len = f.read_u32::<LittleEndian>()? as usize;
            if val_len > MAX_VALUE_BYTES {
                bail!(
                    "corrupt data: val_len {} exceeds maximum {}",
                    val_len,
                    MAX_VALUE_BYTES
                );
            }
            let mut val = vec![0u8; val_len];
            f.read_exact(&mut val)?;
            Some(val)
        } else {
            None
        };

        if let Some(expected_crc) = stored_crc {
            let mut hasher = Crc32::new();
            hasher.update(&(key_len as u32).to_le_bytes());
            hasher.update(&key_buf);
            hasher.update(&seq.to_le_bytes());
            hasher.update(&[present]);
            if let Some(ref v) = value {
                hasher.update(&(v.len() as u32).to_le_bytes());
                hasher.update(v);
            }
            let actual_crc = hasher.finalize();
            if actual_crc != expected_crc {
                bail!(
                    "CRC32 mismatch at offset {}: expected {:#010x}, got {:#010x} (data corruption)",
                    pos, expected_crc, actual_crc
                );
            }
        }

        Ok(Some((key_buf, ValueEntry { seq, value })))
    }

    /// Point lookup for a single key.
    ///
    /// If a bloom filter is present, it is checked first. A negative result
    /// means the key is **definitely not** in this SSTable, avoiding the
    /// index lookup and disk I/O entirely. Otherwise the sparse index locates
    /// the nearest preceding sampled offset and the data section is scanned
    /// forward from there until the key is found, exceeded (sorted order
    /// guarantees no further match), or the data section ends.
    ///
    /// Returns `Ok(Some(entry))` if the key exists (possibly a tombstone with
    /// `value: None`). Returns `Ok(None)` if the key is not present.
    pub fn get(&self, key: &[u8]) -> Result<Option<ValueEntry>> {
        if !self.might_contain(key) {
            return Ok(None);
        }

        let has_crc = self.footer.has_checksums();
        let start = self.floor_offset(key);

        let mut f = self
            .file
            .lock()
            .map_err(|e| anyhow::anyhow!("lock poisoned: {}", e))?;
        f.seek(SeekFrom::Start(start))?;

        while let Some((k, entry)) = Self::read_record_at(&mut *f, has_crc, self.data_end)? {
            match k.as_slice().cmp(key) {
                std::cmp::Ordering::Equal => return Ok(Some(entry)),
                std::cmp::Ordering::Greater => return Ok(None),
                std::cmp::Ordering::Less => continue,
            }
        }

        Ok(None)
    }

    /// Returns a streaming iterator over all entries with `lo <= key` and,
    /// if `hi` is given, `key <= hi` (inclusive on both ends), in ascending
    /// order.
    ///
    /// The sparse index is used to seek near `lo`; the data section is then
    /// scanned forward and the iterator stops as soon as a key exceeds `hi`
    /// or the data section ends. Opens its own file handle so it can be used
    /// independently of concurrent `get` calls on the same reader.
    pub fn range(&self, lo: &[u8], hi: Option<&[u8]>) -> Result<SSTableRangeIter> {
        let start = self.floor_offset(lo);
        let mut f = BufReader::new(File::open(&self.path)?);
        f.seek(SeekFrom::Start(start))?;

        Ok(SSTableRangeIter {
            file: f,
            data_end: self.data_end,
            has_crc: self.footer.has_checksums(),
            lo: lo.to_vec(),
            hi: hi.map(|h| h.to_vec()),
            done: false,
        })
    }

    /// Returns a streaming iterator over every entry in the data section, in
    /// ascending key order. Used by compaction's k-way merge, which needs the
    /// full contents regardless of what was sampled into the sparse index.
    pub fn iter_all(&self) -> Result<SSTableRangeIter> {
        let mut f = BufReader::new(File::open(&self.path)?);
        f.seek(SeekFrom::Start(0))?;
        Ok(SSTableRangeIter {
            file: f,
            data_end: self.data_end,
            has_crc: self.footer.has_checksums(),
            lo: Vec::new(),
            hi: None,
            done: false,
        })
    }

    /// Returns the file system path this reader was opened from. Used by the
    /// compactor to open independent reader handles on the same file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `true` if this SSTable has a bloom filter loaded (v2+ format).
    #[must_use]
    pub fn has_bloom(&self) -> bool {
        self.bloom.is_some()
    }

    /// Returns the max sequence number stored in the SSTable footer (v3+).
    ///
    /// For v1/v2 files this returns `None`, and the caller must scan all
    /// keys to determine the max seq (legacy recovery path).
    #[must_use]
    pub fn max_seq(&self) -> Option<u64> {
        self.footer.max_seq()
    }

    /// Returns `true` if this SSTable has per-record CRC32 checksums (v3+).
    #[must_use]
    pub fn has_checksums(&self) -> bool {
        self.footer.has_checksums()
    }

    /// Returns the parsed META section (v4+ only): entry count, key range,
    /// creation time and format version.
    #[must_use]
    pub fn meta(&self) -> Option<&SSTableMeta> {
        self.meta.as_ref()
    }

    /// Returns the number of entries in the in-memory (sparse) index. For
    /// legacy v1-v3 files this equals the true entry count; for v4 files it
    /// undercounts by the sampling factor — use
    /// [`meta`](SSTableReader::meta)`().entry_count` for the exact count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.meta
            .as_ref()
            .map(|m| m.entry_count as usize)
            .unwrap_or(self.sparse_index.len())
    }

    /// Returns `true` if the SSTable contains zero entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns an iterator over the keys present in the in-memory index.
    ///
    /// For v4 tables this yields only the sparsely sampled keys, not every
    /// key in the table — use [`iter_all`](SSTableReader::iter_all) or
    /// [`range`](SSTableReader::range) to see every entry.
    pub fn keys(&self) -> impl Iterator<Item = &[u8]> {
        self.sparse_index.keys().map(|k| k.as_slice())
    }
}

/// Streaming forward scan over an SSTable's data section, bounded by an
/// optional upper key and the data section's end offset.
///
/// Returned by [`SSTableReader::range`] and [`SSTableReader::iter_all`]. Owns
/// an independent file handle so it does not contend with the reader's
/// shared lock used by `get`.
pub struct SSTableRangeIter {
    file: BufReader<File>,
    data_end: u64,
    has_crc: bool,
    lo: Vec<u8>,
    hi: Option<Vec<u8>>,
    done: bool,
}

impl Iterator for SSTableRangeIter {
    type Item = Result<(Vec<u8>, ValueEntry)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            match SSTableReader::read_record_at(&mut self.file, self.has_crc, self.data_end) {
                Ok(Some((key, entry))) => {
                    if key.as_slice() < self.lo.as_slice() {
                        continue;
                    }
                    if let Some(hi) = &self.hi {
                        if key.as_slice() > hi.as_slice() {
                            self.done = true;
                            return None;
                        }
                    }
                    return Some(Ok((key, entry)));
                }
                Ok(None) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
