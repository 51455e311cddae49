/// WAL replay and SSTable recovery logic.
///
/// Handles the cold-start path: replaying every WAL segment (one per memtable
/// generation) into a fresh memtable, loading existing SSTables from the
/// manifest, and cleaning up `.sst.tmp` files left behind by a flush or
/// compaction that crashed mid-write.
use anyhow::Result;
use memtable::Memtable;
use std::path::Path;
use wal::{WalReader, WalRecord};

use crate::manifest::Manifest;
use crate::SSTableReader;

/// Replays a single WAL file into the given memtable, returning the highest
/// sequence number encountered. Returns `Ok(0)` if the file does not exist.
pub fn replay_wal_and_build<P: AsRef<Path>>(path: P, mem: &mut Memtable) -> Result<u64> {
    match WalReader::open(path.as_ref()) {
        Ok(mut reader) => {
            let mut max_seq = 0u64;

            reader.replay(|r| match r {
                WalRecord::Put {
                    seq, key, value, ..
                } => {
                    let _ = mem.put(key, value, seq);
                    max_seq = max_seq.max(seq);
                }
                WalRecord::Del { seq, key, .. } => {
                    let _ = mem.delete(key, seq);
                    max_seq = max_seq.max(seq);
                }
            })?;

            Ok(max_seq)
        }
        Err(e) => {
            if matches!(e, wal::WalError::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
            {
                Ok(0)
            } else {
                Err(anyhow::anyhow!(e).context("failed to open WAL for replay"))
            }
        }
    }
}

/// Recovered engine state built from disk: memtable contents, the live
/// SSTable readers (oldest→newest by id), the manifest, and the watermark
/// sequence number.
pub struct RecoveredState {
    pub mem: Memtable,
    pub sstables: Vec<(u64, SSTableReader)>,
    pub manifest: Manifest,
    pub max_seq: u64,
    pub next_file_id: u64,
}

/// Extracts the max sequence number from an SSTable reader.
///
/// Uses the v3+ footer's `max_seq` for O(1) access. Falls back to a full
/// forward scan (`iter_all`) for legacy v1/v2 files, since their sparse (or
/// in this teacher's case, non-sparse) index alone does not carry it.
pub(crate) fn reader_max_seq(reader: &SSTableReader) -> u64 {
    if let Some(seq) = reader.max_seq() {
        return seq;
    }
    let mut max = 0u64;
    if let Ok(iter) = reader.iter_all() {
        for entry in iter.flatten() {
            max = max.max(entry.1.seq);
        }
    }
    max
}

/// Cleans up leftover `.sst.tmp` files from interrupted flushes or compactions.
pub(crate) fn cleanup_tmp_files(sst_dir: &Path) {
    if let Ok(entries) = std::fs::read_dir(sst_dir) {
        for entry in entries.flatten() {
            let p = entry.path();
            if let Some(name) = p.file_name().and_then(|n| n.to_str()) {
                if name.ends_with(".sst.tmp") {
                    let _ = std::fs::remove_file(&p);
                }
            }
        }
    }
}

/// Loads the full engine state from `wal_dir`/`sst_dir`: replays every WAL
/// segment in ascending generation order, loads SSTables named by the
/// manifest, and determines the next free file id for both WAL segments and
/// SSTables.
pub fn recover(wal_dir: &Path, sst_dir: &Path) -> Result<RecoveredState> {
    std::fs::create_dir_all(wal_dir)?;
    std::fs::create_dir_all(sst_dir)?;
    cleanup_tmp_files(sst_dir);

    // WAL segments are named `wal-<id>.log`; replay them in ascending id
    // order so sequence numbers are applied in the order they were
    // originally written.
    let mut wal_ids: Vec<u64> = std::fs::read_dir(wal_dir)?
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            e.path()
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.strip_prefix("wal-"))
                .and_then(|s| s.parse::<u64>().ok())
        })
        .collect();
    wal_ids.sort_unstable();

    let mut mem = Memtable::new();
    let mut max_seq = 0u64;
    for id in &wal_ids {
        let path = wal_dir.join(crate::wal_filename(*id));
        let seq = replay_wal_and_build(&path, &mut mem)?;
        max_seq = max_seq.max(seq);
    }

    let mut manifest = Manifest::load_or_create(sst_dir)?;
    let mut sstables = Vec::new();
    let mut max_file_id = 0u64;

    if !manifest.ids.is_empty() {
        // Oldest first for get()'s newest-first search: manifest stores
        // newest-first, so load in reverse to build oldest→newest.
        for &id in manifest.ids.iter().rev() {
            let path = sst_dir.join(crate::sst_filename(id));
            if path.exists() {
                let reader = SSTableReader::open(&path)?;
                max_seq = max_seq.max(reader_max_seq(&reader));
                max_file_id = max_file_id.max(id);
                sstables.push((id, reader));
            }
        }
    } else {
        // No manifest yet: scan the directory for `sst-<id>.sst` files
        // (fresh DB, or pre-manifest upgrade) and bootstrap the manifest.
        let mut found: Vec<(u64, std::path::PathBuf)> = std::fs::read_dir(sst_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|e| e == "sst").unwrap_or(false))
            .filter_map(|p| {
                p.file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| s.strip_prefix("sst-"))
                    .and_then(|s| s.parse::<u64>().ok())
                    .map(|id| (id, p))
            })
            .collect();
        found.sort_by_key(|(id, _)| *id);

        for (id, path) in &found {
            let reader = SSTableReader::open(path)?;
            max_seq = max_seq.max(reader_max_seq(&reader));
            max_file_id = max_file_id.max(*id);
            sstables.push((*id, reader));
        }

        for (id, _) in found.iter().rev() {
            manifest.add(*id);
        }
        if !manifest.ids.is_empty() {
            manifest.save()?;
        }
    }

    let next_wal_id = wal_ids.last().copied().unwrap_or(0);
    let next_file_id = max_file_id.max(next_wal_id) + 1;

    Ok(RecoveredState {
        mem,
        sstables,
        manifest,
        max_seq,
        next_file_id,
    })
}
