//! # Compaction — size-tiered SSTable merging
//!
//! Generalizes a single "merge everything" pass into the specification's
//! size-tiered policy: triggered when an engine's SSTable count exceeds a
//! configured threshold, it selects up to `max_merge_width` of the *oldest*
//! SSTables (tie-broken by file id, since ids are unique and monotonically
//! increasing) and performs a k-way merge via [`sstable::MergeIterator`],
//! which already implements newest-sequence-wins deduplication.
//!
//! ## Tombstone retention
//!
//! A tombstone can only be dropped once there is no older SSTable — outside
//! the merge set — that might still hold a shadowed value for that key. This
//! crate adopts the conservative rule: a tombstone survives into the output
//! unless the compaction's input set includes the globally oldest SSTable
//! (the one with the smallest file id across the *entire* engine, not just
//! the inputs). The caller (the `engine` crate) is responsible for passing
//! `includes_oldest` correctly — it's a property of the full SSTable list,
//! which this crate does not see.
//!
//! ## Crash safety
//!
//! The merged output is written to a `.sst.tmp` file by
//! [`sstable::SSTableWriter`] and atomically renamed into place before this
//! crate returns. A crash between that rename and the caller's manifest
//! update leaves an extra, unreferenced `.sst` file; the caller's recovery
//! path is expected to reconcile the manifest against the directory listing
//! the way `engine::recovery` already does for flush output. A crash *during*
//! the write leaves only the already-cleaned-up `.sst.tmp`.

use anyhow::{Context, Result};
use config::CompactionConfig;
use sstable::{MergeIterator, SSTableReader, SSTableWriter, WriteOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One SSTable as seen by the compactor: its file id and an open reader.
pub type Input = (u64, Arc<SSTableReader>);

/// Result of a single compaction pass.
#[derive(Debug)]
pub struct CompactionOutcome {
    /// File ids consumed by this pass (to be removed from the engine's list
    /// and unlinked from disk once the new file is visible).
    pub consumed_ids: Vec<u64>,
    /// File id assigned to the merged output.
    pub output_id: u64,
    /// Path of the merged output SSTable.
    pub output_path: PathBuf,
}

/// Returns `true` if `sstable_count` exceeds the configured trigger.
#[must_use]
pub fn should_compact(sstable_count: usize, opts: &CompactionConfig) -> bool {
    sstable_count > opts.trigger_threshold
}

/// Selects which of `sstables` (ordered newest-first, as the engine keeps its
/// list) should be merged: up to `max_merge_width` of the oldest entries,
/// i.e. the tail of the slice. Ties can't occur since file ids are unique,
/// but selection always proceeds from the oldest end first so the "tie
/// broken by file id" language in the spec is satisfied trivially.
///
/// Returns indices into `sstables`, oldest-first (so the caller can tell
/// whether the globally oldest file — `sstables.last()` — is included).
#[must_use]
pub fn select_inputs(sstables: &[Input], opts: &CompactionConfig) -> Option<Vec<usize>> {
    if !should_compact(sstables.len(), opts) {
        return None;
    }
    let width = opts.max_merge_width.max(2).min(sstables.len());
    let start = sstables.len() - width;
    Some((start..sstables.len()).rev().collect())
}

/// Runs one compaction pass if `sstables` (newest-first) exceeds the
/// configured trigger, writing the merged result into `dir` under a file id
/// drawn from `next_id`.
///
/// Returns `Ok(None)` if no compaction was needed. The caller is responsible
/// for swapping its SSTable list and manifest under its own lock once this
/// returns `Ok(Some(..))`, and for unlinking `consumed_ids`' files only after
/// that swap is visible to readers.
pub fn compact(
    sstables: &[Input],
    dir: &Path,
    next_id: &AtomicU64,
    opts: &CompactionConfig,
) -> Result<Option<CompactionOutcome>> {
    let Some(selected) = select_inputs(sstables, opts) else {
        return Ok(None);
    };

    // `selected` is oldest-first; the globally oldest file is always
    // `sstables.len() - 1`. Record whether it's part of this merge set.
    let includes_oldest = selected.contains(&(sstables.len() - 1));

    let consumed_ids: Vec<u64> = selected.iter().map(|&i| sstables[i].0).collect();
    // MergeIterator borrows `&[SSTableReader]`, but our inputs are `Arc`s
    // shared with the engine's live list; open independent reader handles on
    // the same files rather than trying to move out of the Arc.
    let mut owned_readers: Vec<SSTableReader> = Vec::with_capacity(selected.len());
    for &idx in &selected {
        owned_readers.push(SSTableReader::open(sstables[idx].1.path())?);
    }

    let estimated_count: usize = owned_readers.iter().map(|r| r.len()).sum();
    let mut merge = MergeIterator::new(&owned_readers)?;

    let output_id = next_id.fetch_add(1, Ordering::SeqCst);
    let output_path = dir.join(format!("sst-{:020}.sst", output_id));

    let mut merge_err: Option<anyhow::Error> = None;
    let stream = std::iter::from_fn(|| loop {
        match merge.next_entry() {
            Ok(Some((key, entry))) => {
                if entry.value.is_none() && !includes_oldest {
                    // Tombstone might still shadow a value in an SSTable
                    // outside this merge set; keep it.
                    return Some((key, entry));
                }
                if entry.value.is_none() && includes_oldest {
                    // No older file can hold a shadowed value; drop it.
                    continue;
                }
                return Some((key, entry));
            }
            Ok(None) => return None,
            Err(e) => {
                merge_err = Some(e);
                return None;
            }
        }
    });

    let write_opts = WriteOptions {
        index_interval: opts_index_interval(sstables),
        bloom_fpr: 0.01,
    };
    let write_result =
        SSTableWriter::write_from_iterator_with_options(&output_path, estimated_count, stream, write_opts);

    if let Some(e) = merge_err {
        let _ = std::fs::remove_file(output_path.with_extension("sst.tmp"));
        return Err(e);
    }

    match write_result {
        Ok(()) => {}
        Err(e) if e.to_string().contains("empty") => {
            // Every input was tombstones that were all dropped (this merge
            // included the oldest file) — the merge set collapses to
            // nothing. Treat the whole set as consumed with no replacement.
            return Ok(Some(CompactionOutcome {
                consumed_ids,
                output_id,
                output_path: PathBuf::new(),
            }));
        }
        Err(e) => return Err(e).context("compaction write failed"),
    }

    Ok(Some(CompactionOutcome {
        consumed_ids,
        output_id,
        output_path,
    }))
}

/// Widens the index interval for large merges (fewer sparse-index entries
/// per byte as the merged table grows) — a simple heuristic grounded in the
/// same `index_interval` knob the writer already exposes.
fn opts_index_interval(sstables: &[Input]) -> usize {
    let total: usize = sstables.iter().map(|(_, r)| r.len()).sum();
    if total > 1_000_000 {
        64
    } else {
        sstable::DEFAULT_INDEX_INTERVAL
    }
}

#[cfg(test)]
mod tests;
