//! Engine-level wiring for the [`compaction`] crate: snapshot the SSTable
//! list, run one size-tiered pass if warranted, then swap the consumed
//! files out for the merged output under the same lock that guards reads.

use sstable::SSTableReader;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::Engine;

impl Engine {
    /// Runs at most one compaction pass. Safe to call repeatedly (e.g. from
    /// a periodic scheduler tick) — it is a no-op when the SSTable count is
    /// at or below the configured trigger.
    ///
    /// The consumed SSTables' files are unlinked only after the new list and
    /// manifest are durably visible, so a crash mid-compaction leaves at
    /// worst an extra unreferenced `.sst` file, reconciled on next
    /// [`Engine::open`] against the manifest.
    pub fn maybe_compact(self: &Arc<Self>) -> anyhow::Result<bool> {
        let opts = self.config().compaction;

        let snapshot: Vec<(u64, Arc<SSTableReader>)> = self.sstables.read().clone();
        if !compaction::should_compact(snapshot.len(), &opts) {
            return Ok(false);
        }

        let outcome = match compaction::compact(&snapshot, &self.sst_dir, &self.next_sst_id, &opts)? {
            Some(o) => o,
            None => return Ok(false),
        };

        let consumed: std::collections::HashSet<u64> = outcome.consumed_ids.iter().copied().collect();
        let output_is_empty = outcome.output_path.as_os_str().is_empty();

        {
            let mut list = self.sstables.write();
            list.retain(|(id, _)| !consumed.contains(id));
            if !output_is_empty {
                let reader = Arc::new(SSTableReader::open(&outcome.output_path)?);
                // `select_inputs` always picks a contiguous oldest-tail
                // slice, so the merged file is older than every surviving
                // SSTable; appending keeps the newest-first invariant.
                list.push((outcome.output_id, reader));
            }
        }

        {
            let mut manifest = self.manifest.lock();
            manifest.remove(&outcome.consumed_ids);
            if !output_is_empty {
                // The merged output holds the oldest data among the files it
                // replaced, so it belongs at the oldest position in the
                // manifest — matching where it was just placed in the
                // in-memory list above — not the newest.
                manifest.add_oldest(outcome.output_id);
            }
            manifest.save()?;
        }

        for id in &outcome.consumed_ids {
            let _ = std::fs::remove_file(self.sst_dir.join(crate::sst_filename(*id)));
        }

        Ok(true)
    }

    /// Starts a detached background thread that calls [`Engine::maybe_compact`]
    /// once. Errors are logged; the engine remains usable either way.
    pub fn spawn_compaction(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        std::thread::spawn(move || {
            if let Err(e) = engine.maybe_compact() {
                tracing::error!(error = %e, "compaction pass failed");
            }
        });
    }
}
