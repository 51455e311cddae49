use super::*;
use config::CompactionConfig;
use memtable::Memtable;
use sstable::SSTableReader;
use std::sync::atomic::AtomicU64;
use tempfile::tempdir;

fn write_table(dir: &Path, id: u64, entries: &[(&[u8], Option<&[u8]>, u64)]) -> Arc<SSTableReader> {
    let mut mem = Memtable::new();
    for &(key, value, seq) in entries {
        match value {
            Some(v) => mem.put(key.to_vec(), v.to_vec(), seq).unwrap(),
            None => mem.delete(key.to_vec(), seq).unwrap(),
        }
    }
    let path = dir.join(format!("sst-{:020}.sst", id));
    SSTableWriter::write_from_memtable(&path, &mem).unwrap();
    Arc::new(SSTableReader::open(&path).unwrap())
}

fn cfg(trigger: usize, width: usize) -> CompactionConfig {
    CompactionConfig {
        trigger_threshold: trigger,
        max_merge_width: width,
    }
}

#[test]
fn should_compact_respects_trigger_threshold() {
    let opts = cfg(4, 8);
    assert!(!should_compact(4, &opts));
    assert!(should_compact(5, &opts));
}

#[test]
fn select_inputs_picks_oldest_tail_up_to_width() {
    let opts = cfg(2, 3);
    let dir = tempdir().unwrap();
    let inputs: Vec<Input> = (0..6)
        .map(|i| {
            let r = write_table(dir.path(), i, &[(b"k".as_slice(), Some(b"v".as_slice()), i)]);
            (i, r)
        })
        .collect();
    let selected = select_inputs(&inputs, &opts).unwrap();
    assert_eq!(selected.len(), 3);
    // oldest-first: indices 5, 4, 3 (the tail of a newest-first list)
    assert_eq!(selected, vec![5, 4, 3]);
}

#[test]
fn select_inputs_returns_none_below_trigger() {
    let opts = cfg(8, 4);
    let dir = tempdir().unwrap();
    let inputs: Vec<Input> = (0..3)
        .map(|i| {
            let r = write_table(dir.path(), i, &[(b"k".as_slice(), Some(b"v".as_slice()), i)]);
            (i, r)
        })
        .collect();
    assert!(select_inputs(&inputs, &opts).is_none());
}

#[test]
fn compact_merges_and_dedups_by_sequence() {
    let dir = tempdir().unwrap();
    let opts = cfg(1, 4);
    let next_id = AtomicU64::new(10);

    // Newest-first list: table 1 overwrites "a" with a newer sequence than table 0.
    let t1 = write_table(dir.path(), 1, &[(b"a".as_slice(), Some(b"new".as_slice()), 5)]);
    let t0 = write_table(dir.path(), 0, &[(b"a".as_slice(), Some(b"old".as_slice()), 1), (b"b".as_slice(), Some(b"b-val".as_slice()), 2)]);
    let inputs = vec![(1u64, t1), (0u64, t0)];

    let outcome = compact(&inputs, dir.path(), &next_id, &opts)
        .unwrap()
        .expect("compaction should run: two tables exceed trigger_threshold of 1");

    assert_eq!(outcome.consumed_ids, vec![0, 1]);
    let merged = SSTableReader::open(&outcome.output_path).unwrap();
    assert_eq!(merged.len(), 2);
    let entry = merged.get(b"a").unwrap().expect("key a survives merge");
    assert_eq!(entry.value.as_deref(), Some(b"new".as_slice()));
}

#[test]
fn compact_drops_tombstones_only_when_oldest_included() {
    let dir = tempdir().unwrap();
    let opts = cfg(1, 4);
    let next_id = AtomicU64::new(20);

    let t1 = write_table(dir.path(), 1, &[(b"a".as_slice(), None, 9)]);
    let t0 = write_table(dir.path(), 0, &[(b"a".as_slice(), Some(b"orig".as_slice()), 1)]);
    let inputs = vec![(1u64, t1), (0u64, t0)];

    // This merge set includes the globally oldest table (index 1, id 0), so
    // the tombstone for "a" should be dropped entirely.
    let outcome = compact(&inputs, dir.path(), &next_id, &opts).unwrap();
    match outcome {
        Some(o) if o.output_path.as_os_str().is_empty() => {
            // All entries were tombstones that got dropped; nothing to read.
        }
        Some(o) => {
            let merged = SSTableReader::open(&o.output_path).unwrap();
            assert!(merged.get(b"a").unwrap().is_none());
        }
        None => panic!("expected a compaction outcome"),
    }
}

#[test]
fn compact_returns_none_below_trigger() {
    let dir = tempdir().unwrap();
    let opts = cfg(8, 4);
    let next_id = AtomicU64::new(0);
    let t0 = write_table(dir.path(), 0, &[(b"a".as_slice(), Some(b"v".as_slice()), 1)]);
    let inputs = vec![(0u64, t0)];
    assert!(compact(&inputs, dir.path(), &next_id, &opts).unwrap().is_none());
}
