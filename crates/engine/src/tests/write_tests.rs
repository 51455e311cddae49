use super::helpers::small_flush_config;
use crate::{Engine, MAX_KEY_SIZE, MAX_VALUE_SIZE};
use anyhow::Result;
use config::EngineConfig;
use std::sync::Arc;
use tempfile::tempdir;

fn open(dir: &std::path::Path, config: EngineConfig) -> Result<Arc<Engine>> {
    Engine::open(dir.join("wal"), dir.join("sst"), config)
}

#[test]
fn put_and_get() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path(), EngineConfig::default())?;

    engine.put(b"name".to_vec(), b"alice".to_vec())?;
    assert_eq!(engine.get(b"name")?.as_deref(), Some(b"alice".as_slice()));
    assert_eq!(engine.seq(), 1);
    Ok(())
}

#[test]
fn get_missing_key() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path(), EngineConfig::default())?;
    assert!(engine.get(b"nope")?.is_none());
    Ok(())
}

#[test]
fn delete_shadows_prior_put() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path(), EngineConfig::default())?;

    engine.put(b"k".to_vec(), b"v".to_vec())?;
    engine.delete(b"k".to_vec())?;
    assert!(engine.get(b"k")?.is_none());
    Ok(())
}

#[test]
fn put_after_delete_resurrects() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path(), EngineConfig::default())?;

    engine.put(b"k".to_vec(), b"v1".to_vec())?;
    engine.delete(b"k".to_vec())?;
    engine.put(b"k".to_vec(), b"v2".to_vec())?;
    assert_eq!(engine.get(b"k")?.as_deref(), Some(b"v2".as_slice()));
    Ok(())
}

#[test]
fn overwrite_key() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path(), EngineConfig::default())?;

    engine.put(b"k".to_vec(), b"v1".to_vec())?;
    engine.put(b"k".to_vec(), b"v2".to_vec())?;
    assert_eq!(engine.get(b"k")?.as_deref(), Some(b"v2".as_slice()));
    Ok(())
}

#[test]
fn rejects_empty_key() {
    let dir = tempdir().unwrap();
    let engine = open(dir.path(), EngineConfig::default()).unwrap();
    let err = engine.put(Vec::new(), b"v".to_vec()).unwrap_err();
    assert!(err.to_string().contains("empty"));
    assert_eq!(engine.seq(), 0);
}

#[test]
fn rejects_oversized_key() {
    let dir = tempdir().unwrap();
    let engine = open(dir.path(), EngineConfig::default()).unwrap();
    let huge_key = vec![0u8; MAX_KEY_SIZE + 1];
    let err = engine.put(huge_key, b"v".to_vec()).unwrap_err();
    assert!(err.to_string().contains("too large"));
}

#[test]
fn rejects_oversized_value() {
    let dir = tempdir().unwrap();
    let engine = open(dir.path(), EngineConfig::default()).unwrap();
    let huge_value = vec![0u8; MAX_VALUE_SIZE + 1];
    let err = engine.put(b"k".to_vec(), huge_value).unwrap_err();
    assert!(err.to_string().contains("too large"));
}

#[test]
fn flush_persists_active_memtable_to_sstable() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path(), small_flush_config(1024 * 1024))?;

    engine.put(b"a".to_vec(), b"1".to_vec())?;
    engine.put(b"b".to_vec(), b"2".to_vec())?;
    engine.flush()?;

    assert_eq!(engine.sstable_count(), 1);
    assert_eq!(engine.immutable_queue_len(), 0);
    assert_eq!(engine.get(b"a")?.as_deref(), Some(b"1".as_slice()));
    Ok(())
}

#[test]
fn flush_on_empty_memtable_is_a_no_op() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path(), EngineConfig::default())?;
    engine.flush()?;
    assert_eq!(engine.sstable_count(), 0);
    Ok(())
}

#[test]
fn seq_increments_on_every_write() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path(), EngineConfig::default())?;

    assert_eq!(engine.seq(), 0);
    engine.put(b"a".to_vec(), b"1".to_vec())?;
    assert_eq!(engine.seq(), 1);
    engine.put(b"b".to_vec(), b"2".to_vec())?;
    assert_eq!(engine.seq(), 2);
    engine.delete(b"a".to_vec())?;
    assert_eq!(engine.seq(), 3);
    Ok(())
}

#[test]
fn automatic_seal_on_threshold_eventually_flushes() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path(), small_flush_config(64))?;

    for i in 0..50u64 {
        engine.put(format!("k{:04}", i).into_bytes(), vec![7u8; 16])?;
    }
    // Drain whatever is still queued from the automatic seals.
    engine.flush()?;

    assert!(engine.sstable_count() >= 1);
    for i in 0..50u64 {
        let key = format!("k{:04}", i).into_bytes();
        assert!(
            engine.get(&key)?.is_some(),
            "key {:?} should survive flush",
            key
        );
    }
    Ok(())
}

#[test]
fn drop_flushes_pending_memtable() -> Result<()> {
    let dir = tempdir()?;
    let wal_dir = dir.path().join("wal");
    let sst_dir = dir.path().join("sst");

    {
        let engine = Engine::open(&wal_dir, &sst_dir, EngineConfig::default())?;
        engine.put(b"drop_key".to_vec(), b"drop_val".to_vec())?;
        // Engine drops here; Drop::drop should flush the memtable.
    }

    let engine = Engine::open(&wal_dir, &sst_dir, EngineConfig::default())?;
    assert_eq!(
        engine.get(b"drop_key")?.as_deref(),
        Some(b"drop_val".as_slice())
    );
    Ok(())
}

#[test]
fn multiple_explicit_flushes_create_multiple_sstables() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path(), small_flush_config(1024 * 1024))?;

    for i in 0..5u64 {
        engine.put(format!("k{}", i).into_bytes(), b"v".to_vec())?;
        engine.flush()?;
    }

    assert_eq!(engine.sstable_count(), 5);
    for i in 0..5u64 {
        let key = format!("k{}", i).into_bytes();
        assert!(engine.get(&key)?.is_some());
    }
    Ok(())
}
