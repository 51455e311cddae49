use crate::manifest::{Manifest, MANIFEST_FILENAME};
use anyhow::Result;
use std::fs;
use tempfile::tempdir;

#[test]
fn create_empty_manifest() -> Result<()> {
    let dir = tempdir()?;
    let m = Manifest::load_or_create(dir.path())?;
    assert!(m.ids.is_empty());
    Ok(())
}

#[test]
fn save_and_reload_preserves_newest_first_order() -> Result<()> {
    let dir = tempdir()?;
    let mut m = Manifest::load_or_create(dir.path())?;
    m.add(1);
    m.add(2);
    m.add(3);
    m.save()?;

    let m2 = Manifest::load_or_create(dir.path())?;
    assert_eq!(m2.ids, vec![3, 2, 1]);
    Ok(())
}

#[test]
fn add_oldest_inserts_at_the_back() -> Result<()> {
    let dir = tempdir()?;
    let mut m = Manifest::load_or_create(dir.path())?;
    m.add(2);
    m.add(1);
    // A compaction output superseding ids 1 and 2 holds their combined
    // (older) data; even though its own id (5) is the largest, it must end
    // up at the oldest (back) position, not the newest (front).
    m.remove(&[1, 2]);
    m.add_oldest(5);
    assert_eq!(m.ids, vec![5]);

    m.add(3);
    assert_eq!(m.ids, vec![3, 5]);
    Ok(())
}

#[test]
fn remove_drops_only_named_ids() -> Result<()> {
    let dir = tempdir()?;
    let mut m = Manifest::load_or_create(dir.path())?;
    m.add(1);
    m.add(2);
    m.add(3);
    m.remove(&[1, 3]);
    assert_eq!(m.ids, vec![2]);
    Ok(())
}

#[test]
fn comments_and_blank_lines_ignored() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join(MANIFEST_FILENAME);
    fs::write(&path, "# comment\n\n42\n\n# another comment\n17\n")?;
    let m = Manifest::load_or_create(dir.path())?;
    assert_eq!(m.ids, vec![42, 17]);
    Ok(())
}

#[test]
fn invalid_line_returns_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join(MANIFEST_FILENAME);
    fs::write(&path, "not-a-number\n").unwrap();
    let result = Manifest::load_or_create(dir.path());
    assert!(result.is_err());
}

#[test]
fn save_is_atomic_via_tmp_rename() -> Result<()> {
    let dir = tempdir()?;
    let mut m = Manifest::load_or_create(dir.path())?;
    m.add(5);
    m.save()?;

    assert!(dir.path().join(MANIFEST_FILENAME).exists());
    assert!(!dir.path().join("MANIFEST.tmp").exists());
    Ok(())
}
