//! The persisted secondary index itself.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::path::Path;
use uuid::Uuid;

use crate::error::IndexLoadError;

/// Magic tag for a B-tree index blob, distinct per column format version.
const INDEX_MAGIC: u32 = 0x4254_5245; // "BTRE"
const INDEX_VERSION: u16 = 1;

/// An ordered `value -> row-ids` secondary index for one `(table, column)`.
///
/// A column value may address more than one row, so each key maps to a set
/// of row ids rather than a single one. Keys are raw encoded bytes produced
/// by [`crate::encode_str`]/[`crate::encode_i64`] — the index itself is
/// agnostic to the original column type.
#[derive(Debug, Default)]
pub struct BTreeIndex {
    map: BTreeMap<Vec<u8>, BTreeSet<Uuid>>,
}

impl BTreeIndex {
    /// Creates a new, empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Associates `row_id` with `key`. A key may hold more than one row id.
    pub fn insert(&mut self, key: Vec<u8>, row_id: Uuid) {
        self.map.entry(key).or_default().insert(row_id);
    }

    /// Removes `row_id` from `key`'s entry, dropping the key entirely once
    /// its row-id set is empty.
    pub fn remove(&mut self, key: &[u8], row_id: Uuid) {
        if let Some(set) = self.map.get_mut(key) {
            set.remove(&row_id);
            if set.is_empty() {
                self.map.remove(key);
            }
        }
    }

    /// Equivalent to `remove(old_key, row_id)` followed by
    /// `insert(new_key, row_id)`, matching the specification's "update
    /// removes-then-inserts" rule.
    pub fn update(&mut self, old_key: &[u8], new_key: Vec<u8>, row_id: Uuid) {
        self.remove(old_key, row_id);
        self.insert(new_key, row_id);
    }

    /// Returns every row id addressed by an exact match on `key`.
    pub fn point_lookup(&self, key: &[u8]) -> impl Iterator<Item = Uuid> + '_ {
        self.map
            .get(key)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// Returns every row id whose key is within `[lo, hi]` (or `[lo, ..)` if
    /// `hi` is `None`), in key order.
    pub fn range_lookup<'a>(
        &'a self,
        lo: &[u8],
        hi: Option<&[u8]>,
    ) -> impl Iterator<Item = Uuid> + 'a {
        let upper = match hi {
            Some(hi) => Bound::Included(hi.to_vec()),
            None => Bound::Unbounded,
        };
        self.map
            .range((Bound::Included(lo.to_vec()), upper))
            .flat_map(|(_, set)| set.iter().copied())
    }

    /// Number of distinct keys currently indexed.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.map.len()
    }

    /// Total number of (key, row-id) associations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Persists the full index as one framed blob snapshot: one entry per
    /// (key, row-id) association, composite-keyed as `key ++ row_id_bytes`
    /// so every association round-trips independently of any others
    /// sharing the same indexed value.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let entries = self.map.iter().flat_map(|(key, ids)| {
            ids.iter()
                .map(move |id| (composite_key(key, *id), Some(Vec::new())))
        });
        blob::write_snapshot(path, INDEX_MAGIC, INDEX_VERSION, entries)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
    }

    /// Loads a previously persisted index from `path`.
    ///
    /// Returns [`IndexLoadError::Missing`] if no file exists yet (callers
    /// should silently rebuild from the row store) or
    /// [`IndexLoadError::Corrupt`] if the file exists but fails validation
    /// (callers should log before rebuilding).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, IndexLoadError> {
        let entries = blob::load(path, INDEX_MAGIC)?;
        let folded = blob::fold_entries(entries);

        let mut index = Self::new();
        for (composite, _) in folded {
            if composite.len() < 16 {
                return Err(IndexLoadError::Corrupt(
                    "index entry shorter than a row id".into(),
                ));
            }
            let (key, id_bytes) = composite.split_at(composite.len() - 16);
            let id = Uuid::from_slice(id_bytes)
                .map_err(|e| IndexLoadError::Corrupt(format!("bad row id: {e}")))?;
            index.insert(key.to_vec(), id);
        }
        Ok(index)
    }
}

fn composite_key(key: &[u8], row_id: Uuid) -> Vec<u8> {
    let mut composite = key.to_vec();
    composite.extend_from_slice(row_id.as_bytes());
    composite
}
