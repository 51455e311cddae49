//! Per-database metadata: the list of tables a database holds, persisted as
//! `data/<db>.ddbm` per spec.md §6's on-disk layout.

use crate::error::StorageError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    tables: BTreeSet<String>,
}

/// A database's table manifest: which tables it holds. Table data itself
/// lives under `data/<db>/<table>/` and is owned by `storage::Table`; this
/// only tracks the set of table names, matching the teacher's `.ddbm`
/// convention of one small metadata file per database.
pub struct Database {
    name: String,
    path: PathBuf,
    manifest: RwLock<Manifest>,
}

impl Database {
    /// Opens (or creates, if absent) the database metadata file for `name`
    /// rooted at `data_root`.
    pub fn open(data_root: impl AsRef<Path>, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let path = data_root.as_ref().join(format!("{name}.ddbm"));

        let manifest = if path.exists() {
            let bytes = std::fs::read(&path)?;
            serde_json::from_slice(&bytes)?
        } else {
            Manifest::default()
        };

        Ok(Self {
            name,
            path,
            manifest: RwLock::new(manifest),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers `table` as belonging to this database and persists the
    /// manifest immediately — table creation is rare enough that this need
    /// not wait for the scheduler's next tick.
    pub fn create_table(&self, table: impl Into<String>) -> Result<()> {
        let table = table.into();
        {
            let mut manifest = self.manifest.write();
            if !manifest.tables.insert(table.clone()) {
                return Err(StorageError::TableAlreadyExists(self.name.clone(), table));
            }
        }
        self.save()
    }

    /// Lists every table this database currently holds, in sorted order
    /// (matching the scheduler's sorted-name persistence traversal).
    #[must_use]
    pub fn list_tables(&self) -> Vec<String> {
        self.manifest.read().tables.iter().cloned().collect()
    }

    #[must_use]
    pub fn has_table(&self, table: &str) -> bool {
        self.manifest.read().tables.contains(table)
    }

    fn save(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&*self.manifest.read())?;
        let tmp_path = self.path.with_extension("ddbm.tmp");
        std::fs::write(&tmp_path, bytes)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}
