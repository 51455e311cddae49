//! Recovery orchestrator: discovers every database and table already
//! present under the data root and opens them in a fixed, deterministic
//! order before the node is allowed to report `online`.
//!
//! Each [`storage::Table::open`] call already performs the per-table
//! sequencing spec.md §4.10 names (sweep `.tmp` debris, replay the WAL,
//! load SSTables, load or rebuild every index, load the replica map) —
//! this module's job is purely the *cross-table* ordering and the
//! all-or-nothing `online` flip, plus isolating a corrupt table from the
//! rest of the node per spec.md §7.

use config::NodeConfig;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use storage::{Database, Table};

/// One fully-opened database: its manifest plus every table successfully
/// recovered (a table whose recovery failed is omitted, not included as a
/// partially-usable handle).
pub(crate) struct OpenDatabase {
    pub database: Arc<Database>,
    pub tables: BTreeMap<String, Arc<Table>>,
}

/// Result of the startup sweep: every database that was discovered, and the
/// `(database, table)` pairs whose recovery failed and were left closed.
pub(crate) struct RecoveryResult {
    pub databases: BTreeMap<String, OpenDatabase>,
    pub unrecoverable: Vec<(String, String)>,
}

/// Scans `data_root` for `<db>.ddbm` manifests (spec.md §6's on-disk
/// layout) and opens every table each manifest names, in sorted
/// `(database, table)` order so this matches the scheduler's own traversal
/// order and any other subsystem that needs deterministic lock ordering.
pub(crate) fn recover_all(
    data_root: &Path,
    config: &NodeConfig,
    registry: &Arc<cluster::Registry>,
) -> anyhow::Result<RecoveryResult> {
    std::fs::create_dir_all(data_root)?;

    let mut db_names: Vec<String> = std::fs::read_dir(data_root)?
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            e.path()
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(".ddbm"))
                .map(|n| n.to_string())
        })
        .collect();
    db_names.sort();

    let mut databases = BTreeMap::new();
    let mut unrecoverable = Vec::new();

    for db_name in db_names {
        let database = Arc::new(Database::open(data_root, &db_name)?);
        let mut tables = BTreeMap::new();

        let mut table_names = database.list_tables();
        table_names.sort();

        for table_name in table_names {
            let dir = data_root.join(&db_name).join(&table_name);
            match Table::open(
                dir,
                db_name.clone(),
                table_name.clone(),
                config.engine,
                config.auto_index,
                Arc::clone(registry),
                config.node_id.clone(),
            ) {
                Ok(table) => {
                    tables.insert(table_name, table);
                }
                Err(e) => {
                    tracing::error!(
                        database = %db_name,
                        table = %table_name,
                        error = %e,
                        "table recovery failed; table unrecoverable until operator action"
                    );
                    unrecoverable.push((db_name.clone(), table_name));
                }
            }
        }

        databases.insert(
            db_name,
            OpenDatabase {
                database,
                tables,
            },
        );
    }

    Ok(RecoveryResult {
        databases,
        unrecoverable,
    })
}
