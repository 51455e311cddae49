//! # Node — dependency-injected top-level handle
//!
//! `Node` is the one value the rest of a real deployment (the external HTTP
//! server, the SQL-like query pipeline, the CLI) is expected to hold: it
//! owns every database and table this process serves, the cluster registry,
//! and the storage scheduler, and sequences recovery across all of them on
//! [`Node::open`].
//!
//! This directly implements the Design Notes' "shared singletons" redesign:
//! the source reaches a process-wide static to find its storage or
//! scheduler; here every subsystem is constructed once and threaded through
//! explicitly, and the only thing resembling a singleton is this one `Node`
//! value itself, held behind an `Arc` by whoever embeds it.

mod error;
mod runtime;
mod startup;


use cluster::{Message, NodeDescriptor, NodeId, Registry};
use config::NodeConfig;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use storage::{Database, Table};
use uuid::Uuid;

pub use error::NodeError;
pub use runtime::NodeRuntime;

type Result<T> = std::result::Result<T, NodeError>;

/// Snapshot of node-level health, mirroring the external HTTP surface's
/// `GET /` response shape (`{this, totalNodes, availableNodes}`). The HTTP
/// layer itself is out of scope; this is the value it would serialize.
#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub this: NodeDescriptor,
    pub online: bool,
    pub total_nodes: usize,
    pub available_nodes: usize,
}

/// The per-process node: every database/table it serves, its cluster
/// registry, and recovery/online state. Always constructed via
/// [`Node::open`] and held behind an `Arc`.
pub struct Node {
    config: NodeConfig,
    data_root: PathBuf,
    started_at: SystemTime,
    self_descriptor: NodeDescriptor,

    registry: Arc<Registry>,
    databases: RwLock<BTreeMap<String, Arc<Database>>>,
    tables: RwLock<BTreeMap<(String, String), Arc<Table>>>,
    unrecoverable: RwLock<HashSet<(String, String)>>,

    online: AtomicBool,
}

impl Node {
    /// Opens the node rooted at `config.data_root`, running the full
    /// recovery orchestrator over every database/table already on
    /// disk before returning. `bind_ip` is the address this node's
    /// inter-node HTTP listener is reachable at — supplied by the caller
    /// (an external networking layer) rather than guessed, since discovering
    /// one's own externally-reachable IP is inherently platform-specific and
    /// out of this core's scope.
    pub fn open(config: NodeConfig, bind_ip: Ipv4Addr) -> anyhow::Result<Arc<Self>> {
        let data_root = config.data_root.clone();
        let started_at = SystemTime::now();
        let self_descriptor =
            NodeDescriptor::new(config.node_id.clone(), bind_ip, config.inter_node_port, started_at);

        let (registry, _events) = Registry::new(self_descriptor.clone(), config.cluster.clone());

        let recovered = startup::recover_all(&data_root, &config, &registry)?;

        let mut databases = BTreeMap::new();
        let mut tables = BTreeMap::new();
        for (db_name, open_db) in recovered.databases {
            for (table_name, table) in open_db.tables {
                tables.insert((db_name.clone(), table_name), table);
            }
            databases.insert(db_name, open_db.database);
        }

        let unrecoverable: HashSet<(String, String)> = recovered.unrecoverable.into_iter().collect();
        if !unrecoverable.is_empty() {
            tracing::warn!(
                count = unrecoverable.len(),
                "node starting with one or more unrecoverable tables"
            );
        }

        let node = Arc::new(Self {
            config,
            data_root,
            started_at,
            self_descriptor,
            registry,
            databases: RwLock::new(databases),
            tables: RwLock::new(tables),
            unrecoverable: RwLock::new(unrecoverable),
            online: AtomicBool::new(true),
        });

        Ok(node)
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new(
            self.self_descriptor.id.clone(),
            self.self_descriptor.ip,
            self.self_descriptor.port,
            self.started_at,
        )
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Status snapshot matching the external `GET /` response shape.
    #[must_use]
    pub fn status(&self) -> NodeStatus {
        let live = self.registry.live_peer_count();
        NodeStatus {
            this: self.descriptor(),
            online: self.is_online(),
            total_nodes: live + 1,
            available_nodes: live + 1,
        }
    }

    /// Registers a new, empty database. Idempotent: re-creating an
    /// already-open database is a no-op rather than an error, since the
    /// manifest file itself is opened-or-created by [`Database::open`].
    pub fn create_database(&self, name: &str) -> Result<()> {
        if self.databases.read().contains_key(name) {
            return Ok(());
        }
        let database = Arc::new(Database::open(&self.data_root, name)?);
        self.databases.write().insert(name.to_string(), database);
        Ok(())
    }

    /// Creates `table` under `database` and opens its engine, indexes, and
    /// replica directory. `database` must already exist.
    pub fn create_table(&self, database: &str, table: &str) -> Result<()> {
        let db = self
            .databases
            .read()
            .get(database)
            .cloned()
            .ok_or_else(|| NodeError::NoSuchDatabase(database.to_string()))?;
        db.create_table(table)?;

        let dir = self.data_root.join(database).join(table);
        let opened = Table::open(
            dir,
            database,
            table,
            self.config.engine,
            self.config.auto_index,
            Arc::clone(&self.registry),
            self.config.node_id.clone(),
        )?;
        self.tables
            .write()
            .insert((database.to_string(), table.to_string()), opened);
        self.unrecoverable
            .write()
            .remove(&(database.to_string(), table.to_string()));
        Ok(())
    }

    fn table(&self, database: &str, table: &str) -> Result<Arc<Table>> {
        if !self.is_online() {
            return Err(NodeError::NotOnline);
        }
        if self
            .unrecoverable
            .read()
            .contains(&(database.to_string(), table.to_string()))
        {
            return Err(NodeError::UnrecoverableTable(
                database.to_string(),
                table.to_string(),
            ));
        }
        self.tables
            .read()
            .get(&(database.to_string(), table.to_string()))
            .cloned()
            .ok_or_else(|| NodeError::NoSuchTable(database.to_string(), table.to_string()))
    }

    pub fn insert_row(&self, database: &str, table: &str, payload: Value) -> Result<Uuid> {
        Ok(self.table(database, table)?.insert_row(payload)?)
    }

    pub fn update_row(&self, database: &str, table: &str, row_id: Uuid, payload: Value) -> Result<()> {
        Ok(self.table(database, table)?.update_row(row_id, payload)?)
    }

    pub fn delete_row(&self, database: &str, table: &str, row_id: Uuid) -> Result<()> {
        Ok(self.table(database, table)?.delete_row(row_id)?)
    }

    pub fn get_row(&self, database: &str, table: &str, row_id: Uuid) -> Result<Option<Value>> {
        Ok(self.table(database, table)?.get_row(row_id)?)
    }

    /// Applies an inbound inter-node message. `JoinCluster` and `Probe` are
    /// cluster-level and have no table to route to (handled by the external
    /// HTTP layer and the registry's probe responder respectively); the
    /// row-mutation kinds are routed to the named table's
    /// [`Table::apply_remote`].
    pub fn dispatch_message(&self, message: &Message) -> Result<()> {
        let Some((database, table)) = message.table_ref() else {
            return Ok(());
        };
        Ok(self.table(database, table)?.apply_remote(message)?)
    }

    /// Reacts to a peer being declared lost by the failure detector:
    /// notifies every table's replica directory so rows it held get
    /// reassigned.
    pub(crate) fn handle_peer_lost(&self, lost: &NodeId) {
        for table in self.tables.read().values() {
            table.handle_peer_lost(lost);
        }
    }

    /// Every table currently open, for the scheduler's persistence tick (and
    /// for an administrative caller that wants to force one, such as the
    /// `cli` crate's `PERSIST` command).
    pub fn open_tables(&self) -> Vec<Arc<Table>> {
        self.tables.read().values().cloned().collect()
    }

    #[must_use]
    pub fn scheduler_config(&self) -> config::SchedulerConfig {
        self.config.scheduler
    }
}

impl scheduler::TableProvider for Node {
    fn is_ready(&self) -> bool {
        self.is_online()
    }

    fn tables(&self) -> Vec<Arc<Table>> {
        self.open_tables()
    }
}
