//! # Config — node, engine, scheduler and cluster configuration
//!
//! Centralized, `serde`-serializable configuration for a RiptideKV node.
//! Every subsystem (the LSM engine, the compactor, the storage scheduler, the
//! cluster registry and failure detector, the replica directory) takes its
//! tuning knobs from a dedicated sub-struct here rather than reading
//! environment variables directly, so the whole node can be configured from
//! one TOML file or constructed programmatically in tests.
//!
//! All fields have defaults matching the values named in the specification
//! (flush thresholds, compaction trigger, scheduler tick interval, probe
//! thresholds, etc.) — see each struct's [`Default`] impl.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Durability policy for WAL appends, mirroring `wal::Durability` but kept as
/// a plain, `serde`-friendly value here so it can be loaded from config files
/// without pulling the `wal` crate into `config`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurabilityMode {
    /// `fsync` after every append.
    Sync,
    /// `fsync` once every `interval` appends.
    Group {
        /// Number of appends between forced `fsync` calls.
        interval: u32,
    },
    /// `fsync` only on WAL rotation (flush) or an explicit sync call.
    Lazy,
}

impl Default for DurabilityMode {
    fn default() -> Self {
        DurabilityMode::Group { interval: 32 }
    }
}

/// Tuning knobs for one `(database, table)` LSM engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Memtable byte-size bound that triggers sealing and a background flush.
    pub flush_threshold_bytes: usize,
    /// WAL fsync policy.
    pub durability: DurabilityMode,
    /// Immutable-memtable queue length at or above which writers back-pressure.
    pub high_water_mark: usize,
    /// Immutable-memtable queue length below which back-pressured writers resume.
    pub low_water_mark: usize,
    /// How long `put`/`delete` will wait on back-pressure before failing with
    /// `EngineError::BackpressureTimeout`.
    pub backpressure_timeout: Duration,
    /// Sparse index sampling interval (every Nth key) for new SSTables.
    pub index_interval: usize,
    /// Target bloom filter false-positive rate for new SSTables.
    pub bloom_fpr: f64,
    /// Size-tiered compaction tuning.
    pub compaction: CompactionConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            flush_threshold_bytes: 4 * 1024 * 1024,
            durability: DurabilityMode::default(),
            high_water_mark: 4,
            low_water_mark: 1,
            backpressure_timeout: Duration::from_secs(30),
            index_interval: 16,
            bloom_fpr: 0.01,
            compaction: CompactionConfig::default(),
        }
    }
}

/// Size-tiered compaction tuning, shared by the `compaction` crate and the
/// engine's `maybe_compact` wrapper.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// SSTable count above which a compaction pass is triggered.
    pub trigger_threshold: usize,
    /// Maximum number of SSTables merged in a single compaction pass.
    pub max_merge_width: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            trigger_threshold: 4,
            max_merge_width: 8,
        }
    }
}

/// Periodic persistence tuning for the storage scheduler.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Interval between persistence ticks.
    pub tick_interval: Duration,
    /// Bound on how long shutdown waits for an in-flight tick to finish
    /// before giving up and running its own pass anyway.
    pub shutdown_wait: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            shutdown_wait: Duration::from_secs(10),
        }
    }
}

/// Automatic secondary-index tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AutoIndexConfig {
    /// Equality-predicate use count that triggers building an index.
    pub auto_index_threshold: u64,
    /// Maximum number of indexes a single table may carry.
    pub max_indexes_per_table: usize,
}

impl Default for AutoIndexConfig {
    fn default() -> Self {
        Self {
            auto_index_threshold: 100,
            max_indexes_per_table: 8,
        }
    }
}

/// Peer discovery and liveness tuning for the node registry / failure detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// First three octets of the IPv4 /24 to probe, e.g. `[192, 168, 1]`.
    pub subnet: [u8; 3],
    /// Port every peer's inter-node HTTP listener is probed on.
    pub probe_port: u16,
    /// Interval between probe sweeps of the whole subnet.
    pub probe_interval: Duration,
    /// Per-probe and per-replication-send timeout.
    pub network_timeout: Duration,
    /// Consecutive failed probes before a peer is declared lost.
    pub fail_threshold: u32,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            subnet: [127, 0, 0],
            probe_port: 1985,
            probe_interval: Duration::from_secs(2),
            network_timeout: Duration::from_secs(5),
            fail_threshold: 3,
        }
    }
}

/// Top-level configuration for one node, threaded into `node::Node::open`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Root directory for all on-disk state (`data/` in the on-disk layout).
    pub data_root: PathBuf,
    /// This node's stable identifier, used in replica assignments and
    /// inter-node messages. Generated fresh if not supplied.
    pub node_id: String,
    /// HTTP port the inter-node protocol listens on (shared with `probe_port`
    /// in practice, but kept distinct since an external HTTP layer may bind
    /// its own client-facing port separately).
    pub inter_node_port: u16,
    pub engine: EngineConfig,
    pub scheduler: SchedulerConfig,
    pub cluster: ClusterConfig,
    pub auto_index: AutoIndexConfig,
}

impl NodeConfig {
    /// Builds a config rooted at `data_root` with an auto-generated node id
    /// and every other field defaulted.
    pub fn new<P: Into<PathBuf>>(data_root: P) -> Self {
        Self {
            data_root: data_root.into(),
            node_id: generate_node_id(),
            inter_node_port: 1985,
            engine: EngineConfig::default(),
            scheduler: SchedulerConfig::default(),
            cluster: ClusterConfig::default(),
            auto_index: AutoIndexConfig::default(),
        }
    }
}

/// Generates a reasonably unique node id without pulling `uuid` into a crate
/// that otherwise has no need for it: process id + wall-clock nanos, hex
/// encoded. Collisions are astronomically unlikely on a single /24.
fn generate_node_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("node-{:x}-{:x}", std::process::id(), nanos)
}
