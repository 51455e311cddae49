use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::{SystemTime, UNIX_EPOCH};

/// A node's stable identifier, shared across the inter-node protocol,
/// replica assignments and the registry.
pub type NodeId = String;

/// What a node's probe response (and `JOIN_CLUSTER` message) advertises
/// about itself: `{id, ip, version, uptime}` per the specification's
/// external HTTP surface (`GET /` returns the same shape to clients).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub id: NodeId,
    pub ip: Ipv4Addr,
    pub port: u16,
    pub version: String,
    pub uptime_secs: u64,
}

impl NodeDescriptor {
    /// Builds a descriptor for the local node, computing uptime from
    /// `started_at`.
    #[must_use]
    pub fn new(id: NodeId, ip: Ipv4Addr, port: u16, started_at: SystemTime) -> Self {
        let uptime_secs = SystemTime::now()
            .duration_since(started_at)
            .unwrap_or_default()
            .as_secs();
        Self {
            id,
            ip,
            port,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs,
        }
    }
}

/// Millisecond timestamp helper shared by the protocol's idempotence
/// sequencing, mirroring `wal::now_millis`.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
