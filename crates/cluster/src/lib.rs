//! # Cluster — node registry and failure detector
//!
//! Discovers peers opportunistically on a local IPv4 `/24` by probing every
//! address on a fixed port, and declares a peer lost after `fail_threshold`
//! consecutive probe failures. Liveness changes are published as
//! [`PeerEvent`]s on a `tokio::sync::broadcast` channel consumed by
//! `replication::ReplicaDirectory`.
//!
//! This is the one subsystem in the node that is genuinely concurrent I/O
//! (fanning a probe out to up to 254 hosts every tick), so it runs on its
//! own `tokio` runtime rather than the blocking-thread style the rest of
//! the node uses.

mod descriptor;
mod protocol;
mod registry;

pub use descriptor::{now_millis, NodeDescriptor, NodeId};
pub use protocol::Message;
pub use registry::{PeerEvent, Registry};
