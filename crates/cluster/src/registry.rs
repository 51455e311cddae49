//! Node registry and failure detector.
//!
//! Periodically probes every address in the configured IPv4 `/24` on
//! `probe_port`. A responding address updates (or creates) a peer entry and
//! resets its consecutive-failure counter; an address present in the
//! registry that fails `fail_threshold` consecutive probes is declared lost.
//! Liveness changes are published on a broadcast channel so [`PeerEvent`]
//! consumers (the replica directory) don't have to poll the registry.
//!
//! The peer map itself is guarded by a plain [`parking_lot::RwLock`] rather
//! than an async one: every critical section here is a handful of map
//! operations with no `.await` inside it, so synchronous callers (the
//! replica directory's row-assignment path, reached from the otherwise
//! blocking engine write path) can read `live_peers()` without bridging
//! into the registry's `tokio` runtime.

use crate::descriptor::{NodeDescriptor, NodeId};
use config::ClusterConfig;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// A liveness change observed by the failure detector.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A previously-unknown (or previously-lost) node responded to a probe.
    Joined(NodeDescriptor),
    /// A known node failed `fail_threshold` consecutive probes.
    Lost(NodeId),
}

struct PeerState {
    descriptor: NodeDescriptor,
    consecutive_failures: u32,
    last_seen: Instant,
}

/// The live-peer registry shared by the replica directory and the storage
/// scheduler's "is the node cluster-ready" check.
pub struct Registry {
    self_descriptor: NodeDescriptor,
    config: ClusterConfig,
    peers: RwLock<HashMap<NodeId, PeerState>>,
    events: broadcast::Sender<PeerEvent>,
    client: reqwest::Client,
}

impl Registry {
    /// Creates a registry for the local node described by
    /// `self_descriptor`. Returns the registry and a receiver for peer
    /// liveness events; additional receivers can be created via
    /// [`Registry::subscribe`].
    #[must_use]
    pub fn new(
        self_descriptor: NodeDescriptor,
        config: ClusterConfig,
    ) -> (Arc<Self>, broadcast::Receiver<PeerEvent>) {
        let (tx, rx) = broadcast::channel(256);
        let client = reqwest::Client::builder()
            .timeout(config.network_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        let registry = Arc::new(Self {
            self_descriptor,
            config,
            peers: RwLock::new(HashMap::new()),
            events: tx,
            client,
        });
        (registry, rx)
    }

    /// Subscribes an additional consumer to peer liveness events.
    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.events.subscribe()
    }

    /// Returns a snapshot of the currently-live peer ids (excluding the
    /// local node).
    #[must_use]
    pub fn live_peers(&self) -> Vec<NodeId> {
        self.peers.read().keys().cloned().collect()
    }

    /// Returns the number of currently-live peers, used by the scheduler and
    /// replica directory to decide whether the cluster has enough members
    /// to assign a secondary.
    #[must_use]
    pub fn live_peer_count(&self) -> usize {
        self.peers.read().len()
    }

    /// Returns the descriptor for `id`, if currently live.
    #[must_use]
    pub fn descriptor_of(&self, id: &str) -> Option<NodeDescriptor> {
        self.peers.read().get(id).map(|s| s.descriptor.clone())
    }

    /// Runs one probe sweep of every host in the configured `/24` on
    /// `probe_port`, fanning the probes out concurrently.
    pub async fn probe_sweep(self: &Arc<Self>) {
        let [a, b, c] = self.config.subnet;
        let port = self.config.probe_port;
        let self_ip = self.self_descriptor.ip;

        let mut tasks = Vec::with_capacity(254);
        for host in 1u8..255 {
            let ip = Ipv4Addr::new(a, b, c, host);
            if ip == self_ip {
                continue;
            }
            let registry = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                registry.probe_one(ip, port).await;
            }));
        }
        for task in tasks {
            let _ = task.await;
        }

        self.sweep_failed_peers();
    }

    async fn probe_one(&self, ip: Ipv4Addr, port: u16) {
        let url = format!("http://{ip}:{port}/__cluster/probe");
        let result = self
            .client
            .get(&url)
            .send()
            .await
            .ok()
            .and_then(|r| r.error_for_status().ok());

        match result {
            Some(resp) => match resp.json::<NodeDescriptor>().await {
                Ok(descriptor) => self.record_success(descriptor),
                Err(e) => {
                    tracing::debug!(%ip, error = %e, "probe response was not a valid descriptor")
                }
            },
            None => self.record_failure_for_ip(ip),
        }
    }

    fn record_success(&self, descriptor: NodeDescriptor) {
        let mut peers = self.peers.write();
        let is_new = !peers.contains_key(&descriptor.id);
        peers.insert(
            descriptor.id.clone(),
            PeerState {
                descriptor: descriptor.clone(),
                consecutive_failures: 0,
                last_seen: Instant::now(),
            },
        );
        drop(peers);
        if is_new {
            let _ = self.events.send(PeerEvent::Joined(descriptor));
        }
    }

    fn record_failure_for_ip(&self, ip: Ipv4Addr) {
        let mut peers = self.peers.write();
        if let Some(id) = peers
            .iter()
            .find(|(_, s)| s.descriptor.ip == ip)
            .map(|(id, _)| id.clone())
        {
            if let Some(state) = peers.get_mut(&id) {
                state.consecutive_failures += 1;
            }
        }
    }

    /// Declares lost any peer at or beyond `fail_threshold` consecutive
    /// failures, removing it from the registry and emitting
    /// [`PeerEvent::Lost`].
    fn sweep_failed_peers(&self) {
        let lost: Vec<NodeId> = {
            let peers = self.peers.read();
            peers
                .iter()
                .filter(|(_, s)| s.consecutive_failures >= self.config.fail_threshold)
                .map(|(id, _)| id.clone())
                .collect()
        };
        if lost.is_empty() {
            return;
        }
        let mut peers = self.peers.write();
        for id in &lost {
            peers.remove(id);
        }
        drop(peers);
        for id in lost {
            let _ = self.events.send(PeerEvent::Lost(id));
        }
    }

    /// Runs [`Registry::probe_sweep`] on `config.probe_interval` forever.
    /// Intended to be spawned as its own task by `node::Node::start`.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.probe_interval);
        loop {
            ticker.tick().await;
            self.probe_sweep().await;
        }
    }

    /// Returns the staleness (time since last successful probe) of `id`, if
    /// it is currently known.
    #[must_use]
    pub fn staleness_of(&self, id: &str) -> Option<Duration> {
        self.peers.read().get(id).map(|s| s.last_seen.elapsed())
    }
}
