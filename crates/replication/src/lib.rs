//! # Replication — the replica directory
//!
//! Tracks, for every row in a table, which two live peers hold a copy
//! (`primary`, `secondary`), propagates mutations to them, and reassigns a
//! row's holders when [`cluster::PeerEvent::Lost`] fires. The directory
//! never talks to `storage` directly — it's handed an `Arc<dyn RowSource>`
//! at construction so it can fetch a row's payload for a `CLAIM_ROW` without
//! creating a dependency cycle between the two crates.

mod assignment;
mod directory;
mod error;

pub use assignment::{Assignment, ReplicaMap};
pub use directory::{ReplicaDirectory, RowSource};
pub use error::ReplicaLoadError;
