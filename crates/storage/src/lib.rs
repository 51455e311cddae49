//! # Storage — row/table glue and on-disk layout
//!
//! Ties the [`engine`] LSM engine, the [`btree`] secondary-index engine, and
//! the [`replication`] replica directory into the row-level contract the
//! rest of the node builds on: a [`Database`] is a named set of [`Table`]s,
//! each of which owns one LSM engine plus its maintained indexes and its
//! replica directory, and knows how to persist its own `storage.file`,
//! `replica.file`, and `index.<col>.file` per the on-disk layout.
//!
//! This crate is deliberately thin glue — it owns no background threads of
//! its own; the `scheduler` crate drives [`Table::persist`] and
//! [`Table::maybe_compact`] on a tick, and `node` drives recovery ordering
//! across every table.

mod auto_index;
mod column;
mod database;
mod error;
mod table;

pub use auto_index::AutoIndexTracker;
pub use column::encode_column;
pub use database::Database;
pub use error::StorageError;
pub use table::Table;
