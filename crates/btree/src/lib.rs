//! # B-Tree — disk-backed secondary index
//!
//! An ordered `column-value -> row-id` index per `(database, table, column)`,
//! maintained synchronously in memory as rows are inserted, updated and
//! deleted, and persisted by the storage scheduler in the same tick that
//! persists the row and replica maps (see the `scheduler` crate).
//!
//! Column values are encoded to byte strings via [`encode_str`] (lexical,
//! for text columns) or [`encode_i64`] (big-endian two's complement, for
//! integer columns) before being inserted — the index itself only ever
//! compares raw bytes, so adding a new column type is a matter of adding
//! another encoder, not touching the tree.

mod error;
mod index;
mod key;

pub use error::IndexLoadError;
pub use index::BTreeIndex;
pub use key::{decode_i64, encode_i64, encode_str};
