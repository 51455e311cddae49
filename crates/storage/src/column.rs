//! Extracts an indexable byte encoding for one column of a row's JSON
//! payload, per spec.md §4.7 ("lexicographic for strings, big-endian
//! two's-complement for integers").

use serde_json::Value;

/// Encodes `payload[column]` for use as a B-tree index key. Returns `None`
/// for a missing field or a JSON type the index format doesn't cover
/// (arrays, objects, booleans, floats) — such rows are simply left out of
/// the index, matching the teacher's general tolerance for heterogeneous
/// documents.
#[must_use]
pub fn encode_column(payload: &Value, column: &str) -> Option<Vec<u8>> {
    match payload.get(column)? {
        Value::String(s) => Some(btree::encode_str(s)),
        Value::Number(n) => n.as_i64().map(btree::encode_i64),
        _ => None,
    }
}
