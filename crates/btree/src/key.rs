//! Byte encodings for indexed column values.
//!
//! The B-tree orders purely on raw key bytes, so every column type must
//! encode to a byte string whose lexicographic order matches the column's
//! natural order.

/// Encodes a UTF-8 string for lexicographic byte ordering.
///
/// Raw UTF-8 bytes already sort identically to `str`'s own `Ord` for valid
/// strings, so no transformation is needed.
#[must_use]
pub fn encode_str(value: &str) -> Vec<u8> {
    value.as_bytes().to_vec()
}

/// Encodes a signed 64-bit integer as big-endian two's complement, per the
/// specification's column-encoding rule.
///
/// Note this only preserves ordering within a single sign: because two's
/// complement sets the high bit for negative numbers, an unsigned
/// byte-lexicographic comparison places every negative value after every
/// non-negative one. Columns that mix signs would need the sign bit
/// flipped to sort correctly end-to-end; the specification calls for plain
/// two's complement, so that is what this encodes.
#[must_use]
pub fn encode_i64(value: i64) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

/// Decodes bytes produced by [`encode_i64`] back into an `i64`.
///
/// # Panics
/// Panics if `bytes` is not exactly 8 bytes long.
#[must_use]
pub fn decode_i64(bytes: &[u8]) -> i64 {
    let arr: [u8; 8] = bytes.try_into().expect("encode_i64 output is always 8 bytes");
    i64::from_be_bytes(arr)
}
