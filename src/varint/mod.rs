//! Variable-length unsigned integer codec used to pack records into pieces.
//!
//! Every `(key, value)` pair stored in a bucket is written as two
//! back-to-back varints.  Small keys and values dominate real workloads,
//! so most records take 2–6 bytes instead of the 16 a fixed-width layout
//! would need, which lets a 63-byte piece hold several of them.
//!
//! # Wire format
//!
//! Little-endian base-128:
//!
//! | byte bits | meaning                                           |
//! |-----------|---------------------------------------------------|
//! | `0..7`    | next 7 value bits, least significant group first  |
//! | `7`       | continuation: `1` = more bytes follow             |
//!
//! A `u64` encodes to 1–10 bytes ([`MAX_VARINT_LEN`]).
//!
//! # Zero-panic guarantee
//!
//! [`decode`] never indexes past the end of its input.  Truncated input
//! and encodings wider than 64 bits are reported through [`VarintError`].
//! [`encode`] requires a buffer of at least [`encoded_len`] bytes; the
//! engine always encodes into a [`MAX_RECORD_SIZE`]-byte scratch array.

#[cfg(test)]
mod tests;

use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Limits
// ------------------------------------------------------------------------------------------------

/// Maximum number of bytes a single `u64` occupies once encoded.
pub const MAX_VARINT_LEN: usize = 10;

/// Maximum number of bytes an encoded `(key, value)` record occupies.
pub const MAX_RECORD_SIZE: usize = 2 * MAX_VARINT_LEN;

const CONTINUATION: u8 = 0x80;
const PAYLOAD_MASK: u8 = 0x7f;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors produced while decoding a varint.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VarintError {
    /// The buffer ended while the continuation bit was still set.
    #[error("truncated varint after {consumed} bytes")]
    Truncated {
        /// Bytes read before the input ran out.
        consumed: usize,
    },

    /// The encoding carries more than 64 significant bits.
    #[error("varint exceeds 64 bits")]
    Overflow,
}

// ------------------------------------------------------------------------------------------------
// Codec
// ------------------------------------------------------------------------------------------------

/// Number of bytes `value` occupies once encoded.
#[inline]
pub fn encoded_len(value: u64) -> usize {
    let bits = 64 - (value | 1).leading_zeros() as usize;
    bits.div_ceil(7)
}

/// Encode `value` at the start of `buf`, returning the number of bytes written.
///
/// # Panics
///
/// Panics if `buf` is shorter than [`encoded_len`]`(value)`.
#[inline]
pub fn encode(mut value: u64, buf: &mut [u8]) -> usize {
    let mut i = 0;
    while value >= u64::from(CONTINUATION) {
        buf[i] = (value as u8) | CONTINUATION;
        value >>= 7;
        i += 1;
    }
    buf[i] = value as u8;
    i + 1
}

/// Decode one varint from the start of `buf`.
///
/// Returns `(value, bytes_consumed)`.
#[inline]
pub fn decode(buf: &[u8]) -> Result<(u64, usize), VarintError> {
    let mut value = 0u64;
    for (i, &byte) in buf.iter().enumerate().take(MAX_VARINT_LEN) {
        let group = u64::from(byte & PAYLOAD_MASK);
        let shift = 7 * i as u32;
        // The tenth byte may only contribute the single remaining bit.
        if i == MAX_VARINT_LEN - 1 && group > 1 {
            return Err(VarintError::Overflow);
        }
        value |= group << shift;
        if byte & CONTINUATION == 0 {
            return Ok((value, i + 1));
        }
    }
    if buf.len() >= MAX_VARINT_LEN {
        Err(VarintError::Overflow)
    } else {
        Err(VarintError::Truncated {
            consumed: buf.len(),
        })
    }
}

// ------------------------------------------------------------------------------------------------
// Records
// ------------------------------------------------------------------------------------------------

/// Encode a `(key, value)` record into a fixed scratch buffer.
///
/// Returns the buffer and the number of meaningful bytes at its start.
#[inline]
pub fn encode_record(key: u64, value: u64) -> ([u8; MAX_RECORD_SIZE], usize) {
    let mut buf = [0u8; MAX_RECORD_SIZE];
    let key_len = encode(key, &mut buf);
    let value_len = encode(value, &mut buf[key_len..]);
    (buf, key_len + value_len)
}

/// Decode one `(key, value)` record from the start of `buf`.
///
/// Returns `(key, value, bytes_consumed)`.
#[inline]
pub fn decode_record(buf: &[u8]) -> Result<(u64, u64, usize), VarintError> {
    let (key, key_len) = decode(buf)?;
    let (value, value_len) = decode(&buf[key_len..]).map_err(|e| match e {
        VarintError::Truncated { consumed } => VarintError::Truncated {
            consumed: key_len + consumed,
        },
        other => other,
    })?;
    Ok((key, value, key_len + value_len))
}

/// Encoded size of the record `(key, value)`.
#[inline]
pub fn record_len(key: u64, value: u64) -> usize {
    encoded_len(key) + encoded_len(value)
}
