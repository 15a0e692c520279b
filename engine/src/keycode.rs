//! Order-preserving binary key encoding.
//!
//! Keys are encoded such that the byte-wise ordering of the encoded form
//! matches the ordering of the original tuple: collection id, then document
//! key, then field id, compare the same way whether you compare the decoded
//! tuple or the raw bytes. This lets a prefix scan over encoded keys return
//! results in a meaningful order without decoding them first.
//!
//! Variable-length segments (strings, byte slices) are escaped so that a
//! 0x00 byte inside the segment can never be confused with the 0x00 0xff
//! terminator: every literal 0x00 becomes 0x00 0xff, and the segment ends
//! with 0x00 0x00.
//!
//! Fixed-width integers are encoded big-endian, which already preserves
//! unsigned ordering.

use crate::error::{CResult, Error};
use byteorder::{ReadBytesExt, WriteBytesExt, BE};
use std::io::Write;

/// Encodes a single byte-string segment with escaping, without a terminator.
/// Used for variable-length fields that are the *last* component of a key,
/// where no terminator is required.
pub fn encode_bytes_raw(bytes: &[u8]) -> Vec<u8> {
    bytes.to_vec()
}

/// Encodes a byte-string segment with 0x00 escaping and a 0x00 0x00 terminator,
/// for use when more segments follow.
pub fn encode_bytes(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + 2);
    for &b in bytes {
        if b == 0x00 {
            out.push(0x00);
            out.push(0xff);
        } else {
            out.push(b);
        }
    }
    out.push(0x00);
    out.push(0x00);
    out
}

/// Decodes a single escaped, terminated byte-string segment from the front
/// of `input`, returning the decoded bytes and the remaining input.
pub fn decode_bytes(input: &[u8]) -> CResult<(Vec<u8>, &[u8])> {
    let mut decoded = Vec::new();
    let mut iter = input.iter().enumerate();
    loop {
        match iter.next() {
            Some((i, 0x00)) => match input.get(i + 1) {
                Some(0x00) => return Ok((decoded, &input[i + 2..])),
                Some(0xff) => {
                    decoded.push(0x00);
                    iter.next();
                }
                _ => return Err(Error::Encoding("invalid key escape sequence".into())),
            },
            Some((_, b)) => decoded.push(*b),
            None => return Err(Error::Encoding("unterminated key segment".into())),
        }
    }
}

/// Encodes a u64 as 8 big-endian bytes, preserving unsigned ordering.
pub fn encode_u64(n: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(8);
    out.write_u64::<BE>(n).expect("writing to a Vec never fails");
    out
}

/// Decodes 8 big-endian bytes into a u64, returning the value and the
/// remaining input.
pub fn decode_u64(input: &[u8]) -> CResult<(u64, &[u8])> {
    if input.len() < 8 {
        return Err(Error::Encoding("insufficient bytes for u64".into()));
    }
    let (head, rest) = input.split_at(8);
    let n = (&head[..]).read_u64::<BE>().map_err(|e| Error::Encoding(e.to_string()))?;
    Ok((n, rest))
}

/// Encodes a u32 as 4 big-endian bytes, preserving unsigned ordering.
pub fn encode_u32(n: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(4);
    out.write_u32::<BE>(n).expect("writing to a Vec never fails");
    out
}

/// Decodes 4 big-endian bytes into a u32, returning the value and the
/// remaining input.
pub fn decode_u32(input: &[u8]) -> CResult<(u32, &[u8])> {
    if input.len() < 4 {
        return Err(Error::Encoding("insufficient bytes for u32".into()));
    }
    let (head, rest) = input.split_at(4);
    let n = (&head[..]).read_u32::<BE>().map_err(|e| Error::Encoding(e.to_string()))?;
    Ok((n, rest))
}

/// Concatenates already-encoded segments into a single key.
pub fn concat(segments: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for s in segments {
        out.write_all(s).expect("writing to a Vec never fails");
    }
    out
}
