//! Unsigned LEB128 variable-length integers.
//!
//! Every byte carries seven payload bits, least significant group first; the
//! high bit marks that another byte follows. A `u64` needs at most ten bytes.

use crate::error::{Error, Result};
use std::io::{ErrorKind, Read};

/// Maximum encoded length of a `u64`.
pub const MAX_VARINT_LEN: usize = 10;

/// Append the encoding of `value` to `buf`.
pub fn append_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

/// Encode `value` into a fresh buffer.
pub fn encode_varint(value: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MAX_VARINT_LEN);
    append_varint(&mut buf, value);
    buf
}

/// Number of bytes `value` occupies when encoded.
pub fn varint_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

/// Decode a varint from the front of `data`.
///
/// Returns the value and the number of bytes consumed.
pub fn decode_varint(data: &[u8]) -> Result<(u64, usize)> {
    let mut value: u64 = 0;
    for (i, &byte) in data.iter().enumerate().take(MAX_VARINT_LEN) {
        let group = u64::from(byte & 0x7f);
        if i == MAX_VARINT_LEN - 1 && group > 1 {
            return Err(Error::invalid_varint("value overflows u64"));
        }
        value |= group << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }

    if data.len() >= MAX_VARINT_LEN {
        Err(Error::invalid_varint("value overflows u64"))
    } else {
        Err(Error::invalid_varint(format!(
            "truncated after {} bytes",
            data.len()
        )))
    }
}

/// Read a varint from a stream.
///
/// Returns `Ok(None)` when the stream ends cleanly before the first byte,
/// which is how frame readers detect end-of-stream.
pub fn read_varint<R: Read>(reader: &mut R) -> Result<Option<u64>> {
    let mut buf = [0u8; MAX_VARINT_LEN];
    let mut len = 0;

    loop {
        let mut byte = [0u8; 1];
        match reader.read(&mut byte) {
            Ok(0) if len == 0 => return Ok(None),
            Ok(0) => {
                return Err(Error::invalid_varint(format!(
                    "stream ended after {} bytes",
                    len
                )));
            }
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }

        if len == MAX_VARINT_LEN {
            return Err(Error::invalid_varint("value overflows u64"));
        }
        buf[len] = byte[0];
        len += 1;

        if byte[0] & 0x80 == 0 {
            let (value, _) = decode_varint(&buf[..len])?;
            return Ok(Some(value));
        }
    }
}
