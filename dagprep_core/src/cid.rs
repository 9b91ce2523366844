//! Content identifiers (CIDv1) with BLAKE3 digests.
//!
//! Binary layout:
//! ```text
//! varint(version = 1) | varint(codec) | varint(hash code) | varint(digest len) | digest
//! ```
//!
//! The binary form is the key written in front of every frame. The string form
//! is multibase base32 (lower-case, unpadded, `b` prefix); base16 (`f` prefix)
//! is accepted when parsing.

use crate::error::{Error, Result};
use crate::varint::{append_varint, decode_varint};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Multihash code for BLAKE3.
pub const BLAKE3_CODE: u64 = 0x1e;

/// BLAKE3 digest size in bytes.
pub const DIGEST_SIZE: usize = 32;

/// Largest digest accepted when parsing foreign identifiers.
const MAX_DIGEST_LEN: u64 = 128;

const BASE32_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

/// Payload codecs produced by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// Raw data block.
    Raw,
    /// dag-pb node (directories and multi-chunk files).
    DagPb,
}

impl Codec {
    /// Multicodec code.
    pub fn code(self) -> u64 {
        match self {
            Codec::Raw => 0x55,
            Codec::DagPb => 0x70,
        }
    }

    /// Look up a codec by its multicodec code.
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0x55 => Some(Codec::Raw),
            0x70 => Some(Codec::DagPb),
            _ => None,
        }
    }

    /// Returns the multicodec name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Codec::Raw => "raw",
            Codec::DagPb => "dag-pb",
        }
    }
}

/// A version 1 content identifier.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentId {
    bytes: Vec<u8>,
    codec: u64,
    hash_code: u64,
    digest_start: usize,
}

impl ContentId {
    /// Identify `data` under `codec` using a BLAKE3 digest.
    pub fn blake3(codec: Codec, data: &[u8]) -> Self {
        let digest = blake3::hash(data);
        Self::from_parts(codec.code(), BLAKE3_CODE, digest.as_bytes())
    }

    /// Build an identifier from its components.
    pub fn from_parts(codec: u64, hash_code: u64, digest: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(digest.len() + 8);
        append_varint(&mut bytes, 1);
        append_varint(&mut bytes, codec);
        append_varint(&mut bytes, hash_code);
        append_varint(&mut bytes, digest.len() as u64);
        let digest_start = bytes.len();
        bytes.extend_from_slice(digest);

        Self {
            bytes,
            codec,
            hash_code,
            digest_start,
        }
    }

    /// Parse an identifier from the front of `data`.
    ///
    /// Returns the identifier and the number of bytes it occupies, so callers
    /// can split a frame body into key and payload.
    pub fn read_prefix(data: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        let mut next = |what: &str| -> Result<u64> {
            let (value, used) = decode_varint(&data[offset..])
                .map_err(|e| Error::invalid_cid(format!("bad {}: {}", what, e)))?;
            offset += used;
            Ok(value)
        };

        let version = next("version")?;
        if version != 1 {
            return Err(Error::invalid_cid(format!(
                "unsupported version {} (only CIDv1 is supported)",
                version
            )));
        }
        let codec = next("codec")?;
        let hash_code = next("hash code")?;
        let digest_len = next("digest length")?;

        if digest_len > MAX_DIGEST_LEN {
            return Err(Error::invalid_cid(format!(
                "digest length {} exceeds {}",
                digest_len, MAX_DIGEST_LEN
            )));
        }

        let digest_start = offset;
        let end = digest_start + digest_len as usize;
        if data.len() < end {
            return Err(Error::invalid_cid(format!(
                "digest truncated: need {} bytes, have {}",
                digest_len,
                data.len() - digest_start
            )));
        }

        Ok((
            Self {
                bytes: data[..end].to_vec(),
                codec,
                hash_code,
                digest_start,
            },
            end,
        ))
    }

    /// Parse an identifier that must span all of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (cid, used) = Self::read_prefix(bytes)?;
        if used != bytes.len() {
            return Err(Error::invalid_cid(format!(
                "{} trailing bytes",
                bytes.len() - used
            )));
        }
        Ok(cid)
    }

    /// Parse the multibase string form.
    pub fn parse(s: &str) -> Result<Self> {
        let mut chars = s.chars();
        let bytes = match chars.next() {
            Some('b') => base32_decode(chars.as_str())?,
            Some('f') | Some('F') => hex::decode(chars.as_str())
                .map_err(|e| Error::invalid_cid(format!("invalid base16: {}", e)))?,
            Some('Q') => return Err(Error::invalid_cid("CIDv0 is not supported")),
            Some(other) => {
                return Err(Error::invalid_cid(format!(
                    "unsupported multibase prefix '{}'",
                    other
                )));
            }
            None => return Err(Error::invalid_cid("empty string")),
        };
        Self::from_bytes(&bytes)
    }

    /// Binary key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Multicodec code of the identified payload.
    pub fn codec(&self) -> u64 {
        self.codec
    }

    /// Multihash function code.
    pub fn hash_code(&self) -> u64 {
        self.hash_code
    }

    /// Raw digest bytes.
    pub fn digest(&self) -> &[u8] {
        &self.bytes[self.digest_start..]
    }

    /// Multibase base32 string form.
    pub fn to_base32(&self) -> String {
        let mut out = String::with_capacity(1 + self.bytes.len() * 8 / 5 + 1);
        out.push('b');
        base32_encode_into(&self.bytes, &mut out);
        out
    }

    /// Multibase base16 string form.
    pub fn to_base16(&self) -> String {
        format!("f{}", hex::encode(&self.bytes))
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base32())
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", self.to_base32())
    }
}

impl FromStr for ContentId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for ContentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

fn base32_encode_into(data: &[u8], out: &mut String) {
    let mut buffer: u32 = 0;
    let mut bits = 0;
    for &byte in data {
        buffer = (buffer << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(BASE32_ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }
}

fn base32_decode(s: &str) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(s.len() * 5 / 8);
    let mut buffer: u32 = 0;
    let mut bits = 0;
    for c in s.bytes() {
        let value = match c {
            b'a'..=b'z' => c - b'a',
            b'2'..=b'7' => c - b'2' + 26,
            _ => {
                return Err(Error::invalid_cid(format!(
                    "invalid base32 character '{}'",
                    c as char
                )));
            }
        };
        buffer = (buffer << 5) | u32::from(value);
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
        }
        buffer &= (1 << bits) - 1;
    }
    if buffer != 0 {
        return Err(Error::invalid_cid("non-canonical base32 padding bits"));
    }
    Ok(out)
}
