//! Directory and file node encoding.
//!
//! The pipeline treats node payloads as opaque bytes; this module is the one
//! place that knows their layout. [`DagPbCodec`] writes dag-pb nodes with
//! UnixFS data so archives open in standard IPFS tooling:
//!
//! ```text
//! PBNode { Links: [PBLink { Hash, Name, Tsize }...], Data: UnixFS }
//! ```
//!
//! Links are written in the order given. They are never re-sorted: child
//! order is the traversal order used to build the tree.

use crate::cid::{Codec, ContentId};
use crate::error::{Error, Result};
use crate::varint::{append_varint, decode_varint};

// Protobuf wire types
const WIRE_VARINT: u64 = 0;
const WIRE_LEN: u64 = 2;

// UnixFS data types
const UNIXFS_DIRECTORY: u64 = 1;
const UNIXFS_FILE: u64 = 2;

/// A named reference from a node to a child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Entry name (empty for file chunk links).
    pub name: String,
    /// Identifier of the child.
    pub cid: ContentId,
    /// Cumulative size of the child DAG in bytes.
    pub size: u64,
}

impl Link {
    pub fn new(name: impl Into<String>, cid: ContentId, size: u64) -> Self {
        Self {
            name: name.into(),
            cid,
            size,
        }
    }
}

/// A serialized node together with its identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedNode {
    pub cid: ContentId,
    pub payload: Vec<u8>,
    /// Payload length plus the cumulative size of every child.
    pub size: u64,
}

/// Serializes directory child lists into node payloads.
pub trait NodeCodec: Send + Sync {
    /// Codec recorded in the identifiers of encoded nodes.
    fn codec(&self) -> Codec;

    /// Serialize a directory with the given children, in order.
    fn encode_directory(&self, links: &[Link]) -> Vec<u8>;

    /// Serialize a directory and derive its identifier.
    fn seal_directory(&self, links: &[Link]) -> SealedNode {
        let payload = self.encode_directory(links);
        seal(self.codec(), payload, links)
    }
}

/// dag-pb + UnixFS node codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct DagPbCodec;

impl NodeCodec for DagPbCodec {
    fn codec(&self) -> Codec {
        Codec::DagPb
    }

    fn encode_directory(&self, links: &[Link]) -> Vec<u8> {
        let mut data = Vec::with_capacity(2);
        append_varint_field(&mut data, 1, UNIXFS_DIRECTORY);
        encode_pb_node(links, &data)
    }
}

/// Build the dag-pb node for a file split into several chunks.
///
/// `links` are the chunks in file order; their sizes are the chunk lengths.
pub fn seal_file(links: &[Link]) -> SealedNode {
    let filesize: u64 = links.iter().map(|l| l.size).sum();

    let mut data = Vec::new();
    append_varint_field(&mut data, 1, UNIXFS_FILE);
    append_varint_field(&mut data, 3, filesize);
    for link in links {
        append_varint_field(&mut data, 4, link.size);
    }

    seal(Codec::DagPb, encode_pb_node(links, &data), links)
}

fn seal(codec: Codec, payload: Vec<u8>, links: &[Link]) -> SealedNode {
    let cid = ContentId::blake3(codec, &payload);
    let size = payload.len() as u64 + links.iter().map(|l| l.size).sum::<u64>();
    SealedNode { cid, payload, size }
}

fn encode_pb_node(links: &[Link], data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut link_buf = Vec::new();

    for link in links {
        link_buf.clear();
        append_bytes_field(&mut link_buf, 1, link.cid.as_bytes());
        if !link.name.is_empty() {
            append_bytes_field(&mut link_buf, 2, link.name.as_bytes());
        }
        append_varint_field(&mut link_buf, 3, link.size);
        append_bytes_field(&mut buf, 2, &link_buf);
    }

    append_bytes_field(&mut buf, 1, data);
    buf
}

fn append_key(buf: &mut Vec<u8>, field: u64, wire_type: u64) {
    append_varint(buf, (field << 3) | wire_type);
}

fn append_varint_field(buf: &mut Vec<u8>, field: u64, value: u64) {
    append_key(buf, field, WIRE_VARINT);
    append_varint(buf, value);
}

fn append_bytes_field(buf: &mut Vec<u8>, field: u64, bytes: &[u8]) {
    append_key(buf, field, WIRE_LEN);
    append_varint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// A protobuf field as (number, value).
enum Field<'a> {
    Varint(u64, u64),
    Bytes(u64, &'a [u8]),
}

fn read_field<'a>(data: &'a [u8], offset: &mut usize) -> Result<Field<'a>> {
    let (key, used) = decode_varint(&data[*offset..])?;
    *offset += used;
    let field = key >> 3;

    match key & 0x7 {
        WIRE_VARINT => {
            let (value, used) = decode_varint(&data[*offset..])?;
            *offset += used;
            Ok(Field::Varint(field, value))
        }
        WIRE_LEN => {
            let (len, used) = decode_varint(&data[*offset..])?;
            *offset += used;
            let end = offset
                .checked_add(len as usize)
                .filter(|&end| end <= data.len())
                .ok_or_else(|| Error::invalid_frame("protobuf field overruns node"))?;
            let bytes = &data[*offset..end];
            *offset = end;
            Ok(Field::Bytes(field, bytes))
        }
        other => Err(Error::invalid_frame(format!(
            "unsupported protobuf wire type {}",
            other
        ))),
    }
}

/// Decode the links of a dag-pb node, in stored order.
pub fn decode_links(payload: &[u8]) -> Result<Vec<Link>> {
    let mut links = Vec::new();
    let mut offset = 0;

    while offset < payload.len() {
        if let Field::Bytes(2, link_bytes) = read_field(payload, &mut offset)? {
            let mut cid = None;
            let mut name = String::new();
            let mut size = 0;
            let mut inner = 0;

            while inner < link_bytes.len() {
                match read_field(link_bytes, &mut inner)? {
                    Field::Bytes(1, bytes) => cid = Some(ContentId::from_bytes(bytes)?),
                    Field::Bytes(2, bytes) => {
                        name = String::from_utf8(bytes.to_vec()).map_err(|e| {
                            Error::invalid_frame(format!("link name is not UTF-8: {}", e))
                        })?
                    }
                    Field::Varint(3, value) => size = value,
                    _ => {}
                }
            }

            let cid = cid.ok_or_else(|| Error::invalid_frame("link without hash"))?;
            links.push(Link { name, cid, size });
        }
    }

    Ok(links)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(name: &str, data: &[u8]) -> Link {
        Link::new(name, ContentId::blake3(Codec::Raw, data), data.len() as u64)
    }

    #[test]
    fn test_empty_directory_payload() {
        let payload = DagPbCodec.encode_directory(&[]);
        // Data field holding UnixFS { Type: Directory }
        assert_eq!(payload, vec![0x0a, 0x02, 0x08, 0x01]);
    }

    #[test]
    fn test_directory_links_roundtrip_in_order() {
        let links = vec![leaf("zeta.txt", b"z"), leaf("alpha.txt", b"alpha")];
        let payload = DagPbCodec.encode_directory(&links);
        assert_eq!(decode_links(&payload).unwrap(), links);
    }

    #[test]
    fn test_child_order_changes_identifier() {
        let a = leaf("a", b"1");
        let b = leaf("b", b"2");
        let forward = DagPbCodec.seal_directory(&[a.clone(), b.clone()]);
        let reverse = DagPbCodec.seal_directory(&[b, a]);
        assert_ne!(forward.cid, reverse.cid);
    }

    #[test]
    fn test_sealed_size_is_cumulative() {
        let links = vec![leaf("a", b"12345"), leaf("b", b"678")];
        let sealed = DagPbCodec.seal_directory(&links);
        assert_eq!(sealed.size, sealed.payload.len() as u64 + 8);
        assert_eq!(sealed.cid.codec(), Codec::DagPb.code());
        assert_eq!(sealed.cid, ContentId::blake3(Codec::DagPb, &sealed.payload));
    }

    #[test]
    fn test_file_node_links_have_no_names() {
        let chunks = vec![leaf("", b"first"), leaf("", b"second")];
        let sealed = seal_file(&chunks);
        let decoded = decode_links(&sealed.payload).unwrap();
        assert_eq!(decoded, chunks);
        assert!(decoded.iter().all(|l| l.name.is_empty()));
    }

    #[test]
    fn test_decode_rejects_overrun() {
        assert!(decode_links(&[0x12, 0x05, 0x00]).is_err());
    }

    use proptest::prelude::*;

    proptest! {
        /// Identical child lists always seal to the same identifier
        #[test]
        fn prop_seal_deterministic(
            names in prop::collection::vec("[a-z0-9._-]{1,16}", 0..12)
        ) {
            let links: Vec<Link> = names
                .iter()
                .map(|n| leaf(n, n.as_bytes()))
                .collect();
            let first = DagPbCodec.seal_directory(&links);
            let second = DagPbCodec.seal_directory(&links);
            prop_assert_eq!(first, second);
            prop_assert_eq!(decode_links(&DagPbCodec.encode_directory(&links))?, links);
        }
    }
}
