//! Length-prefixed frames carrying one block each.
//!
//! ```text
//! varint(len(key) + len(payload)) | key | payload
//! ```
//!
//! Frames follow each other with no separator. The key is a binary
//! [`ContentId`], which is self-describing, so a reader can split the frame
//! body back into key and payload.

use crate::cid::ContentId;
use crate::error::{Error, Result};
use crate::varint::{append_varint, read_varint, varint_len};
use std::io::{self, Read, Write};

/// Upper bound on a single frame body; larger prefixes indicate corruption.
pub const MAX_FRAME_LEN: u64 = 256 * 1024 * 1024;

const INITIAL_BODY_CAPACITY: u64 = 64 * 1024;

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub cid: ContentId,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(cid: ContentId, payload: Vec<u8>) -> Self {
        Self { cid, payload }
    }

    /// Total encoded size including the length prefix.
    pub fn encoded_len(&self) -> usize {
        encoded_len(&self.cid, &self.payload)
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_frame(&self.cid, &self.payload)
    }
}

/// Total encoded size of a frame for `cid` and `payload`.
pub fn encoded_len(cid: &ContentId, payload: &[u8]) -> usize {
    let body = cid.as_bytes().len() + payload.len();
    varint_len(body as u64) + body
}

/// Encode a frame into a fresh buffer.
pub fn encode_frame(cid: &ContentId, payload: &[u8]) -> Vec<u8> {
    let key = cid.as_bytes();
    let body = key.len() + payload.len();
    let mut buf = Vec::with_capacity(varint_len(body as u64) + body);
    append_varint(&mut buf, body as u64);
    buf.extend_from_slice(key);
    buf.extend_from_slice(payload);
    buf
}

/// Write one frame with a single `write_all` so a pipe never sees half a frame
/// interleaved with another writer's data.
///
/// Returns the number of bytes written.
pub fn write_frame<W: Write + ?Sized>(
    writer: &mut W,
    cid: &ContentId,
    payload: &[u8],
) -> io::Result<usize> {
    let buf = encode_frame(cid, payload);
    writer.write_all(&buf)?;
    Ok(buf.len())
}

/// Reads frames from a byte stream.
pub struct FrameReader<R> {
    reader: R,
    frames_read: u64,
}

impl<R: Read> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            frames_read: 0,
        }
    }

    /// Read one length-prefixed section without interpreting it.
    ///
    /// Archive headers use the same prefix but carry no key.
    pub fn next_section(&mut self) -> Result<Option<Vec<u8>>> {
        let len = match read_varint(&mut self.reader)? {
            Some(len) => len,
            None => return Ok(None),
        };

        if len > MAX_FRAME_LEN {
            return Err(Error::invalid_frame(format!(
                "frame length {} exceeds limit {}",
                len, MAX_FRAME_LEN
            )));
        }

        // Grow with the bytes actually read; the prefix is untrusted.
        let mut body = Vec::with_capacity(len.min(INITIAL_BODY_CAPACITY) as usize);
        (&mut self.reader).take(len).read_to_end(&mut body)?;
        if body.len() as u64 != len {
            return Err(Error::invalid_frame(format!(
                "stream ended inside frame {} ({} of {} bytes)",
                self.frames_read,
                body.len(),
                len
            )));
        }

        self.frames_read += 1;
        Ok(Some(body))
    }

    /// Read the next frame, or `None` at a clean end-of-stream.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut body = match self.next_section()? {
            Some(body) => body,
            None => return Ok(None),
        };

        let (cid, key_len) = ContentId::read_prefix(&body).map_err(|e| {
            Error::invalid_frame(format!("frame {}: {}", self.frames_read - 1, e))
        })?;
        let payload = body.split_off(key_len);

        Ok(Some(Frame { cid, payload }))
    }

    /// Number of sections consumed so far.
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: Read> Iterator for FrameReader<R> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cid::Codec;
    use std::io::Cursor;

    #[test]
    fn test_encode_layout() {
        let cid = ContentId::blake3(Codec::Raw, b"abc");
        let encoded = encode_frame(&cid, b"abc");

        let body_len = cid.as_bytes().len() + 3;
        assert_eq!(encoded[0] as usize, body_len);
        assert_eq!(&encoded[1..1 + cid.as_bytes().len()], cid.as_bytes());
        assert_eq!(&encoded[encoded.len() - 3..], b"abc");
        assert_eq!(encoded.len(), encoded_len(&cid, b"abc"));
    }

    #[test]
    fn test_read_back_sequence() {
        let a = Frame::new(ContentId::blake3(Codec::Raw, b"a"), b"a".to_vec());
        let b = Frame::new(ContentId::blake3(Codec::DagPb, b"b"), vec![0u8; 300]);

        let mut stream = Vec::new();
        write_frame(&mut stream, &a.cid, &a.payload).unwrap();
        write_frame(&mut stream, &b.cid, &b.payload).unwrap();

        let frames: Vec<Frame> = FrameReader::new(Cursor::new(stream))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(frames, vec![a, b]);
    }

    #[test]
    fn test_empty_payload() {
        let cid = ContentId::blake3(Codec::Raw, b"");
        let stream = encode_frame(&cid, b"");
        let mut reader = FrameReader::new(Cursor::new(stream));
        let frame = reader.next_frame().unwrap().unwrap();
        assert_eq!(frame.cid, cid);
        assert!(frame.payload.is_empty());
        assert!(reader.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_truncated_frame() {
        let cid = ContentId::blake3(Codec::Raw, b"data");
        let mut stream = encode_frame(&cid, b"data");
        stream.truncate(stream.len() - 2);

        let mut reader = FrameReader::new(Cursor::new(stream));
        assert!(matches!(
            reader.next_frame(),
            Err(Error::InvalidFrame { .. })
        ));
    }

    #[test]
    fn test_oversized_prefix_rejected() {
        let mut stream = Vec::new();
        append_varint(&mut stream, MAX_FRAME_LEN + 1);
        let mut reader = FrameReader::new(Cursor::new(stream));
        assert!(reader.next_frame().is_err());
    }

    #[test]
    fn test_large_prefix_over_short_stream() {
        let mut stream = Vec::new();
        append_varint(&mut stream, MAX_FRAME_LEN);
        stream.extend_from_slice(b"tiny");

        let mut reader = FrameReader::new(Cursor::new(stream));
        match reader.next_section() {
            Err(Error::InvalidFrame { reason }) => assert!(reason.contains("4 of")),
            other => panic!("expected a truncated frame, got {:?}", other),
        }
    }

    #[test]
    fn test_section_without_key() {
        let mut stream = Vec::new();
        append_varint(&mut stream, 3);
        stream.extend_from_slice(b"hdr");
        let cid = ContentId::blake3(Codec::Raw, b"x");
        write_frame(&mut stream, &cid, b"x").unwrap();

        let mut reader = FrameReader::new(Cursor::new(stream));
        assert_eq!(reader.next_section().unwrap().unwrap(), b"hdr");
        assert_eq!(reader.next_frame().unwrap().unwrap().cid, cid);
        assert_eq!(reader.frames_read(), 2);
    }

    use proptest::prelude::*;

    proptest! {
        /// A frame read back from the stream carries the exact key and payload
        #[test]
        fn prop_frame_reads_back(
            seed in prop::collection::vec(any::<u8>(), 0..32),
            payload in prop::collection::vec(any::<u8>(), 0..2048),
        ) {
            let cid = ContentId::blake3(Codec::DagPb, &seed);
            let mut stream = Vec::new();
            let written = write_frame(&mut stream, &cid, &payload)?;
            prop_assert_eq!(written, stream.len());

            let frame = FrameReader::new(Cursor::new(stream)).next_frame()?.unwrap();
            prop_assert_eq!(frame.cid.as_bytes(), cid.as_bytes());
            prop_assert_eq!(frame.payload, payload);
        }
    }
}
