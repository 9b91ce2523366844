//! Content-defined chunking using FastCDC.

use crate::cid::{Codec, ContentId};
use crate::engine::{ChunkingEngine, Part};
use crate::error::{Error, Result};
use crate::frame::write_frame;
use crate::node::{Link, seal_file};
use crate::records::RootRecord;
use fastcdc::v2020::{self, StreamCDC};
use std::io::Write;
use tracing::{debug, instrument, trace};

/// Configuration for the chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Minimum chunk size in bytes.
    pub min_size: u32,
    /// Average (target) chunk size in bytes.
    pub avg_size: u32,
    /// Maximum chunk size in bytes.
    pub max_size: u32,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_size: 256 * 1024,  // 256 KB
            avg_size: 512 * 1024,  // 512 KB
            max_size: 1024 * 1024, // 1 MB
        }
    }
}

impl ChunkerConfig {
    /// Check the sizes against the ranges FastCDC accepts.
    pub fn validate(&self) -> Result<()> {
        let ranges = [
            ("min", self.min_size, v2020::MINIMUM_MIN, v2020::MINIMUM_MAX),
            ("avg", self.avg_size, v2020::AVERAGE_MIN, v2020::AVERAGE_MAX),
            ("max", self.max_size, v2020::MAXIMUM_MIN, v2020::MAXIMUM_MAX),
        ];
        for (name, value, low, high) in ranges {
            if !(low..=high).contains(&value) {
                return Err(Error::chunking(format!(
                    "{} chunk size {} outside of {}..={}",
                    name, value, low, high
                )));
            }
        }
        if !(self.min_size <= self.avg_size && self.avg_size <= self.max_size) {
            return Err(Error::chunking(format!(
                "chunk sizes must satisfy min <= avg <= max, got {}/{}/{}",
                self.min_size, self.avg_size, self.max_size
            )));
        }
        Ok(())
    }
}

/// Chunking engine writing every chunk as a `raw` block.
///
/// A file with one chunk is rooted at that block. A file with several chunks
/// gets a dag-pb file node linking them, framed after the chunks. An empty
/// file is one empty block.
#[derive(Debug, Clone, Default)]
pub struct CdcChunker {
    config: ChunkerConfig,
}

impl CdcChunker {
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Chunk one part, returning its root record.
    fn chunk_part(&self, part: &Part, blocks: &mut dyn Write) -> Result<RootRecord> {
        let source = part.open()?;
        let chunker = StreamCDC::new(
            source,
            self.config.min_size,
            self.config.avg_size,
            self.config.max_size,
        );

        let mut links = Vec::new();
        for chunk in chunker {
            let chunk = chunk.map_err(|e| match e {
                fastcdc::v2020::Error::IoError(source) => Error::Io { source },
                other => Error::chunking(format!("{}: {}", part.key, other)),
            })?;
            let cid = ContentId::blake3(Codec::Raw, &chunk.data);
            write_frame(blocks, &cid, &chunk.data)?;
            trace!(key = %part.key, offset = chunk.offset, len = chunk.length, "Wrote chunk");
            links.push(Link::new("", cid, chunk.length as u64));
        }

        let record = match links.len() {
            0 => {
                let cid = ContentId::blake3(Codec::Raw, &[]);
                write_frame(blocks, &cid, &[])?;
                RootRecord::new(cid).with_size(0)
            }
            1 => {
                let link = links.remove(0);
                RootRecord::new(link.cid).with_size(link.size)
            }
            _ => {
                let node = seal_file(&links);
                write_frame(blocks, &node.cid, &node.payload)?;
                RootRecord::new(node.cid).with_size(node.size)
            }
        };

        Ok(record.with_path(part.key.clone()))
    }
}

impl ChunkingEngine for CdcChunker {
    #[instrument(skip_all, fields(parts = parts.len()))]
    fn process(
        &mut self,
        parts: &[Part],
        blocks: &mut dyn Write,
        descriptors: &mut dyn Write,
    ) -> Result<()> {
        for part in parts {
            let record = self.chunk_part(part, blocks)?;
            debug!(key = %part.key, cid = %record.cid, "Chunked file");
            descriptors.write_all(record.to_line()?.as_bytes())?;
        }
        blocks.flush()?;
        descriptors.flush()?;
        Ok(())
    }
}
