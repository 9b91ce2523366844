//! Interfaces of the chunking and packaging collaborators.
//!
//! The pipeline only talks to these traits; [`crate::chunker::CdcChunker`]
//! and [`crate::archive::ArchiveSplitter`] are the implementations shipped
//! with the crate.

use crate::error::Result;
use crate::input::FileUnit;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;

/// One input file handed to a chunking engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    /// Identifying key, echoed back in the descriptor's `path` field.
    pub key: String,
    /// Where the content lives.
    pub path: PathBuf,
    /// Size at expansion time.
    pub size: u64,
}

impl Part {
    pub fn from_unit(unit: &FileUnit) -> Self {
        Self {
            key: unit.key(),
            path: unit.path.clone(),
            size: unit.size,
        }
    }

    /// Open the content for reading.
    pub fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(&self.path)?))
    }
}

/// Turns file contents into content-addressed blocks.
pub trait ChunkingEngine: Send {
    /// Chunk every part in order.
    ///
    /// Blocks go to `blocks` as frames. For each part, exactly one
    /// newline-terminated JSON descriptor naming the part's root block goes
    /// to `descriptors`, in part order. Implementations must not close either
    /// stream; the caller does that.
    fn process(
        &mut self,
        parts: &[Part],
        blocks: &mut dyn Write,
        descriptors: &mut dyn Write,
    ) -> Result<()>;
}

/// Turns a frame stream into archive files.
pub trait PackagingEngine: Send {
    /// Consume `frames` to end-of-stream.
    fn package(&mut self, frames: &mut dyn Read) -> Result<PackageReport>;
}

/// Metadata for one produced archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveMeta {
    /// File name of the archive (set even on dry runs).
    pub name: String,
    /// Full path of the written archive, absent on dry runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Hex BLAKE3 digest of the archive bytes.
    pub digest: String,
    /// Bytes taken by the archive header.
    pub header_size: u64,
    /// Bytes taken by frames.
    pub content_size: u64,
    pub frame_count: u64,
}

impl ArchiveMeta {
    pub fn total_size(&self) -> u64 {
        self.header_size + self.content_size
    }
}

/// What a packaging engine produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageReport {
    pub archives: Vec<ArchiveMeta>,
    pub frames: u64,
    pub bytes: u64,
    pub dry_run: bool,
}
