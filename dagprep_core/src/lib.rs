//! # dagprep core
//!
//! Prepares file trees for storage as content-addressed archives.
//!
//! Every file is chunked into content-addressed blocks, the input hierarchy is
//! rebuilt as a single-rooted directory DAG, and all blocks plus the directory
//! nodes are streamed as length-prefixed frames into size-bounded archives.
//!
//! ## Features
//!
//! - Deterministic directory DAG: same input tree, same root identifier
//! - Single input directories are published as themselves, not wrapped in
//!   their parent directories
//! - Chunking and packaging behind traits, with FastCDC and CAR-style
//!   splitting shipped as defaults
//! - Bounded waits between pipeline stages
//!
//! ## Example
//!
//! ```no_run
//! use dagprep_core::{
//!     ArchiveSplitter, CdcChunker, Pipeline, PipelineConfig, SplitterConfig, expand_inputs,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let inputs = expand_inputs(&["./my-data"])?;
//!
//! let mut chunker = CdcChunker::default();
//! let mut splitter = ArchiveSplitter::new(SplitterConfig {
//!     prefix: "my-data-".to_string(),
//!     ..SplitterConfig::default()
//! });
//!
//! let outcome = Pipeline::new(PipelineConfig::default()).run(&inputs, &mut chunker, &mut splitter)?;
//! println!("root cid = {}", outcome.root_cid);
//! # Ok(())
//! # }
//! ```

mod archive;
mod channel;
mod chunker;
mod cid;
mod emit;
mod engine;
mod error;
mod frame;
mod input;
mod metadata;
mod node;
mod pipeline;
mod records;
mod resolve;
mod tree;
mod varint;

pub use archive::{ARCHIVE_HEADER, ArchiveSplitter, DEFAULT_TARGET_SIZE, SplitterConfig, read_archive};
pub use channel::{Busy, PipeReader, PipeWriter, Progress, pipe};
pub use chunker::{CdcChunker, ChunkerConfig};
pub use cid::{BLAKE3_CODE, Codec, ContentId};
pub use emit::{EmitStats, FrameEmitter, FramePolicy};
pub use engine::{ArchiveMeta, ChunkingEngine, PackageReport, PackagingEngine, Part};
pub use error::{Error, Result};
pub use frame::{Frame, FrameReader, encode_frame, write_frame};
pub use input::{FileUnit, InputPath, InputSet, expand_inputs};
pub use metadata::{DEFAULT_METADATA_FILE, MetadataFiles, write_csv, write_metadata, write_yaml, yaml_path};
pub use node::{DagPbCodec, Link, NodeCodec, SealedNode, decode_links, seal_file};
pub use pipeline::{Pipeline, PipelineConfig, PipelineOutcome};
pub use records::{RootRecord, collect_records};
pub use resolve::{Resolution, resolve_root};
pub use tree::{DirectoryNode, NodeSequence, assemble};
pub use varint::{decode_varint, encode_varint, read_varint};
