//! Three-stage pipeline: chunking, tree assembly, packaging.
//!
//! ```text
//!            descriptors                    (handoff)
//! chunking ---------------> core <------------------ chunking
//!     |                      |
//!     | blocks               | directory frames
//!     v                      v
//!   packaging <-------- same block stream
//! ```
//!
//! The chunking stage writes data blocks and one descriptor per file. When
//! it finishes, it closes the descriptor stream and hands its block writer
//! to the core stage, which appends the directory frames and closes the
//! block stream. The packaging stage reads the block stream to its end.
//!
//! Stall deadlines watch the whole upstream: every write by the chunking
//! stage, and the core stage's assembly work, keep the waiting readers armed.

use crate::channel::{self, PipeReader, PipeWriter, Progress};
use crate::cid::ContentId;
use crate::emit::{EmitStats, FrameEmitter, FramePolicy};
use crate::engine::{ChunkingEngine, PackageReport, PackagingEngine, Part};
use crate::error::{Error, Result};
use crate::input::InputSet;
use crate::node::{DagPbCodec, NodeCodec};
use crate::records::collect_records;
use crate::resolve::resolve_root;
use crate::tree::assemble;
use serde::Serialize;
use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument};

const CHUNKING: &str = "chunking";
const CORE: &str = "core";
const PACKAGING: &str = "packaging";

/// Configuration for [`Pipeline`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Longest a stage may wait while its upstream shows no activity. `None`
    /// waits forever.
    pub stall_timeout: Option<Duration>,
    /// Handling of directory frames that cannot be written.
    pub frame_policy: FramePolicy,
}

/// Result of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    /// Identifier of the published root.
    pub root_cid: ContentId,
    /// Path of the published root within the tree (empty for the super-root).
    pub root_path: String,
    /// Number of input files.
    pub files: usize,
    /// Directories assembled, including ancestors that were not emitted.
    pub directories: usize,
    pub emit: EmitStats,
    pub report: PackageReport,
}

struct CoreOutcome {
    root_cid: ContentId,
    root_path: String,
    directories: usize,
    emit: EmitStats,
}

/// Runs the stages for one set of inputs.
pub struct Pipeline {
    config: PipelineConfig,
    codec: Box<dyn NodeCodec>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

impl Pipeline {
    /// A pipeline sealing directories with [`DagPbCodec`].
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            codec: Box::new(DagPbCodec),
        }
    }

    /// Replace the directory node codec.
    pub fn with_codec(mut self, codec: Box<dyn NodeCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run all three stages and wait for every one of them to finish.
    #[instrument(skip_all, fields(files = inputs.units.len(), inputs = inputs.inputs.len()))]
    pub fn run<C, P>(
        &self,
        inputs: &InputSet,
        chunker: &mut C,
        packager: &mut P,
    ) -> Result<PipelineOutcome>
    where
        C: ChunkingEngine + ?Sized,
        P: PackagingEngine + ?Sized,
    {
        if inputs.units.is_empty() || inputs.inputs.is_empty() {
            return Err(Error::NoInput);
        }

        let start = Instant::now();
        let timeout = self.config.stall_timeout;
        let parts: Vec<Part> = inputs.units.iter().map(Part::from_unit).collect();

        let upstream = Progress::new();
        let (block_writer, block_reader) = channel::pipe();
        let (descriptor_writer, descriptor_reader) = channel::pipe();
        let block_writer = block_writer.with_progress(upstream.clone());
        let descriptor_writer = descriptor_writer.with_progress(upstream.clone());
        let (handoff_tx, handoff_rx) = mpsc::sync_channel::<PipeWriter>(1);

        let (chunked, core, packaged) = thread::scope(|scope| {
            let chunking = thread::Builder::new()
                .name(CHUNKING.to_string())
                .spawn_scoped(scope, || {
                    chunking_stage(chunker, &parts, block_writer, descriptor_writer, handoff_tx)
                });

            let core = thread::Builder::new()
                .name(CORE.to_string())
                .spawn_scoped(scope, || {
                    self.core_stage(
                        inputs,
                        descriptor_reader
                            .with_timeout(timeout)
                            .watching(upstream.clone()),
                        handoff_rx,
                        &upstream,
                    )
                });

            let packaging = thread::Builder::new()
                .name(PACKAGING.to_string())
                .spawn_scoped(scope, || {
                    let mut frames = block_reader
                        .with_timeout(timeout)
                        .watching(upstream.clone());
                    packager
                        .package(&mut frames)
                        .map_err(|e| stalled(PACKAGING, timeout, e))
                });

            (
                join(CHUNKING, chunking),
                join(CORE, core),
                join(PACKAGING, packaging),
            )
        });

        let (core, report) = match (chunked, core, packaged) {
            (Ok(()), Ok(core), Ok(report)) => (core, report),
            (chunked, core, packaged) => {
                let errors = [chunked.err(), core.err(), packaged.err()];
                return Err(root_cause(errors));
            }
        };

        info!(
            root = %core.root_cid,
            directories = core.directories,
            archives = report.archives.len(),
            duration_ms = start.elapsed().as_millis(),
            "Pipeline finished"
        );

        Ok(PipelineOutcome {
            root_cid: core.root_cid,
            root_path: core.root_path,
            files: inputs.units.len(),
            directories: core.directories,
            emit: core.emit,
            report,
        })
    }

    fn core_stage(
        &self,
        inputs: &InputSet,
        descriptors: PipeReader,
        handoff: Receiver<PipeWriter>,
        progress: &Progress,
    ) -> Result<CoreOutcome> {
        let timeout = self.config.stall_timeout;

        // Tree assembly needs every record, so drain to end-of-stream first.
        let records = collect_records(descriptors).map_err(|e| stalled(CORE, timeout, e))?;
        let mut blocks = receive_handoff(&handoff, timeout)?;

        // The block stream is quiet until the first directory frame.
        let _busy = progress.busy();
        let sequence = assemble(&inputs.units, records, &*self.codec)?;
        let resolution = resolve_root(&sequence, &inputs.inputs)?;
        let emit = FrameEmitter::new(self.config.frame_policy).emit(resolution.nodes(), &mut blocks)?;
        drop(blocks);

        Ok(CoreOutcome {
            root_cid: resolution.root_cid().clone(),
            root_path: resolution.root().path.clone(),
            directories: sequence.len(),
            emit,
        })
    }
}

fn chunking_stage<C: ChunkingEngine + ?Sized>(
    engine: &mut C,
    parts: &[Part],
    mut blocks: PipeWriter,
    mut descriptors: PipeWriter,
    handoff: SyncSender<PipeWriter>,
) -> Result<()> {
    let result = engine.process(parts, &mut blocks, &mut descriptors);
    drop(descriptors);

    match result {
        Ok(()) => {
            if handoff.send(blocks).is_err() {
                debug!("Core stage exited before taking the block stream");
            }
            Ok(())
        }
        Err(e) => {
            error!("Chunking engine failed: {}", e);
            Err(e)
        }
    }
}

fn receive_handoff(handoff: &Receiver<PipeWriter>, timeout: Option<Duration>) -> Result<PipeWriter> {
    let lost = || Error::stage_failed(CORE, "chunking stage ended without handing over the block stream");
    match timeout {
        Some(timeout) => handoff.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => Error::StageStalled {
                stage: CORE,
                timeout,
            },
            RecvTimeoutError::Disconnected => lost(),
        }),
        None => handoff.recv().map_err(|_| lost()),
    }
}

fn join<T>(stage: &'static str, handle: io::Result<thread::ScopedJoinHandle<'_, Result<T>>>) -> Result<T> {
    let handle = handle.map_err(|e| Error::stage_failed(stage, format!("cannot spawn thread: {}", e)))?;
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(Error::stage_failed(stage, "thread panicked")),
    }
}

/// Turn an expired read deadline into a stall error for `stage`.
fn stalled(stage: &'static str, timeout: Option<Duration>, err: Error) -> Error {
    match (err, timeout) {
        (Error::Io { source }, Some(timeout)) if source.kind() == io::ErrorKind::TimedOut => {
            Error::StageStalled { stage, timeout }
        }
        (err, _) => err,
    }
}

/// Errors that only report a peer stage going away.
fn is_consequential(err: &Error) -> bool {
    match err {
        Error::Io { source } | Error::FrameWrite { source, .. } => {
            source.kind() == io::ErrorKind::BrokenPipe
        }
        Error::StageFailed { stage, .. } => *stage == CORE,
        _ => false,
    }
}

/// Pick the most telling error among the failed stages.
///
/// Stalls come first, then errors raised by a stage itself, then errors that
/// merely reflect another stage shutting down. Ties go to the upstream stage.
fn root_cause(errors: [Option<Error>; 3]) -> Error {
    let rank = |err: &Error| {
        if err.is_stall() {
            0
        } else if is_consequential(err) {
            2
        } else {
            1
        }
    };

    errors
        .into_iter()
        .flatten()
        .enumerate()
        .min_by_key(|(i, err)| (rank(err), *i))
        .map(|(_, err)| err)
        .unwrap_or_else(|| Error::stage_failed(CORE, "pipeline failed without an error"))
}
