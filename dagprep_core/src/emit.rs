//! Frame emission for assembled directory nodes.

use crate::error::{Error, Result};
use crate::frame::write_frame;
use crate::tree::DirectoryNode;
use serde::{Deserialize, Serialize};
use std::io::Write;
use tracing::{debug, instrument, warn};

/// What to do when a frame cannot be written downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FramePolicy {
    /// Abort emission on the first failed frame.
    FailFast,
    /// Log the failure and continue with the next node. The downstream DAG
    /// may be incomplete afterwards.
    #[default]
    BestEffort,
}

/// Counters from one emission run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EmitStats {
    pub frames_written: usize,
    pub frames_failed: usize,
    pub bytes_written: u64,
}

/// Writes directory nodes as frames, in order.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameEmitter {
    policy: FramePolicy,
}

impl FrameEmitter {
    pub fn new(policy: FramePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> FramePolicy {
        self.policy
    }

    /// Emit one frame per node onto `writer`.
    #[instrument(skip_all, fields(nodes = nodes.len(), policy = ?self.policy))]
    pub fn emit<W: Write + ?Sized>(
        &self,
        nodes: &[DirectoryNode],
        writer: &mut W,
    ) -> Result<EmitStats> {
        let mut stats = EmitStats::default();

        for node in nodes {
            match write_frame(writer, &node.cid, &node.payload) {
                Ok(written) => {
                    stats.frames_written += 1;
                    stats.bytes_written += written as u64;
                }
                Err(source) => match self.policy {
                    FramePolicy::FailFast => {
                        return Err(Error::FrameWrite {
                            cid: node.cid.to_string(),
                            source,
                        });
                    }
                    FramePolicy::BestEffort => {
                        stats.frames_failed += 1;
                        warn!(cid = %node.cid, path = %node.path, "Failed to write frame: {}", source);
                    }
                },
            }
        }

        if let Err(source) = writer.flush() {
            match self.policy {
                FramePolicy::FailFast => return Err(source.into()),
                FramePolicy::BestEffort => warn!("Failed to flush frames: {}", source),
            }
        }

        debug!(
            written = stats.frames_written,
            failed = stats.frames_failed,
            bytes = stats.bytes_written,
            "Emitted directory frames"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cid::{Codec, ContentId};
    use crate::frame::FrameReader;
    use crate::node::{DagPbCodec, Link, NodeCodec};
    use std::io::{self, Cursor};

    fn node(name: &str) -> DirectoryNode {
        let links = vec![Link::new(
            format!("{}.txt", name),
            ContentId::blake3(Codec::Raw, name.as_bytes()),
            name.len() as u64,
        )];
        let sealed = DagPbCodec.seal_directory(&links);
        DirectoryNode {
            name: name.to_string(),
            path: name.to_string(),
            links,
            cid: sealed.cid,
            payload: sealed.payload,
            size: sealed.size,
        }
    }

    /// Fails every write after the first `ok` writes.
    struct FailingWriter {
        ok: usize,
        inner: Vec<u8>,
    }

    impl Write for FailingWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.ok == 0 {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
            }
            self.ok -= 1;
            self.inner.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_frames_in_order_and_readable() {
        let nodes = vec![node("a"), node("b"), node("c")];
        let mut out = Vec::new();
        let stats = FrameEmitter::default().emit(&nodes, &mut out).unwrap();

        assert_eq!(stats.frames_written, 3);
        assert_eq!(stats.bytes_written, out.len() as u64);

        let frames: Vec<_> = FrameReader::new(Cursor::new(out))
            .collect::<Result<Vec<_>>>()
            .unwrap();
        for (frame, node) in frames.iter().zip(&nodes) {
            assert_eq!(frame.cid, node.cid);
            assert_eq!(frame.payload, node.payload);
        }
    }

    #[test]
    fn test_fail_fast_stops() {
        let nodes = vec![node("a"), node("b"), node("c")];
        let mut writer = FailingWriter {
            ok: 1,
            inner: Vec::new(),
        };

        let result = FrameEmitter::new(FramePolicy::FailFast).emit(&nodes, &mut writer);
        assert!(matches!(result, Err(Error::FrameWrite { .. })));
    }

    #[test]
    fn test_best_effort_continues() {
        let nodes = vec![node("a"), node("b"), node("c")];
        let mut writer = FailingWriter {
            ok: 1,
            inner: Vec::new(),
        };

        let stats = FrameEmitter::new(FramePolicy::BestEffort)
            .emit(&nodes, &mut writer)
            .unwrap();
        assert_eq!(stats.frames_written, 1);
        assert_eq!(stats.frames_failed, 2);

        let first = FrameReader::new(Cursor::new(writer.inner))
            .next_frame()
            .unwrap()
            .unwrap();
        assert_eq!(first.cid, nodes[0].cid);
    }

    #[test]
    fn test_empty_node_list() {
        let mut out = Vec::new();
        let stats = FrameEmitter::default().emit(&[], &mut out).unwrap();
        assert_eq!(stats, EmitStats::default());
        assert!(out.is_empty());
    }

    #[test]
    fn test_policy_serde_names() {
        assert_eq!(
            serde_json::to_string(&FramePolicy::BestEffort).unwrap(),
            "\"best-effort\""
        );
    }

    #[test]
    fn test_default_policy_keeps_going() {
        let nodes = vec![node("a"), node("b")];
        let mut writer = FailingWriter {
            ok: 0,
            inner: Vec::new(),
        };

        let emitter = FrameEmitter::default();
        assert_eq!(emitter.policy(), FramePolicy::BestEffort);
        let stats = emitter.emit(&nodes, &mut writer).unwrap();
        assert_eq!(stats.frames_written, 0);
        assert_eq!(stats.frames_failed, 2);
    }
}
