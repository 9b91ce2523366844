//! Canonical root selection.

use crate::cid::ContentId;
use crate::error::{Error, Result};
use crate::input::InputPath;
use crate::tree::{DirectoryNode, NodeSequence};
use tracing::debug;

/// The chosen export root and the nodes to stream downstream.
#[derive(Debug, Clone, Copy)]
pub struct Resolution<'a> {
    /// Index of the root in the node sequence.
    pub root_index: usize,
    root: &'a DirectoryNode,
    emit: &'a [DirectoryNode],
}

impl<'a> Resolution<'a> {
    /// The canonical root node.
    pub fn root(&self) -> &'a DirectoryNode {
        self.root
    }

    /// Identifier of the canonical root.
    pub fn root_cid(&self) -> &'a ContentId {
        &self.root.cid
    }

    /// Nodes to emit, root first.
    pub fn nodes(&self) -> &'a [DirectoryNode] {
        self.emit
    }
}

/// Decide which node is the published root.
///
/// With several inputs, or when the only directory is the super-root, the
/// super-root is published and every node is emitted. With a single input
/// the root is the innermost directory the user named: a user pointing at
/// `/opt/data/data_dir` publishes `data_dir`, and the wrappers for `opt` and
/// `opt/data` are never emitted.
pub fn resolve_root<'a>(sequence: &'a NodeSequence, inputs: &[InputPath]) -> Result<Resolution<'a>> {
    if sequence.is_empty() {
        return Err(Error::resolution("node sequence is empty"));
    }

    let root_index = match inputs {
        [] => return Err(Error::resolution("no input paths")),
        [single] if sequence.len() > 1 => single.dir_depth(),
        _ => 0,
    };

    let root = sequence.get(root_index).ok_or_else(|| {
        Error::resolution(format!(
            "root index {} outside of {} directories",
            root_index,
            sequence.len()
        ))
    })?;

    let expected = inputs[0].segments[..root_index].join("/");
    if root_index > 0 && root.path != expected {
        return Err(Error::resolution(format!(
            "node {} is '{}', expected '{}'",
            root_index, root.path, expected
        )));
    }

    debug!(root_index, root = %root.cid, path = %root.path, "Resolved root");
    Ok(Resolution {
        root_index,
        root,
        emit: &sequence.as_slice()[root_index..],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cid::Codec;
    use crate::input::FileUnit;
    use crate::node::DagPbCodec;
    use crate::records::RootRecord;
    use crate::tree::assemble;
    use std::path::PathBuf;

    fn input(path: &str, is_dir: bool) -> InputPath {
        InputPath {
            path: PathBuf::from(path),
            segments: path.split('/').map(String::from).collect(),
            is_dir,
        }
    }

    fn sequence(keys: &[&str]) -> NodeSequence {
        let units: Vec<FileUnit> = keys
            .iter()
            .enumerate()
            .map(|(i, k)| FileUnit {
                path: PathBuf::from(k),
                input_index: 0,
                segments: k.split('/').map(String::from).collect(),
                size: 1,
                position: i,
            })
            .collect();
        let records = keys
            .iter()
            .map(|k| RootRecord::new(ContentId::blake3(Codec::Raw, k.as_bytes())))
            .collect();
        assemble(&units, records, &DagPbCodec).unwrap()
    }

    #[test]
    fn test_single_file_degenerate() {
        let seq = sequence(&["file.bin"]);
        let resolution = resolve_root(&seq, &[input("file.bin", false)]).unwrap();

        assert_eq!(resolution.root_index, 0);
        assert_eq!(resolution.root_cid(), &seq.super_root().cid);
        assert_eq!(resolution.nodes().len(), 1);
    }

    #[test]
    fn test_multiple_inputs_use_super_root() {
        let seq = sequence(&["x/a", "y/b", "y/c/d"]);
        let inputs = [input("x", true), input("y", true)];
        let resolution = resolve_root(&seq, &inputs).unwrap();

        assert_eq!(resolution.root_index, 0);
        assert_eq!(resolution.nodes(), seq.as_slice());
    }

    #[test]
    fn test_nested_single_directory() {
        let seq = sequence(&["a/b/c/f1", "a/b/c/sub/f2"]);
        let resolution = resolve_root(&seq, &[input("a/b/c", true)]).unwrap();

        assert_eq!(resolution.root_index, 3);
        assert_eq!(resolution.root().path, "a/b/c");
        assert_eq!(resolution.nodes(), &seq.as_slice()[3..]);
        assert!(resolution.nodes().iter().all(|n| n.path.starts_with("a/b/c")));
    }

    #[test]
    fn test_single_directory_one_segment() {
        let seq = sequence(&["data/f"]);
        let resolution = resolve_root(&seq, &[input("data", true)]).unwrap();

        assert_eq!(resolution.root_index, 1);
        assert_eq!(resolution.root().name, "data");
        assert_eq!(resolution.nodes().len(), 1);
    }

    #[test]
    fn test_nested_single_file_publishes_parent() {
        let seq = sequence(&["a/b/file"]);
        let resolution = resolve_root(&seq, &[input("a/b/file", false)]).unwrap();

        assert_eq!(resolution.root_index, 2);
        assert_eq!(resolution.root().path, "a/b");
    }

    #[test]
    fn test_no_inputs() {
        let seq = sequence(&["f"]);
        assert!(resolve_root(&seq, &[]).is_err());
    }

    #[test]
    fn test_mismatched_input_rejected() {
        let seq = sequence(&["a/f"]);
        assert!(resolve_root(&seq, &[input("a/b/c", true)]).is_err());
    }
}
