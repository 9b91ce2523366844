//! Directory tree assembly.
//!
//! Rebuilds the input hierarchy from the flat list of files and their root
//! records. Directories live in an arena whose slot 0 is a synthetic
//! super-root holding every input's first segment, so single- and
//! multi-argument invocations share one shape. Children keep the order in
//! which files were inserted, which is the walk order; they are never
//! re-sorted.

use crate::cid::ContentId;
use crate::error::{Error, Result};
use crate::input::FileUnit;
use crate::node::{Link, NodeCodec, SealedNode};
use crate::records::RootRecord;
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::{debug, info, instrument};

/// An assembled directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryNode {
    /// Entry name (empty for the super-root).
    pub name: String,
    /// Slash-joined path from the super-root (empty for the super-root).
    pub path: String,
    /// Children in traversal order.
    pub links: Vec<Link>,
    /// Identifier derived from the payload.
    pub cid: ContentId,
    /// Serialized node.
    pub payload: Vec<u8>,
    /// Cumulative DAG size.
    pub size: u64,
}

/// Directory nodes flattened in pre-order from the super-root.
///
/// Index 0 is always the super-root. For a single input `a/b/c`, indices
/// 1, 2 and 3 are `a`, `a/b` and `a/b/c`, followed by everything below `c`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSequence {
    nodes: Vec<DirectoryNode>,
}

impl NodeSequence {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&DirectoryNode> {
        self.nodes.get(index)
    }

    pub fn as_slice(&self) -> &[DirectoryNode] {
        &self.nodes
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DirectoryNode> {
        self.nodes.iter()
    }

    /// The synthetic super-root.
    pub fn super_root(&self) -> &DirectoryNode {
        &self.nodes[0]
    }

    /// Index of the directory at `path`, if any.
    pub fn position(&self, path: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.path == path)
    }
}

enum Child {
    Dir(usize),
    File { cid: ContentId, size: u64 },
}

struct ArenaDir {
    name: String,
    path: String,
    children: Vec<(String, Child)>,
    by_name: HashMap<String, usize>,
}

impl ArenaDir {
    fn new(name: String, path: String) -> Self {
        Self {
            name,
            path,
            children: Vec::new(),
            by_name: HashMap::new(),
        }
    }
}

/// Build the directory tree for `units` and seal every directory.
#[instrument(skip_all, fields(files = units.len(), records = records.len()))]
pub fn assemble(
    units: &[FileUnit],
    records: Vec<RootRecord>,
    codec: &dyn NodeCodec,
) -> Result<NodeSequence> {
    let start = Instant::now();
    let matched = match_records(units, records)?;

    let mut arena = vec![ArenaDir::new(String::new(), String::new())];
    for (unit, record) in units.iter().zip(matched) {
        insert(&mut arena, unit, record)?;
    }

    let mut sealed: Vec<Option<(SealedNode, Vec<Link>)>> =
        (0..arena.len()).map(|_| None).collect();
    seal(&arena, 0, codec, &mut sealed)?;

    let mut nodes = Vec::with_capacity(arena.len());
    flatten(&arena, 0, &mut sealed, &mut nodes)?;

    let sequence = NodeSequence { nodes };
    info!(
        directories = sequence.len(),
        super_root = %sequence.super_root().cid,
        duration_ms = start.elapsed().as_millis(),
        "Tree assembled"
    );
    Ok(sequence)
}

/// Align records with units.
///
/// When every record names its file, records are matched by key. Otherwise
/// they are matched by arrival order, which requires one record per file.
fn match_records(units: &[FileUnit], records: Vec<RootRecord>) -> Result<Vec<RootRecord>> {
    let mut seen = HashSet::with_capacity(units.len());
    for unit in units {
        if !seen.insert(unit.key()) {
            return Err(Error::duplicate_entry(unit.key()));
        }
    }

    let keyed = !records.is_empty() && records.iter().all(|r| r.path.is_some());
    if !keyed {
        if records.len() != units.len() {
            return Err(Error::record_mismatch(format!(
                "{} records for {} files and records carry no path to match by",
                records.len(),
                units.len()
            )));
        }
        debug!("Matching records by position");
        return Ok(records);
    }

    let mut by_key = HashMap::with_capacity(records.len());
    for record in records {
        if let Some(key) = record.path.clone() {
            if by_key.insert(key.clone(), record).is_some() {
                return Err(Error::record_mismatch(format!(
                    "more than one record for {}",
                    key
                )));
            }
        }
    }

    let mut matched = Vec::with_capacity(units.len());
    for unit in units {
        let key = unit.key();
        let record = by_key
            .remove(&key)
            .ok_or_else(|| Error::record_mismatch(format!("no record for {}", key)))?;
        matched.push(record);
    }

    if let Some(extra) = by_key.keys().next() {
        return Err(Error::record_mismatch(format!(
            "record for unknown file {}",
            extra
        )));
    }

    debug!("Matching records by path");
    Ok(matched)
}

fn insert(arena: &mut Vec<ArenaDir>, unit: &FileUnit, record: RootRecord) -> Result<()> {
    let (file_name, dirs) = unit
        .segments
        .split_last()
        .ok_or_else(|| Error::unsupported_path(&unit.path, "file has no name"))?;

    let mut current = 0;
    for name in dirs {
        let existing = arena[current].by_name.get(name).copied();
        current = match existing {
            Some(slot) => match arena[current].children[slot].1 {
                Child::Dir(index) => index,
                Child::File { .. } => {
                    return Err(Error::duplicate_entry(join(&arena[current].path, name)));
                }
            },
            None => {
                let index = arena.len();
                let path = join(&arena[current].path, name);
                arena.push(ArenaDir::new(name.clone(), path));

                let parent = &mut arena[current];
                parent.by_name.insert(name.clone(), parent.children.len());
                parent.children.push((name.clone(), Child::Dir(index)));
                index
            }
        };
    }

    let parent = &mut arena[current];
    if parent.by_name.contains_key(file_name) {
        return Err(Error::duplicate_entry(join(&parent.path, file_name)));
    }

    let size = record.size.unwrap_or(unit.size);
    parent
        .by_name
        .insert(file_name.clone(), parent.children.len());
    parent.children.push((
        file_name.clone(),
        Child::File {
            cid: record.cid,
            size,
        },
    ));
    Ok(())
}

/// Post-order: seal children before their parent.
fn seal(
    arena: &[ArenaDir],
    index: usize,
    codec: &dyn NodeCodec,
    sealed: &mut [Option<(SealedNode, Vec<Link>)>],
) -> Result<(ContentId, u64)> {
    let dir = &arena[index];
    let mut links = Vec::with_capacity(dir.children.len());

    for (name, child) in &dir.children {
        let (cid, size) = match child {
            Child::Dir(child_index) => seal(arena, *child_index, codec, sealed)?,
            Child::File { cid, size } => (cid.clone(), *size),
        };
        links.push(Link::new(name.clone(), cid, size));
    }

    let node = codec.seal_directory(&links);
    let result = (node.cid.clone(), node.size);
    sealed[index] = Some((node, links));
    Ok(result)
}

/// Pre-order: a directory comes before everything below it.
fn flatten(
    arena: &[ArenaDir],
    index: usize,
    sealed: &mut [Option<(SealedNode, Vec<Link>)>],
    out: &mut Vec<DirectoryNode>,
) -> Result<()> {
    let (node, links) = sealed[index]
        .take()
        .ok_or_else(|| Error::resolution(format!("directory {} was not sealed", index)))?;

    let dir = &arena[index];
    out.push(DirectoryNode {
        name: dir.name.clone(),
        path: dir.path.clone(),
        links,
        cid: node.cid,
        payload: node.payload,
        size: node.size,
    });

    for (_, child) in &dir.children {
        if let Child::Dir(child_index) = child {
            flatten(arena, *child_index, sealed, out)?;
        }
    }
    Ok(())
}

fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}
