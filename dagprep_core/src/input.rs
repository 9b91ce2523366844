//! Input path expansion.
//!
//! Turns the user's path arguments into the ordered list of [`FileUnit`]s fed
//! to the chunking engine. Directories are walked depth first with entries
//! sorted by file name, so the same tree always yields the same order.

use crate::error::{Error, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, instrument};

/// A path argument as supplied by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputPath {
    /// The path as given.
    pub path: PathBuf,
    /// Normalized name segments used to place it in the tree.
    pub segments: Vec<String>,
    /// Whether the path denotes a directory.
    pub is_dir: bool,
}

impl InputPath {
    /// Inspect a path argument.
    ///
    /// Root and `.` components are dropped. Paths containing `..`, or with no
    /// named component at all (such as `.`), are canonicalized first so every
    /// tree node has a real name.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let metadata = fs::symlink_metadata(&path).map_err(|e| {
            Error::Io {
                source: std::io::Error::new(
                    e.kind(),
                    format!("Path does not exist: {}", path.display()),
                ),
            }
        })?;

        if metadata.file_type().is_symlink() {
            return Err(Error::unsupported_path(&path, "symlinks are not supported"));
        }
        if !metadata.is_file() && !metadata.is_dir() {
            return Err(Error::unsupported_path(&path, "unsupported file type"));
        }

        let mut segments = normal_segments(&path)?;
        let needs_canonical = segments.is_none() || segments.as_ref().is_some_and(Vec::is_empty);
        if needs_canonical {
            let canonical = fs::canonicalize(&path)?;
            segments = normal_segments(&canonical)?;
        }

        let segments = match segments {
            Some(segments) if !segments.is_empty() => segments,
            _ => return Err(Error::unsupported_path(&path, "path has no named component")),
        };

        Ok(Self {
            path,
            segments,
            is_dir: metadata.is_dir(),
        })
    }

    /// Number of leading segments that name directories.
    ///
    /// For a directory this is every segment; for a file, every segment but
    /// the file name.
    pub fn dir_depth(&self) -> usize {
        if self.is_dir {
            self.segments.len()
        } else {
            self.segments.len() - 1
        }
    }
}

/// Normal components of `path` as UTF-8 strings.
///
/// Returns `None` when the path contains a `..` component.
fn normal_segments(path: &Path) -> Result<Option<Vec<String>>> {
    let mut segments = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            Component::ParentDir => return Ok(None),
            Component::Normal(name) => {
                let name = name.to_str().ok_or_else(|| {
                    Error::unsupported_path(path, "path is not valid UTF-8")
                })?;
                segments.push(name.to_string());
            }
        }
    }
    Ok(Some(segments))
}

/// One input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUnit {
    /// Filesystem path used to read the content.
    pub path: PathBuf,
    /// Index of the [`InputPath`] this file was discovered under.
    pub input_index: usize,
    /// Tree placement: the input's segments followed by the relative sub-path.
    pub segments: Vec<String>,
    /// Size in bytes at expansion time.
    pub size: u64,
    /// Position in the part sequence fed to the chunking engine.
    pub position: usize,
}

impl FileUnit {
    /// Slash-joined tree path, used as the identifying key in descriptors.
    pub fn key(&self) -> String {
        self.segments.join("/")
    }
}

/// The expanded inputs of one invocation.
#[derive(Debug, Clone)]
pub struct InputSet {
    pub inputs: Vec<InputPath>,
    pub units: Vec<FileUnit>,
}

impl InputSet {
    /// Total bytes across every file.
    pub fn total_bytes(&self) -> u64 {
        self.units.iter().map(|u| u.size).sum()
    }
}

/// Expand path arguments into file units, in argument order.
///
/// Fails with [`Error::NoInput`] when no paths are given or they contain no
/// files; this check runs before any pipeline stage is started.
#[instrument(skip(paths), fields(args = paths.len()))]
pub fn expand_inputs<P: AsRef<Path>>(paths: &[P]) -> Result<InputSet> {
    if paths.is_empty() {
        return Err(Error::NoInput);
    }

    let mut inputs = Vec::with_capacity(paths.len());
    let mut units = Vec::new();

    for (input_index, path) in paths.iter().enumerate() {
        let input = InputPath::new(path.as_ref())?;
        collect_files(&input, input_index, &mut units)?;
        inputs.push(input);
    }

    if units.is_empty() {
        return Err(Error::NoInput);
    }

    debug!(files = units.len(), "Expanded inputs");
    Ok(InputSet { inputs, units })
}

fn collect_files(input: &InputPath, input_index: usize, units: &mut Vec<FileUnit>) -> Result<()> {
    let walker = ignore::WalkBuilder::new(&input.path)
        .standard_filters(false) // Every file is data, including hidden and ignored ones
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    for entry in walker {
        let entry = entry?;
        let entry_path = entry.path();
        let file_type = match entry.file_type() {
            Some(file_type) => file_type,
            None => continue, // stdin entries only
        };

        if file_type.is_symlink() {
            return Err(Error::unsupported_path(
                entry_path,
                "symlinks are not supported",
            ));
        }
        if !file_type.is_file() {
            continue;
        }

        let relative = entry_path.strip_prefix(&input.path).map_err(|_| {
            Error::unsupported_path(entry_path, "walked outside of its input path")
        })?;

        let mut segments = input.segments.clone();
        for component in relative.components() {
            if let Component::Normal(name) = component {
                let name = name.to_str().ok_or_else(|| {
                    Error::unsupported_path(entry_path, "path is not valid UTF-8")
                })?;
                segments.push(name.to_string());
            }
        }

        let size = entry.metadata()?.len();
        units.push(FileUnit {
            path: entry_path.to_path_buf(),
            input_index,
            segments,
            size,
            position: units.len(),
        });
    }

    Ok(())
}
