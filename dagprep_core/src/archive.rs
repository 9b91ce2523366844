//! Size-bounded archive splitting.
//!
//! Archives use the CARv1 layout: a length-prefixed dag-cbor header followed
//! by frames. Frames are never split across archives, so every archive is
//! readable on its own.

use crate::engine::{ArchiveMeta, PackageReport, PackagingEngine};
use crate::error::Result;
use crate::frame::{Frame, FrameReader};
use std::fs;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};

/// Header section of every archive: `varint(17)` followed by the dag-cbor
/// map `{"roots": [], "version": 1}`.
pub const ARCHIVE_HEADER: [u8; 18] = [
    0x11, 0xa2, 0x65, b'r', b'o', b'o', b't', b's', 0x80, 0x67, b'v', b'e', b'r', b's', b'i',
    b'o', b'n', 0x01,
];

/// Default target archive size (2 MiB).
pub const DEFAULT_TARGET_SIZE: u64 = 2 * 1024 * 1024;

/// Configuration for [`ArchiveSplitter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitterConfig {
    /// Upper bound on an archive's size, header included. A single frame
    /// larger than this gets an archive of its own.
    pub target_size: u64,
    /// Prepended to every archive file name.
    pub prefix: String,
    /// Directory archives are written to.
    pub out_dir: PathBuf,
    /// Compute metadata without writing archives.
    pub dry_run: bool,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            target_size: DEFAULT_TARGET_SIZE,
            prefix: String::new(),
            out_dir: PathBuf::from("."),
            dry_run: false,
        }
    }
}

/// The archive currently being filled.
struct OpenArchive {
    file: Option<NamedTempFile>,
    hasher: blake3::Hasher,
    content_size: u64,
    frame_count: u64,
}

impl OpenArchive {
    fn create(config: &SplitterConfig) -> Result<Self> {
        let file = if config.dry_run {
            None
        } else {
            Some(NamedTempFile::new_in(&config.out_dir)?)
        };

        let mut archive = Self {
            file,
            hasher: blake3::Hasher::new(),
            content_size: 0,
            frame_count: 0,
        };
        archive.write(&ARCHIVE_HEADER)?;
        Ok(archive)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.write_all(bytes)?;
        }
        self.hasher.update(bytes);
        Ok(())
    }

    fn push(&mut self, encoded: &[u8]) -> Result<()> {
        self.write(encoded)?;
        self.content_size += encoded.len() as u64;
        self.frame_count += 1;
        Ok(())
    }

    fn total_size(&self) -> u64 {
        ARCHIVE_HEADER.len() as u64 + self.content_size
    }

    fn finish(self, config: &SplitterConfig) -> Result<ArchiveMeta> {
        let digest = hex::encode(self.hasher.finalize().as_bytes());
        let name = format!("{}{}.car", config.prefix, digest);

        let path = match self.file {
            Some(mut file) => {
                file.flush()?;
                let path = config.out_dir.join(&name);
                file.persist(&path)?;
                Some(path)
            }
            None => None,
        };

        Ok(ArchiveMeta {
            name,
            path,
            digest,
            header_size: ARCHIVE_HEADER.len() as u64,
            content_size: self.content_size,
            frame_count: self.frame_count,
        })
    }
}

/// Packaging engine writing frames into size-bounded archives.
#[derive(Debug, Clone, Default)]
pub struct ArchiveSplitter {
    config: SplitterConfig,
}

impl ArchiveSplitter {
    pub fn new(config: SplitterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SplitterConfig {
        &self.config
    }

    /// Split an existing archive: its header section is skipped and its
    /// frames are redistributed into new archives.
    #[instrument(skip_all, fields(target = self.config.target_size))]
    pub fn split_existing(&mut self, archive: &mut dyn Read) -> Result<PackageReport> {
        let mut reader = FrameReader::new(archive);
        match reader.next_section()? {
            Some(header) => debug!(header_len = header.len(), "Skipped archive header"),
            None => warn!("Input archive is empty"),
        }
        self.split(reader)
    }

    fn split<R: Read>(&mut self, mut reader: FrameReader<R>) -> Result<PackageReport> {
        let config = &self.config;
        if !config.dry_run {
            fs::create_dir_all(&config.out_dir)?;
        }

        let mut report = PackageReport {
            dry_run: config.dry_run,
            ..PackageReport::default()
        };
        let mut current: Option<OpenArchive> = None;

        while let Some(frame) = reader.next_frame()? {
            let encoded = frame.encode();

            // An empty archive always takes the frame, however large.
            let full = current.take_if(|archive| {
                archive.frame_count > 0
                    && archive.total_size() + encoded.len() as u64 > config.target_size
            });
            if let Some(archive) = full {
                report.archives.push(archive.finish(config)?);
            }

            let archive = match current.take() {
                Some(archive) => archive,
                None => OpenArchive::create(config)?,
            };
            current.insert(archive).push(&encoded)?;
            report.frames += 1;
            report.bytes += encoded.len() as u64;
        }

        if let Some(archive) = current.take() {
            report.archives.push(archive.finish(config)?);
        }

        info!(
            archives = report.archives.len(),
            frames = report.frames,
            bytes = report.bytes,
            dry_run = config.dry_run,
            "Packaged frames"
        );
        Ok(report)
    }
}

impl PackagingEngine for ArchiveSplitter {
    #[instrument(skip_all, fields(target = self.config.target_size))]
    fn package(&mut self, frames: &mut dyn Read) -> Result<PackageReport> {
        self.split(FrameReader::new(frames))
    }
}

/// Read the frames of an archive file, skipping its header.
pub fn read_archive(path: &Path) -> Result<Vec<Frame>> {
    let mut reader = FrameReader::new(BufReader::new(fs::File::open(path)?));
    reader.next_section()?;
    reader.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cid::{Codec, ContentId};
    use crate::frame::encode_frame;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn stream(payload_sizes: &[usize]) -> (Vec<u8>, Vec<Frame>) {
        let mut bytes = Vec::new();
        let mut frames = Vec::new();
        for (i, &size) in payload_sizes.iter().enumerate() {
            let payload = vec![i as u8; size];
            let cid = ContentId::blake3(Codec::Raw, &payload);
            bytes.extend_from_slice(&encode_frame(&cid, &payload));
            frames.push(Frame::new(cid, payload));
        }
        (bytes, frames)
    }

    fn config(dir: &Path, target_size: u64) -> SplitterConfig {
        SplitterConfig {
            target_size,
            prefix: "test-".to_string(),
            out_dir: dir.to_path_buf(),
            dry_run: false,
        }
    }

    #[test]
    fn test_header_bytes() {
        assert_eq!(ARCHIVE_HEADER[0] as usize, ARCHIVE_HEADER.len() - 1);
    }

    #[test]
    fn test_single_archive() {
        let temp_dir = TempDir::new().unwrap();
        let (bytes, frames) = stream(&[10, 20, 30]);
        let mut splitter = ArchiveSplitter::new(config(temp_dir.path(), 1024 * 1024));

        let report = splitter.package(&mut Cursor::new(bytes.clone())).unwrap();
        assert_eq!(report.archives.len(), 1);
        assert_eq!(report.frames, 3);
        assert_eq!(report.bytes, bytes.len() as u64);

        let meta = &report.archives[0];
        assert!(meta.name.starts_with("test-"));
        assert!(meta.name.ends_with(".car"));
        assert_eq!(meta.header_size, ARCHIVE_HEADER.len() as u64);
        assert_eq!(meta.content_size, bytes.len() as u64);

        let path = meta.path.as_ref().unwrap();
        let on_disk = fs::read(path).unwrap();
        assert_eq!(on_disk.len() as u64, meta.total_size());
        assert_eq!(hex::encode(blake3::hash(&on_disk).as_bytes()), meta.digest);
        assert_eq!(read_archive(path).unwrap(), frames);
    }

    #[test]
    fn test_splits_on_frame_boundaries() {
        let temp_dir = TempDir::new().unwrap();
        let (bytes, frames) = stream(&[100; 10]);
        let target = 400;
        let mut splitter = ArchiveSplitter::new(config(temp_dir.path(), target));

        let report = splitter.package(&mut Cursor::new(bytes)).unwrap();
        assert!(report.archives.len() > 1);

        let mut recovered = Vec::new();
        for meta in &report.archives {
            assert!(meta.total_size() <= target);
            recovered.extend(read_archive(meta.path.as_ref().unwrap()).unwrap());
        }
        assert_eq!(recovered, frames);
    }

    #[test]
    fn test_oversized_frame_gets_own_archive() {
        let temp_dir = TempDir::new().unwrap();
        let (bytes, _) = stream(&[10, 500, 10]);
        let mut splitter = ArchiveSplitter::new(config(temp_dir.path(), 200));

        let report = splitter.package(&mut Cursor::new(bytes)).unwrap();
        let counts: Vec<u64> = report.archives.iter().map(|a| a.frame_count).collect();
        assert_eq!(counts, vec![1, 1, 1]);
        assert!(report.archives[1].total_size() > 200);
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let out_dir = temp_dir.path().join("out");
        let (bytes, _) = stream(&[10, 20]);
        let mut splitter = ArchiveSplitter::new(SplitterConfig {
            dry_run: true,
            ..config(&out_dir, 1024)
        });

        let report = splitter.package(&mut Cursor::new(bytes)).unwrap();
        assert!(report.dry_run);
        assert_eq!(report.archives.len(), 1);
        assert!(report.archives[0].path.is_none());
        assert!(!out_dir.exists());
    }

    #[test]
    fn test_dry_run_digest_matches_real_run() {
        let temp_dir = TempDir::new().unwrap();
        let (bytes, _) = stream(&[50, 60, 70]);

        let real = ArchiveSplitter::new(config(temp_dir.path(), 1024))
            .package(&mut Cursor::new(bytes.clone()))
            .unwrap();
        let dry = ArchiveSplitter::new(SplitterConfig {
            dry_run: true,
            ..config(temp_dir.path(), 1024)
        })
        .package(&mut Cursor::new(bytes))
        .unwrap();

        assert_eq!(real.archives[0].digest, dry.archives[0].digest);
    }

    #[test]
    fn test_empty_stream() {
        let temp_dir = TempDir::new().unwrap();
        let report = ArchiveSplitter::new(config(temp_dir.path(), 1024))
            .package(&mut Cursor::new(Vec::new()))
            .unwrap();
        assert!(report.archives.is_empty());
    }

    #[test]
    fn test_split_existing_archive() {
        let temp_dir = TempDir::new().unwrap();
        let (bytes, frames) = stream(&[100; 6]);

        let whole = ArchiveSplitter::new(config(temp_dir.path(), 1024 * 1024))
            .package(&mut Cursor::new(bytes))
            .unwrap();
        let archive = fs::read(whole.archives[0].path.as_ref().unwrap()).unwrap();

        let split_dir = temp_dir.path().join("split");
        let report = ArchiveSplitter::new(config(&split_dir, 300))
            .split_existing(&mut Cursor::new(archive))
            .unwrap();
        assert_eq!(report.frames, 6);
        assert!(report.archives.len() >= 3);

        let recovered: Vec<Frame> = report
            .archives
            .iter()
            .flat_map(|a| read_archive(a.path.as_ref().unwrap()).unwrap())
            .collect();
        assert_eq!(recovered, frames);
    }

    #[test]
    fn test_truncated_stream_fails() {
        let temp_dir = TempDir::new().unwrap();
        let (mut bytes, _) = stream(&[100]);
        bytes.truncate(bytes.len() - 10);

        let result = ArchiveSplitter::new(config(temp_dir.path(), 1024))
            .package(&mut Cursor::new(bytes));
        assert!(result.is_err());
    }
}
