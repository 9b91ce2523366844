//! Output formatting for CLI commands.
//!
//! Provides abstraction layer for outputting results in text or JSON format.

use anyhow::Result;
use dagprep_core::{ArchiveMeta, ContentId, EmitStats, MetadataFiles, PackageReport};
use serde::Serialize;
use std::io::{self, Write};

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Writer for command output with format abstraction.
pub struct OutputWriter {
    format: OutputFormat,
    stdout: io::Stdout,
}

impl OutputWriter {
    /// Create a new OutputWriter.
    pub fn new(json: bool) -> Self {
        Self {
            format: if json {
                OutputFormat::Json
            } else {
                OutputFormat::Text
            },
            stdout: io::stdout(),
        }
    }

    /// Write output using the configured format.
    ///
    /// The `text_fn` closure is called only in text mode to generate the
    /// human-readable output.
    pub fn write<T: Serialize>(&self, data: &T, text_fn: impl FnOnce() -> String) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(data)?;
                writeln!(&self.stdout, "{}", json)?;
            }
            OutputFormat::Text => {
                let text = text_fn();
                if !text.is_empty() {
                    write!(&self.stdout, "{}", text)?;
                }
            }
        }
        Ok(())
    }

    /// Write an error message to stderr.
    ///
    /// In JSON mode, writes a JSON error object with success=false.
    /// In text mode, writes the error chain directly.
    pub fn write_error(&self, error: &anyhow::Error, result_code: u8) {
        match self.format {
            OutputFormat::Json => {
                let error_output = ErrorOutput {
                    success: false,
                    result_code,
                    error: format!("{:#}", error),
                };
                if let Ok(json) = serde_json::to_string_pretty(&error_output) {
                    let _ = writeln!(io::stderr(), "{}", json);
                }
            }
            OutputFormat::Text => {
                let _ = writeln!(io::stderr(), "Error: {:#}", error);
            }
        }
    }
}

// ============================================================================
// Data Transfer Objects (DTOs) for JSON output
// ============================================================================

/// Error output structure.
#[derive(Debug, Serialize)]
pub struct ErrorOutput {
    pub success: bool,
    pub result_code: u8,
    pub error: String,
}

/// One archive, as listed in command output.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub digest: String,
    pub header_size: u64,
    pub content_size: u64,
    pub frame_count: u64,
}

impl From<&ArchiveMeta> for ArchiveInfo {
    fn from(meta: &ArchiveMeta) -> Self {
        Self {
            name: meta.name.clone(),
            path: meta.path.as_ref().map(|p| p.display().to_string()),
            digest: meta.digest.clone(),
            header_size: meta.header_size,
            content_size: meta.content_size,
            frame_count: meta.frame_count,
        }
    }
}

/// Output for `prep` command.
#[derive(Debug, Serialize)]
pub struct PrepOutput {
    pub success: bool,
    pub result_code: u8,
    pub root_cid: ContentId,
    pub files: usize,
    pub directories: usize,
    pub frames_emitted: usize,
    #[serde(skip_serializing_if = "is_zero")]
    pub frames_failed: usize,
    pub dry_run: bool,
    pub archives: Vec<ArchiveInfo>,
    pub metadata: MetadataFiles,
}

/// Output for `split` command.
#[derive(Debug, Serialize)]
pub struct SplitOutput {
    pub success: bool,
    pub result_code: u8,
    pub frames: u64,
    pub dry_run: bool,
    pub archives: Vec<ArchiveInfo>,
    pub metadata: MetadataFiles,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

pub fn archive_infos(report: &PackageReport) -> Vec<ArchiveInfo> {
    report.archives.iter().map(ArchiveInfo::from).collect()
}

/// Text lines listing each archive.
pub fn archive_lines(archives: &[ArchiveInfo], dry_run: bool) -> String {
    let verb = if dry_run { "would write" } else { "wrote" };
    archives
        .iter()
        .map(|a| {
            format!(
                "{} {} ({} frames, {} bytes)\n",
                verb,
                a.name,
                a.frame_count,
                a.header_size + a.content_size
            )
        })
        .collect()
}

impl PrepOutput {
    pub fn new(
        root_cid: ContentId,
        files: usize,
        directories: usize,
        emit: EmitStats,
        report: &PackageReport,
        metadata: MetadataFiles,
    ) -> Self {
        Self {
            success: true,
            result_code: 0,
            root_cid,
            files,
            directories,
            frames_emitted: emit.frames_written,
            frames_failed: emit.frames_failed,
            dry_run: report.dry_run,
            archives: archive_infos(report),
            metadata,
        }
    }
}
