//! Metadata files describing produced archives.
//!
//! A CSV file with one row per archive, and a YAML file next to it (same
//! stem, `.yaml` extension) carrying the full packaging report.

use crate::cid::ContentId;
use crate::engine::PackageReport;
use crate::error::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// Default name of the CSV metadata file.
pub const DEFAULT_METADATA_FILE: &str = "__metadata.csv";

/// Paths of the metadata files written by [`write_metadata`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataFiles {
    pub csv: PathBuf,
    pub yaml: PathBuf,
}

#[derive(Serialize)]
struct YamlMetadata<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    root_cid: Option<String>,
    package_report: &'a PackageReport,
}

/// The YAML companion of a CSV metadata path.
pub fn yaml_path(csv_path: &Path) -> PathBuf {
    csv_path.with_extension("yaml")
}

/// Write the CSV and YAML metadata for `report`.
///
/// `root_cid` is `None` when archives were produced by splitting an existing
/// archive, in which case the `root_cid` column is left out.
#[instrument(skip(report), fields(archives = report.archives.len()))]
pub fn write_metadata(
    csv_path: &Path,
    root_cid: Option<&ContentId>,
    report: &PackageReport,
) -> Result<MetadataFiles> {
    let timestamp = Utc::now();

    let mut csv = BufWriter::new(File::create(csv_path)?);
    write_csv(&mut csv, root_cid, report, timestamp)?;
    csv.flush()?;

    let yaml_path = yaml_path(csv_path);
    let mut yaml = BufWriter::new(File::create(&yaml_path)?);
    write_yaml(&mut yaml, root_cid, report)?;
    yaml.flush()?;

    debug!(csv = %csv_path.display(), yaml = %yaml_path.display(), "Wrote metadata");
    Ok(MetadataFiles {
        csv: csv_path.to_path_buf(),
        yaml: yaml_path,
    })
}

/// Write the CSV rows, header first.
pub fn write_csv<W: Write>(
    writer: &mut W,
    root_cid: Option<&ContentId>,
    report: &PackageReport,
    timestamp: DateTime<Utc>,
) -> Result<()> {
    let mut header = vec!["timestamp", "archive file"];
    if root_cid.is_some() {
        header.push("root_cid");
    }
    header.extend(["digest", "header size", "content size"]);
    write_row(writer, header.into_iter().map(Cow::Borrowed))?;

    let timestamp = timestamp.to_rfc3339_opts(SecondsFormat::Secs, true);
    let root = root_cid.map(ContentId::to_string);

    for archive in &report.archives {
        let mut row: Vec<Cow<'_, str>> =
            vec![Cow::Borrowed(timestamp.as_str()), Cow::Borrowed(archive.name.as_str())];
        if let Some(root) = &root {
            row.push(Cow::Borrowed(root.as_str()));
        }
        row.push(Cow::Borrowed(archive.digest.as_str()));
        row.push(Cow::Owned(archive.header_size.to_string()));
        row.push(Cow::Owned(archive.content_size.to_string()));
        write_row(writer, row.into_iter())?;
    }

    Ok(())
}

/// Write the YAML document.
pub fn write_yaml<W: Write>(
    writer: &mut W,
    root_cid: Option<&ContentId>,
    report: &PackageReport,
) -> Result<()> {
    let doc = YamlMetadata {
        root_cid: root_cid.map(ContentId::to_string),
        package_report: report,
    };
    serde_yaml::to_writer(writer, &doc)?;
    Ok(())
}

fn write_row<'a, W: Write>(
    writer: &mut W,
    fields: impl Iterator<Item = Cow<'a, str>>,
) -> Result<()> {
    let line = fields
        .map(|field| quote(&field).into_owned())
        .collect::<Vec<_>>()
        .join(",");
    writeln!(writer, "{}", line)?;
    Ok(())
}

/// Quote a field when it contains a separator, quote or line break.
fn quote(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}
