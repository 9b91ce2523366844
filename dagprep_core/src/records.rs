//! Root record collection from the descriptor side-channel.
//!
//! The chunking engine writes one JSON object per line, one line per chunked
//! unit. Collection runs to end-of-stream: the record set is only complete
//! once the engine has closed its end of the channel.

use crate::cid::ContentId;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Read};
use tracing::{debug, instrument, warn};

/// Descriptor for one top-level chunked unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootRecord {
    /// Identifier of the unit's root block.
    pub cid: ContentId,
    /// Cumulative DAG size of the unit, when the engine reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Identifying key of the originating file, when the engine reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl RootRecord {
    pub fn new(cid: ContentId) -> Self {
        Self {
            cid,
            size: None,
            path: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Serialize to a newline-terminated descriptor line.
    pub fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Read every record from `reader` until end-of-stream.
///
/// Lines that fail to parse are logged and skipped. Errors reading the stream
/// itself are returned.
#[instrument(skip(reader))]
pub fn collect_records<R: Read>(reader: R) -> Result<Vec<RootRecord>> {
    let mut reader = BufReader::new(reader);
    let mut records = Vec::new();
    let mut line = Vec::new();
    let mut line_no = 0usize;
    let mut skipped = 0usize;

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        line_no += 1;

        let trimmed = line.trim_ascii();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_slice::<RootRecord>(trimmed) {
            Ok(record) => records.push(record),
            Err(e) => {
                skipped += 1;
                warn!(
                    line = line_no,
                    content = %String::from_utf8_lossy(trimmed),
                    "Failed to parse descriptor record: {}",
                    e
                );
            }
        }
    }

    debug!(records = records.len(), skipped, "Collected root records");
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cid::Codec;
    use std::io::Cursor;

    fn cid(data: &[u8]) -> ContentId {
        ContentId::blake3(Codec::Raw, data)
    }

    #[test]
    fn test_collect_in_order() {
        let mut stream = String::new();
        for data in [b"a", b"b", b"c"] {
            stream.push_str(&RootRecord::new(cid(data)).to_line().unwrap());
        }

        let records = collect_records(Cursor::new(stream)).unwrap();
        let cids: Vec<ContentId> = records.into_iter().map(|r| r.cid).collect();
        assert_eq!(cids, vec![cid(b"a"), cid(b"b"), cid(b"c")]);
    }

    #[test]
    fn test_malformed_line_skipped() {
        let mut stream = String::new();
        stream.push_str(&RootRecord::new(cid(b"1")).to_line().unwrap());
        stream.push_str("{not json\n");
        stream.push_str(&RootRecord::new(cid(b"2")).to_line().unwrap());
        stream.push_str("{\"cid\": \"bnot-a-cid\"}\n");
        stream.push_str(&RootRecord::new(cid(b"3")).to_line().unwrap());

        let records = collect_records(Cursor::new(stream)).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].cid, cid(b"3"));
    }

    #[test]
    fn test_invalid_utf8_line_skipped() {
        let mut stream = RootRecord::new(cid(b"ok")).to_line().unwrap().into_bytes();
        stream.extend_from_slice(&[0xff, 0xfe, b'\n']);

        let records = collect_records(Cursor::new(stream)).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_blank_lines_and_missing_newline() {
        let line = RootRecord::new(cid(b"x")).to_line().unwrap();
        let stream = format!("\n\n{}   \n{}", line, line.trim_end());

        let records = collect_records(Cursor::new(stream)).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_optional_fields() {
        let record = RootRecord::new(cid(b"f")).with_size(42).with_path("dir/f");
        let line = record.to_line().unwrap();
        assert!(line.contains("\"size\":42"));
        assert!(line.contains("\"path\":\"dir/f\""));

        let parsed = collect_records(Cursor::new(line)).unwrap();
        assert_eq!(parsed, vec![record]);

        let extra = format!("{{\"cid\":\"{}\",\"event\":\"root\"}}\n", cid(b"g"));
        let parsed = collect_records(Cursor::new(extra)).unwrap();
        assert_eq!(parsed[0].size, None);
        assert_eq!(parsed[0].path, None);
    }

    #[test]
    fn test_empty_stream() {
        let records = collect_records(Cursor::new(Vec::<u8>::new())).unwrap();
        assert!(records.is_empty());
    }

    use proptest::prelude::*;

    proptest! {
        /// One invalid line among N valid lines yields exactly N records
        #[test]
        fn prop_single_bad_line_tolerated(n in 1usize..20, bad_at in 0usize..20) {
            let bad_at = bad_at % (n + 1);
            let mut stream = String::new();
            for i in 0..=n {
                if i == bad_at {
                    stream.push_str("garbage line\n");
                }
                if i < n {
                    stream.push_str(&RootRecord::new(cid(&i.to_le_bytes())).to_line()?);
                }
            }
            prop_assert_eq!(collect_records(Cursor::new(stream))?.len(), n);
        }
    }
}
