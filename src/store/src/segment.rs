//! Segment files: append-only logs of length-prefixed records
//!
//! Each record is a 4-byte little-endian length followed by that many
//! bytes. The active segment is the highest-numbered file; sealed
//! segments are never written again, so readers need no coordination
//! with the writer.

use crate::error::{Result, StoreError};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const LEN_PREFIX: u64 = 4;

/// Sanity bound on a single record; anything larger is treated as a
/// corrupt length prefix, not an allocation request.
pub const MAX_RECORD_LEN: u32 = 32 * 1024 * 1024;

pub fn segment_path(dir: &Path, segment: u32) -> PathBuf {
    dir.join(format!("seg-{segment:06}.dat"))
}

/// List segment ids present in a store directory, ascending.
pub fn list_segments(dir: &Path) -> Result<Vec<u32>> {
    let mut ids = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        if let Some(id) = name
            .strip_prefix("seg-")
            .and_then(|s| s.strip_suffix(".dat"))
            .and_then(|s| s.parse::<u32>().ok())
        {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// Appender for the active segment.
pub struct SegmentWriter {
    pub id: u32,
    file: File,
    len: u64,
}

impl SegmentWriter {
    pub fn open(dir: &Path, id: u32) -> Result<SegmentWriter> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(segment_path(dir, id))?;
        let len = file.metadata()?.len();
        Ok(SegmentWriter { id, file, len })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append one record, returning its offset within the segment.
    pub fn append(&mut self, bytes: &[u8]) -> Result<u64> {
        let offset = self.len;
        self.file.write_all(&(bytes.len() as u32).to_le_bytes())?;
        self.file.write_all(bytes)?;
        self.len += LEN_PREFIX + bytes.len() as u64;
        Ok(offset)
    }

    /// Force appended records to stable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Drop a torn tail left by a crash mid-append.
    pub fn truncate_to(&mut self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        self.len = len;
        Ok(())
    }
}

/// Read one record at a known position in a segment.
pub fn read_record(dir: &Path, segment: u32, offset: u64) -> Result<Vec<u8>> {
    let corrupt = |reason: String| StoreError::Corruption {
        segment,
        offset,
        reason,
    };

    let mut file = File::open(segment_path(dir, segment))
        .map_err(|e| corrupt(format!("segment unreadable: {e}")))?;
    let file_len = file.metadata()?.len();

    if offset + LEN_PREFIX > file_len {
        return Err(corrupt("offset past end of segment".into()));
    }
    file.seek(SeekFrom::Start(offset))?;

    let mut len_bytes = [0u8; 4];
    file.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes);
    if len > MAX_RECORD_LEN {
        return Err(corrupt(format!("implausible record length {len}")));
    }
    if offset + LEN_PREFIX + len as u64 > file_len {
        return Err(corrupt("record extends past end of segment".into()));
    }

    let mut bytes = vec![0u8; len as usize];
    file.read_exact(&mut bytes)?;
    Ok(bytes)
}

/// Sequentially iterate `(offset, bytes)` over a whole segment.
///
/// `tolerate_torn_tail` is set for the active segment: a partial record at
/// the end of the file is reported as the replay end position rather than
/// an error, so a crash between append and index update recovers cleanly.
pub fn replay_segment(
    dir: &Path,
    segment: u32,
    tolerate_torn_tail: bool,
) -> Result<(Vec<(u64, Vec<u8>)>, u64)> {
    let path = segment_path(dir, segment);
    let mut data = Vec::new();
    File::open(&path)?.read_to_end(&mut data)?;

    let mut records = Vec::new();
    let mut offset = 0u64;
    loop {
        let remaining = data.len() as u64 - offset;
        if remaining == 0 {
            break;
        }
        let torn = |reason: String| -> StoreError {
            StoreError::Corruption {
                segment,
                offset,
                reason,
            }
        };

        let complete_prefix = remaining >= LEN_PREFIX;
        let len = if complete_prefix {
            u32::from_le_bytes(
                data[offset as usize..(offset + LEN_PREFIX) as usize]
                    .try_into()
                    .expect("4 bytes"),
            )
        } else {
            0
        };

        if !complete_prefix
            || len > MAX_RECORD_LEN
            || offset + LEN_PREFIX + len as u64 > data.len() as u64
        {
            if tolerate_torn_tail {
                tracing::warn!(segment, offset, "dropping torn tail during replay");
                return Ok((records, offset));
            }
            return Err(torn("truncated record in sealed segment".into()));
        }

        let start = (offset + LEN_PREFIX) as usize;
        let bytes = data[start..start + len as usize].to_vec();
        records.push((offset, bytes));
        offset += LEN_PREFIX + len as u64;
    }

    Ok((records, offset))
}
