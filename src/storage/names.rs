//! On-disk file names
//!
//! Segment and checkpoint files encode their identity and offset range in
//! fixed-width hex so a directory listing sorts in log order.
//!
//! ```text
//! log-<segnum:8>-<start:16>-<end:16>   log segment
//! chk-<start:16>-<end:16>              checkpoint marker
//! chd-<start:16>                       checkpoint data
//! <file>.promise                       bootstrap promise marker
//! ```

use crate::error::{RepError, Result};

pub const SEGMENT_PREFIX: &str = "log-";
pub const CHECKPOINT_MARKER_PREFIX: &str = "chk-";
pub const CHECKPOINT_DATA_PREFIX: &str = "chd-";
pub const PROMISE_SUFFIX: &str = ".promise";

/// "log-00000003-0000000000010000-0000000000018000"
pub fn segment_file_name(segnum: u32, start_offset: u64, end_offset: u64) -> String {
    format!(
        "{}{:08x}-{:016x}-{:016x}",
        SEGMENT_PREFIX, segnum, start_offset, end_offset
    )
}

/// Parse (segnum, start_offset, end_offset) out of a segment file name
pub fn parse_segment_file_name(name: &str) -> Result<(u32, u64, u64)> {
    let fields = split_fields(name, SEGMENT_PREFIX, &[8, 16, 16])?;
    Ok((fields[0] as u32, fields[1], fields[2]))
}

/// Whether a directory entry looks like a log segment
pub fn is_segment_file_name(name: &str) -> bool {
    name.starts_with(SEGMENT_PREFIX) && !name.ends_with(PROMISE_SUFFIX)
}

/// "chk-<start>-<end>"
pub fn checkpoint_marker_name(start_offset: u64, end_offset: u64) -> String {
    format!(
        "{}{:016x}-{:016x}",
        CHECKPOINT_MARKER_PREFIX, start_offset, end_offset
    )
}

/// Parse (start_offset, end_offset) out of a checkpoint marker name
pub fn parse_checkpoint_marker_name(name: &str) -> Result<(u64, u64)> {
    let fields = split_fields(name, CHECKPOINT_MARKER_PREFIX, &[16, 16])?;
    Ok((fields[0], fields[1]))
}

pub fn is_checkpoint_marker_name(name: &str) -> bool {
    name.starts_with(CHECKPOINT_MARKER_PREFIX) && !name.ends_with(PROMISE_SUFFIX)
}

/// "chd-<start>"
pub fn checkpoint_data_name(start_offset: u64) -> String {
    format!("{}{:016x}", CHECKPOINT_DATA_PREFIX, start_offset)
}

/// Marker recording that `file_name` was promised by a bootstrap header
pub fn promise_name(file_name: &str) -> String {
    format!("{}{}", file_name, PROMISE_SUFFIX)
}

/// Split "<prefix>a-b-c" into fixed-width hex fields
fn split_fields(name: &str, prefix: &str, widths: &[usize]) -> Result<Vec<u64>> {
    let malformed = || RepError::Config(format!("malformed file name '{}'", name));

    let rest = name.strip_prefix(prefix).ok_or_else(malformed)?;
    let parts: Vec<&str> = rest.split('-').collect();
    if parts.len() != widths.len() {
        return Err(malformed());
    }

    parts
        .iter()
        .zip(widths)
        .map(|(part, width)| {
            if part.len() != *width {
                return Err(malformed());
            }
            u64::from_str_radix(part, 16).map_err(|_| malformed())
        })
        .collect()
}
