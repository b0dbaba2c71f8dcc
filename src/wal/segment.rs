//! Log segments
//!
//! A segment is a fixed-capacity, contiguous slice `[start_offset, end_offset)`
//! of the log address space backed by one file. Byte `i` of the file holds
//! log offset `start_offset + i`.
//!
//! ```text
//!   segment 1            segment 2            segment 3
//! ├────────────────────┼────────────────────┼──────────────
//! 0                    S                    2S
//! ```
//!
//! Descriptors are immutable: a segment is published into the directory
//! fully built, so readers never see half-initialized bounds.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{RepError, Result};
use crate::storage::names;

use super::lsn::{MAX_OFFSET, SEGMENT_BITS};
use super::Lsn;

/// Descriptor of one log segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentId {
    pub segnum: u32,
    pub start_offset: u64,
    pub end_offset: u64,
}

impl SegmentId {
    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.start_offset && offset < self.end_offset
    }

    /// Position inside the segment file of a global offset
    pub fn file_offset(&self, offset: u64) -> u64 {
        debug_assert!(offset >= self.start_offset);
        offset - self.start_offset
    }

    pub fn start_lsn(&self) -> Lsn {
        Lsn::make(self.start_offset, self.segnum)
    }

    pub fn file_name(&self) -> String {
        names::segment_file_name(self.segnum, self.start_offset, self.end_offset)
    }

    /// Rebuild a descriptor from its file name
    pub fn from_file_name(name: &str) -> Result<Self> {
        let (segnum, start_offset, end_offset) = names::parse_segment_file_name(name)?;
        if end_offset <= start_offset {
            return Err(RepError::Config(format!("segment file '{}' has an empty range", name)));
        }
        Ok(Self {
            segnum,
            start_offset,
            end_offset,
        })
    }
}

/// Segment number → descriptor map
///
/// ## Concurrency:
/// - Only the thread creating a new segment mutates the map
/// - Everyone else takes the read lock and clones an `Arc<SegmentId>`
pub struct SegmentDirectory {
    segment_size: u64,
    segments: RwLock<BTreeMap<u32, Arc<SegmentId>>>,
}

impl SegmentDirectory {
    pub fn new(segment_size: u64) -> Self {
        Self {
            segment_size,
            segments: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn segment_size(&self) -> u64 {
        self.segment_size
    }

    /// Create the segment following the current last one
    ///
    /// The new segment must carry the next segment number and start at or
    /// after the previous segment's end.
    pub fn create_segment(&self, segnum: u32, start_offset: u64) -> Result<Arc<SegmentId>> {
        let end_offset = start_offset
            .checked_add(self.segment_size)
            .ok_or_else(|| {
                RepError::Protocol(format!("segment at 0x{:x} overflows the log", start_offset))
            })?;
        self.insert(SegmentId {
            segnum,
            start_offset,
            end_offset,
        })
    }

    /// Register a segment found on disk
    pub fn insert(&self, segment: SegmentId) -> Result<Arc<SegmentId>> {
        // Both bounds must be representable as LSNs
        if segment.segnum >= 1 << SEGMENT_BITS {
            return Err(RepError::Protocol(format!(
                "segment number {} exceeds the LSN limit of {}",
                segment.segnum,
                (1u32 << SEGMENT_BITS) - 1
            )));
        }
        if segment.end_offset > MAX_OFFSET {
            return Err(RepError::Protocol(format!(
                "segment {} ending at 0x{:x} exceeds the log address space",
                segment.segnum, segment.end_offset
            )));
        }

        let mut segments = self.segments.write();

        if let Some(last) = segments.values().next_back() {
            if segment.segnum != last.segnum + 1 {
                return Err(RepError::Protocol(format!(
                    "segment {} does not follow segment {}",
                    segment.segnum, last.segnum
                )));
            }
            if segment.start_offset < last.end_offset {
                return Err(RepError::Protocol(format!(
                    "segment {} starting at 0x{:x} overlaps segment {} ending at 0x{:x}",
                    segment.segnum, segment.start_offset, last.segnum, last.end_offset
                )));
            }
        }

        let segment = Arc::new(segment);
        segments.insert(segment.segnum, Arc::clone(&segment));
        Ok(segment)
    }

    /// Look up a segment by number
    pub fn get_segment(&self, segnum: u32) -> Option<Arc<SegmentId>> {
        self.segments.read().get(&segnum).cloned()
    }

    /// Look up the segment covering a global offset
    pub fn get_offset_segment(&self, offset: u64) -> Result<Arc<SegmentId>> {
        self.segments
            .read()
            .values()
            .rev()
            .find(|s| s.start_offset <= offset)
            .filter(|s| s.contains(offset))
            .cloned()
            .ok_or(RepError::MissingSegment(offset))
    }

    /// Segment covering an LSN; its segment number must agree with the offset
    pub fn segment_of(&self, lsn: Lsn) -> Result<Arc<SegmentId>> {
        match self.get_segment(lsn.segment()) {
            Some(segment) if segment.contains(lsn.offset()) => Ok(segment),
            _ => Err(RepError::MissingSegment(lsn.offset())),
        }
    }

    /// Position of an LSN inside its segment file
    pub fn offset_in_segment(&self, lsn: Lsn) -> Result<u64> {
        Ok(self.segment_of(lsn)?.file_offset(lsn.offset()))
    }

    pub fn last_segment(&self) -> Option<Arc<SegmentId>> {
        self.segments.read().values().next_back().cloned()
    }

    pub fn first_segment(&self) -> Option<Arc<SegmentId>> {
        self.segments.read().values().next().cloned()
    }

    /// Segments whose range ends after `offset`, in log order
    pub fn segments_from(&self, offset: u64) -> Vec<Arc<SegmentId>> {
        self.segments
            .read()
            .values()
            .filter(|s| s.end_offset > offset)
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<Arc<SegmentId>> {
        self.segments.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.segments.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.read().is_empty()
    }
}
