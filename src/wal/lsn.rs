//! Log Sequence Numbers
//!
//! An LSN names a byte position in the global log address space together
//! with the number of the segment holding it.
//!
//! ## Packed Layout
//! ```text
//! ┌──────────────────────────────┬──────────────────┐
//! │        offset (48 bits)      │ segment (16 bits)│
//! └──────────────────────────────┴──────────────────┘
//! ```

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Bits reserved for the segment number in the packed form
pub const SEGMENT_BITS: u32 = 16;

/// Largest representable log offset
pub const MAX_OFFSET: u64 = (1 << (64 - SEGMENT_BITS)) - 1;

/// A position in the log
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Lsn(u64);

impl Lsn {
    /// Marker for "no position"
    pub const INVALID: Lsn = Lsn(u64::MAX);

    /// Build an LSN from a global offset and its segment number
    pub fn make(offset: u64, segment: u32) -> Self {
        debug_assert!(offset <= MAX_OFFSET, "log offset 0x{:x} overflows", offset);
        debug_assert!(segment < (1 << SEGMENT_BITS));
        Lsn((offset << SEGMENT_BITS) | u64::from(segment))
    }

    /// Global offset in the log address space
    pub fn offset(self) -> u64 {
        self.0 >> SEGMENT_BITS
    }

    /// Segment number holding this position
    pub fn segment(self) -> u32 {
        (self.0 & ((1 << SEGMENT_BITS) - 1)) as u32
    }

    pub fn is_valid(self) -> bool {
        self != Lsn::INVALID
    }

    pub fn to_u64(self) -> u64 {
        self.0
    }

    pub fn from_u64(raw: u64) -> Self {
        Lsn(raw)
    }

    /// Byte distance from `earlier`; both must come from the same log
    pub fn distance(self, earlier: Lsn) -> u64 {
        debug_assert!(self.offset() >= earlier.offset());
        self.offset() - earlier.offset()
    }

    /// Same segment, `bytes` further along
    pub fn advance(self, bytes: u64) -> Lsn {
        Lsn::make(self.offset() + bytes, self.segment())
    }
}

impl Ord for Lsn {
    fn cmp(&self, other: &Self) -> Ordering {
        self.offset()
            .cmp(&other.offset())
            .then(self.segment().cmp(&other.segment()))
    }
}

impl PartialOrd for Lsn {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Lsn::INVALID {
            return write!(f, "Lsn(INVALID)");
        }
        write!(f, "Lsn({}:0x{:x})", self.segment(), self.offset())
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}.{}", self.offset(), self.segment())
    }
}
