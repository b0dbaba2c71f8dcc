//! Transport Module
//!
//! Half-duplex channel between a primary and one backup.
//!
//! ## Model
//! - One reusable receive buffer per channel, never a queue
//! - The receiver hands its buffer over by signaling `ReadyToReceive`
//! - The sender may write only while it holds that turn; a chunk write
//!   (`write_imm`) gives the turn back
//! - Every chunk carries a 32-bit immediate value
//!
//! ## Immediate Value
//! ```text
//! ┌───┬─────────────────────────────────────────────┐
//! │ N │  new segment start - current segment start  │
//! └───┴─────────────────────────────────────────────┘
//!  bit 31              bits 0..31
//! ```
//! Bootstrap chunks carry their byte count instead.

mod endpoint;
mod memory;

pub use endpoint::{Endpoint, EndpointStats};
pub use memory::{memory_pair, MemoryLink};

use crate::error::{RepError, Result};
use crate::protocol::{Condition, Frame, PartitionBounds};

/// High bit of the immediate value: chunk begins a new segment
pub const IMM_NEW_SEGMENT: u32 = 1 << 31;

/// Immediate value announcing a segment that starts `delta` bytes after
/// the current segment's start
pub fn new_segment_imm(delta: u64) -> Result<u32> {
    if delta >= u64::from(IMM_NEW_SEGMENT) {
        return Err(RepError::Protocol(format!(
            "segment start delta 0x{:x} does not fit the immediate value",
            delta
        )));
    }
    Ok(IMM_NEW_SEGMENT | delta as u32)
}

/// Start delta carried by a new-segment immediate, if the bit is set
pub fn new_segment_delta(imm: u32) -> Option<u64> {
    if imm & IMM_NEW_SEGMENT != 0 {
        Some(u64::from(imm & !IMM_NEW_SEGMENT))
    } else {
        None
    }
}

/// A chunk sitting in the receive buffer
#[derive(Debug)]
pub struct Received<'a> {
    pub data: &'a [u8],
    pub imm: u32,
}

/// Frame transport underneath an [`Endpoint`]
pub trait Link: Send {
    fn send(&mut self, frame: &Frame) -> Result<()>;

    /// Send a DATA frame from a borrowed slice
    fn send_data(&mut self, imm: u32, bytes: &[u8]) -> Result<()> {
        self.send(&Frame::Data {
            imm,
            payload: bytes.to_vec(),
        })
    }

    fn recv(&mut self) -> Result<Frame>;

    /// Peer description for logging
    fn peer(&self) -> String;
}

/// One side of a replication channel
pub trait Channel: Send {
    /// Size of the reusable buffer (max bytes per chunk)
    fn capacity(&self) -> usize;

    /// Tell the peer a condition holds
    fn signal(&mut self, condition: Condition) -> Result<()>;

    /// Block until the peer signals `condition`
    fn wait(&mut self, condition: Condition) -> Result<()>;

    /// Write the partition-bounds table; requires the turn, keeps it
    fn write_bounds(&mut self, bounds: &PartitionBounds) -> Result<()>;

    /// Write a chunk with its immediate value; requires the turn, releases it
    fn write_imm(&mut self, bytes: &[u8], imm: u32) -> Result<()>;

    /// Block until the peer's bounds table arrives
    fn receive_bounds(&mut self) -> Result<PartitionBounds>;

    /// Block until a chunk arrives in the receive buffer
    fn receive_imm(&mut self) -> Result<Received<'_>>;

    fn peer(&self) -> String;
}
