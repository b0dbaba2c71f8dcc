//! Channel endpoint
//!
//! Enforces the half-duplex turn protocol on top of any frame [`Link`].

use crate::error::{RepError, Result};
use crate::protocol::{Condition, Frame, PartitionBounds};

use super::{Channel, Link, Received};

/// Traffic counters of one endpoint
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EndpointStats {
    pub chunks_sent: u64,
    pub bytes_sent: u64,
    pub chunks_received: u64,
    pub bytes_received: u64,
}

/// Channel endpoint over a frame link
///
/// ## Turn Protocol:
/// - `turn` is set by a completed `wait(ReadyToReceive)`
/// - `write_bounds` needs the turn, `write_imm` needs and consumes it
/// - Signals that arrive while waiting for something else are counted
///   and satisfy a later `wait` for that condition
pub struct Endpoint<L: Link> {
    link: L,
    buffer: Vec<u8>,
    capacity: usize,
    turn: bool,
    ready_seen: u64,
    persisted_seen: u64,
    stats: EndpointStats,
}

impl<L: Link> Endpoint<L> {
    pub fn new(link: L, capacity: usize) -> Self {
        Self {
            link,
            buffer: vec![0u8; capacity],
            capacity,
            turn: false,
            ready_seen: 0,
            persisted_seen: 0,
            stats: EndpointStats::default(),
        }
    }

    pub fn stats(&self) -> EndpointStats {
        self.stats
    }

    /// Whether this side may write right now
    pub fn holds_turn(&self) -> bool {
        self.turn
    }

    fn record(&mut self, condition: Condition) {
        match condition {
            Condition::ReadyToReceive => self.ready_seen += 1,
            Condition::Persisted => self.persisted_seen += 1,
        }
    }

    fn take(&mut self, condition: Condition) -> bool {
        let seen = match condition {
            Condition::ReadyToReceive => &mut self.ready_seen,
            Condition::Persisted => &mut self.persisted_seen,
        };
        if *seen > 0 {
            *seen -= 1;
            true
        } else {
            false
        }
    }

    /// Next non-signal frame; signals on the way are recorded
    fn next_payload_frame(&mut self) -> Result<Frame> {
        loop {
            match self.link.recv()? {
                Frame::Signal(condition) => self.record(condition),
                frame => return Ok(frame),
            }
        }
    }
}

impl<L: Link> Channel for Endpoint<L> {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn signal(&mut self, condition: Condition) -> Result<()> {
        tracing::trace!("signal {:?} to {}", condition, self.link.peer());
        self.link.send(&Frame::Signal(condition))
    }

    fn wait(&mut self, condition: Condition) -> Result<()> {
        while !self.take(condition) {
            match self.link.recv()? {
                Frame::Signal(seen) => self.record(seen),
                other => {
                    return Err(RepError::Protocol(format!(
                        "unexpected {:?} frame from {} while waiting for {:?}",
                        other.frame_type(),
                        self.link.peer(),
                        condition
                    )))
                }
            }
        }
        if condition == Condition::ReadyToReceive {
            self.turn = true;
        }
        Ok(())
    }

    fn write_bounds(&mut self, bounds: &PartitionBounds) -> Result<()> {
        if !self.turn {
            return Err(RepError::NotReady);
        }
        self.link.send(&Frame::Bounds(bounds.clone()))
    }

    fn write_imm(&mut self, bytes: &[u8], imm: u32) -> Result<()> {
        if !self.turn {
            return Err(RepError::NotReady);
        }
        if bytes.len() > self.capacity {
            return Err(RepError::Protocol(format!(
                "chunk of {} bytes exceeds transport buffer of {} bytes",
                bytes.len(),
                self.capacity
            )));
        }

        self.link.send_data(imm, bytes)?;
        self.turn = false;
        self.stats.chunks_sent += 1;
        self.stats.bytes_sent += bytes.len() as u64;
        Ok(())
    }

    fn receive_bounds(&mut self) -> Result<PartitionBounds> {
        match self.next_payload_frame()? {
            Frame::Bounds(bounds) => Ok(bounds),
            other => Err(RepError::Protocol(format!(
                "expected BOUNDS frame from {}, got {:?}",
                self.link.peer(),
                other.frame_type()
            ))),
        }
    }

    fn receive_imm(&mut self) -> Result<Received<'_>> {
        let (imm, payload) = match self.next_payload_frame()? {
            Frame::Data { imm, payload } => (imm, payload),
            other => {
                return Err(RepError::Protocol(format!(
                    "expected DATA frame from {}, got {:?}",
                    self.link.peer(),
                    other.frame_type()
                )))
            }
        };

        if payload.len() > self.capacity {
            return Err(RepError::Protocol(format!(
                "received {} bytes into a {} byte buffer",
                payload.len(),
                self.capacity
            )));
        }

        let len = payload.len();
        self.buffer[..len].copy_from_slice(&payload);
        self.stats.chunks_received += 1;
        self.stats.bytes_received += len as u64;

        Ok(Received {
            data: &self.buffer[..len],
            imm,
        })
    }

    fn peer(&self) -> String {
        self.link.peer()
    }
}
