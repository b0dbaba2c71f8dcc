//! In-process link
//!
//! Two crossbeam channels cross-wired into a pair of endpoints. Used by
//! tests and by nodes that run a primary and a backup in one process.

use crossbeam::channel::{unbounded, Receiver, Sender};

use crate::error::{RepError, Result};
use crate::protocol::Frame;

use super::{Endpoint, Link};

/// One direction pair of an in-process channel
pub struct MemoryLink {
    name: &'static str,
    tx: Sender<Frame>,
    rx: Receiver<Frame>,
}

impl Link for MemoryLink {
    fn send(&mut self, frame: &Frame) -> Result<()> {
        self.tx
            .send(frame.clone())
            .map_err(|_| RepError::Disconnected)
    }

    fn send_data(&mut self, imm: u32, bytes: &[u8]) -> Result<()> {
        self.tx
            .send(Frame::Data {
                imm,
                payload: bytes.to_vec(),
            })
            .map_err(|_| RepError::Disconnected)
    }

    fn recv(&mut self) -> Result<Frame> {
        self.rx.recv().map_err(|_| RepError::Disconnected)
    }

    fn peer(&self) -> String {
        format!("memory:{}", self.name)
    }
}

/// Build a connected (primary, backup) endpoint pair
pub fn memory_pair(capacity: usize) -> (Endpoint<MemoryLink>, Endpoint<MemoryLink>) {
    let (to_backup, from_primary) = unbounded();
    let (to_primary, from_backup) = unbounded();

    let primary = MemoryLink {
        name: "backup",
        tx: to_backup,
        rx: from_backup,
    };
    let backup = MemoryLink {
        name: "primary",
        tx: to_primary,
        rx: from_primary,
    };

    (
        Endpoint::new(primary, capacity),
        Endpoint::new(backup, capacity),
    )
}
