//! Protocol Module
//!
//! Defines the frames exchanged by a primary and a backup.
//!
//! ## Frame Format
//!
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Type (1) │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Frame Types
//! - 0x01: SIGNAL - Payload: condition (1)
//! - 0x02: BOUNDS - Payload: 64 x packed LSN (8 each)
//! - 0x03: DATA   - Payload: immediate (4) + bytes
//!
//! ### Conditions
//! - 0x01: READY_TO_RECEIVE
//! - 0x02: PERSISTED

mod codec;
mod frame;

pub use codec::{decode_frame, encode_frame, read_frame, write_data_frame, write_frame, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use frame::{Condition, Frame, FrameType, PartitionBounds, MAX_LOGBUF_PARTITIONS};
