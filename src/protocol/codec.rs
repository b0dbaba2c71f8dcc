//! Protocol codec
//!
//! Encoding and decoding functions for replication frames.
//!
//! ### Payload by Frame Type
//! - SIGNAL: condition (1 byte)
//! - BOUNDS: 64 big-endian u64 entries
//! - DATA:   imm (4 bytes) + chunk bytes

use std::io::{Read, Write};

use crate::error::{RepError, Result};

use super::{Condition, Frame, FrameType, PartitionBounds, MAX_LOGBUF_PARTITIONS};

/// Header size: 1 byte frame type + 4 bytes length
pub const HEADER_SIZE: usize = 5;

/// Maximum payload size (256 MB)
pub const MAX_PAYLOAD_SIZE: u32 = 256 * 1024 * 1024;

const BOUNDS_PAYLOAD_SIZE: usize = MAX_LOGBUF_PARTITIONS * 8;

// =============================================================================
// Frame Encoding/Decoding
// =============================================================================

/// Encode a frame to bytes
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let payload = match frame {
        Frame::Signal(condition) => vec![*condition as u8],
        Frame::Bounds(bounds) => {
            let mut payload = Vec::with_capacity(BOUNDS_PAYLOAD_SIZE);
            for entry in bounds.0.iter() {
                payload.extend_from_slice(&entry.to_be_bytes());
            }
            payload
        }
        Frame::Data { imm, payload: bytes } => {
            let mut payload = Vec::with_capacity(4 + bytes.len());
            payload.extend_from_slice(&imm.to_be_bytes());
            payload.extend_from_slice(bytes);
            payload
        }
    };

    let mut message = Vec::with_capacity(HEADER_SIZE + payload.len());
    message.push(frame.frame_type() as u8);
    message.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    message.extend_from_slice(&payload);
    message
}

/// Decode a frame from bytes
pub fn decode_frame(bytes: &[u8]) -> Result<Frame> {
    if bytes.len() < HEADER_SIZE {
        return Err(RepError::Protocol(format!(
            "Incomplete header: expected {} bytes, got {}",
            HEADER_SIZE,
            bytes.len()
        )));
    }

    let frame_type = bytes[0];
    let payload_len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;

    if payload_len > MAX_PAYLOAD_SIZE as usize {
        return Err(RepError::Protocol(format!(
            "Payload too large: {} bytes (max {})",
            payload_len, MAX_PAYLOAD_SIZE
        )));
    }

    let total_len = HEADER_SIZE + payload_len;
    if bytes.len() < total_len {
        return Err(RepError::Protocol(format!(
            "Incomplete payload: expected {} bytes, got {}",
            total_len,
            bytes.len()
        )));
    }

    let payload = &bytes[HEADER_SIZE..total_len];

    match frame_type {
        t if t == FrameType::Signal as u8 => decode_signal(payload),
        t if t == FrameType::Bounds as u8 => decode_bounds(payload),
        t if t == FrameType::Data as u8 => decode_data(payload),
        _ => Err(RepError::Protocol(format!(
            "Unknown frame type: 0x{:02x}",
            frame_type
        ))),
    }
}

fn decode_signal(payload: &[u8]) -> Result<Frame> {
    if payload.len() != 1 {
        return Err(RepError::Protocol(format!(
            "SIGNAL frame: expected 1 byte, got {}",
            payload.len()
        )));
    }
    Condition::from_u8(payload[0])
        .map(Frame::Signal)
        .ok_or_else(|| RepError::Protocol(format!("Unknown condition: 0x{:02x}", payload[0])))
}

fn decode_bounds(payload: &[u8]) -> Result<Frame> {
    if payload.len() != BOUNDS_PAYLOAD_SIZE {
        return Err(RepError::Protocol(format!(
            "BOUNDS frame: expected {} bytes, got {}",
            BOUNDS_PAYLOAD_SIZE,
            payload.len()
        )));
    }

    let mut bounds = PartitionBounds::empty();
    for (entry, raw) in bounds.0.iter_mut().zip(payload.chunks_exact(8)) {
        let mut word = [0u8; 8];
        word.copy_from_slice(raw);
        *entry = u64::from_be_bytes(word);
    }
    Ok(Frame::Bounds(bounds))
}

fn decode_data(payload: &[u8]) -> Result<Frame> {
    if payload.len() < 4 {
        return Err(RepError::Protocol(
            "DATA frame: missing immediate value".to_string(),
        ));
    }
    let imm = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
    Ok(Frame::Data {
        imm,
        payload: payload[4..].to_vec(),
    })
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read a complete frame from a stream
///
/// Blocks until a complete frame is received or an error occurs
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Frame> {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header)?;

    let payload_len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
    if payload_len > MAX_PAYLOAD_SIZE as usize {
        return Err(RepError::Protocol(format!(
            "Payload too large: {} bytes (max {})",
            payload_len, MAX_PAYLOAD_SIZE
        )));
    }

    let mut full_message = vec![0u8; HEADER_SIZE + payload_len];
    full_message[..HEADER_SIZE].copy_from_slice(&header);
    if payload_len > 0 {
        reader.read_exact(&mut full_message[HEADER_SIZE..])?;
    }

    decode_frame(&full_message)
}

/// Write a frame to a stream
pub fn write_frame<W: Write>(writer: &mut W, frame: &Frame) -> Result<()> {
    if let Frame::Data { imm, payload } = frame {
        return write_data_frame(writer, *imm, payload);
    }
    let bytes = encode_frame(frame);
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// Write a DATA frame without building an owned [`Frame`] first
pub fn write_data_frame<W: Write>(writer: &mut W, imm: u32, bytes: &[u8]) -> Result<()> {
    let payload_len = 4 + bytes.len();
    if payload_len > MAX_PAYLOAD_SIZE as usize {
        return Err(RepError::Protocol(format!(
            "Payload too large: {} bytes (max {})",
            payload_len, MAX_PAYLOAD_SIZE
        )));
    }

    writer.write_all(&[FrameType::Data as u8])?;
    writer.write_all(&(payload_len as u32).to_be_bytes())?;
    writer.write_all(&imm.to_be_bytes())?;
    writer.write_all(bytes)?;
    writer.flush()?;
    Ok(())
}
