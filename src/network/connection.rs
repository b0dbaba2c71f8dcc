//! TCP link
//!
//! Frames the replication protocol over one `TcpStream`.

use std::io::{BufReader, BufWriter, ErrorKind};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::config::Config;
use crate::error::{RepError, Result};
use crate::protocol::{read_frame, write_data_frame, write_frame, Frame};
use crate::transport::{Endpoint, Link};

/// Frame link over a TCP connection
pub struct TcpLink {
    /// TCP stream reader (buffered for efficiency)
    reader: BufReader<TcpStream>,

    /// TCP stream writer (buffered for efficiency)
    writer: BufWriter<TcpStream>,

    /// Peer address for logging
    peer_addr: String,
}

impl TcpLink {
    /// Wrap an accepted or connected stream
    pub fn new(stream: TcpStream) -> Result<Self> {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        // Disable Nagle's algorithm: every signal is a tiny frame
        stream.set_nodelay(true)?;

        let read_stream = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(stream),
            peer_addr,
        })
    }

    /// Connect to a primary
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .map_err(|e| RepError::Network(format!("connect failed: {}", e)))?;
        Self::new(stream)
    }

    /// Configure connection timeouts (0 = blocking)
    pub fn set_timeouts(&mut self, read_ms: u64, write_ms: u64) -> Result<()> {
        if read_ms > 0 {
            self.reader
                .get_ref()
                .set_read_timeout(Some(Duration::from_millis(read_ms)))?;
        }
        if write_ms > 0 {
            self.writer
                .get_ref()
                .set_write_timeout(Some(Duration::from_millis(write_ms)))?;
        }
        Ok(())
    }

    /// Endpoint over this link sized and timed by `config`
    pub fn into_endpoint(mut self, config: &Config) -> Result<Endpoint<TcpLink>> {
        self.set_timeouts(config.read_timeout_ms, config.write_timeout_ms)?;
        Ok(Endpoint::new(self, config.transport_buffer_size))
    }

    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }
}

/// Map a closed or reset connection to [`RepError::Disconnected`]
fn map_disconnect(e: RepError) -> RepError {
    match &e {
        RepError::Io(io) => match io.kind() {
            ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe => RepError::Disconnected,
            _ => e,
        },
        _ => e,
    }
}

impl Link for TcpLink {
    fn send(&mut self, frame: &Frame) -> Result<()> {
        write_frame(&mut self.writer, frame).map_err(map_disconnect)
    }

    fn send_data(&mut self, imm: u32, bytes: &[u8]) -> Result<()> {
        write_data_frame(&mut self.writer, imm, bytes).map_err(map_disconnect)
    }

    fn recv(&mut self) -> Result<Frame> {
        read_frame(&mut self.reader).map_err(map_disconnect)
    }

    fn peer(&self) -> String {
        self.peer_addr.clone()
    }
}
