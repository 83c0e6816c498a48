//! Per-connection message buffers.

use crate::protocol::codec::HEADER_LEN;

/// Buffers reused across every exchange on one connection.
#[derive(Debug)]
pub struct BufferSet {
    /// Payload of the last message read (grows to fit; fields of any size)
    pub read_buffer: Vec<u8>,
    /// Encoded messages waiting to be written
    pub write_buffer: Vec<u8>,
    /// Type byte of the last message read
    pub type_byte: u8,
    /// Header of the frame being read
    pub(crate) header: [u8; HEADER_LEN],
    /// Bytes of the current frame received so far, header included. Zero
    /// between frames.
    pub(crate) frame_filled: usize,
}

impl BufferSet {
    pub fn new() -> Self {
        Self {
            read_buffer: Vec::with_capacity(8192),
            write_buffer: Vec::with_capacity(8192),
            type_byte: 0,
            header: [0; HEADER_LEN],
            frame_filled: 0,
        }
    }

    /// True while a frame has been partly read.
    pub fn in_frame(&self) -> bool {
        self.frame_filled > 0
    }
}

impl Default for BufferSet {
    fn default() -> Self {
        Self::new()
    }
}
