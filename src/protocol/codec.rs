//! Framing and field primitives.
//!
//! A frame is a one-byte type tag, a 4-byte big-endian length that counts
//! itself, and `length - 4` bytes of payload. Readers take a slice and return
//! the decoded field with the unread remainder.

use zerocopy::FromBytes;
use zerocopy::byteorder::big_endian::{I16 as I16BE, I32 as I32BE, U32 as U32BE};

use crate::error::{Error, Result};

/// Tag plus length.
pub const HEADER_LEN: usize = 5;

/// PostgreSQL never sends a message larger than 1 GiB.
pub const MAX_PAYLOAD_LEN: usize = 1 << 30;

/// Split a frame header into the tag and the payload length.
pub fn parse_header(header: &[u8; HEADER_LEN]) -> Result<(u8, usize)> {
    let [tag, len @ ..] = *header;
    let len = i32::from_be_bytes(len);
    let payload_len = usize::try_from(len)
        .ok()
        .and_then(|len| len.checked_sub(4))
        .ok_or_else(|| {
            Error::Protocol(format!("'{}' frame has invalid length {}", tag as char, len))
        })?;
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(Error::Protocol(format!(
            "'{}' frame of {} bytes exceeds the protocol limit",
            tag as char, payload_len
        )));
    }
    Ok((tag, payload_len))
}

fn short(what: &str, need: usize, have: usize) -> Error {
    Error::Protocol(format!("truncated {what}: need {need} bytes, have {have}"))
}

pub fn read_u8(data: &[u8]) -> Result<(u8, &[u8])> {
    data.split_first()
        .map(|(&byte, rest)| (byte, rest))
        .ok_or_else(|| short("byte", 1, 0))
}

pub fn read_i16(data: &[u8]) -> Result<(i16, &[u8])> {
    I16BE::read_from_prefix(data)
        .map(|(v, rest)| (v.get(), rest))
        .map_err(|_| short("int16", 2, data.len()))
}

pub fn read_i32(data: &[u8]) -> Result<(i32, &[u8])> {
    I32BE::read_from_prefix(data)
        .map(|(v, rest)| (v.get(), rest))
        .map_err(|_| short("int32", 4, data.len()))
}

pub fn read_u32(data: &[u8]) -> Result<(u32, &[u8])> {
    U32BE::read_from_prefix(data)
        .map(|(v, rest)| (v.get(), rest))
        .map_err(|_| short("uint32", 4, data.len()))
}

pub fn read_bytes(data: &[u8], len: usize) -> Result<(&[u8], &[u8])> {
    data.split_at_checked(len)
        .ok_or_else(|| short("field", len, data.len()))
}

/// Read a NUL-terminated string; the terminator is consumed but not returned.
pub fn read_cstring(data: &[u8]) -> Result<(&[u8], &[u8])> {
    let end = memchr::memchr(0, data)
        .ok_or_else(|| Error::Protocol("string without NUL terminator".into()))?;
    let (bytes, rest) = data.split_at(end);
    Ok((bytes, &rest[1..]))
}

/// [`read_cstring`], validated as UTF-8.
pub fn read_cstr(data: &[u8]) -> Result<(&str, &[u8])> {
    let (bytes, rest) = read_cstring(data)?;
    simdutf8::compat::from_utf8(bytes)
        .map(|s| (s, rest))
        .map_err(|e| Error::Protocol(format!("string is not UTF-8: {e}")))
}

/// Appends one frame to a buffer and patches its length on `finish`.
pub struct MessageBuilder<'a> {
    buf: &'a mut Vec<u8>,
    len_at: usize,
}

impl<'a> MessageBuilder<'a> {
    pub fn new(buf: &'a mut Vec<u8>, tag: u8) -> Self {
        buf.push(tag);
        let len_at = buf.len();
        buf.extend_from_slice(&[0; 4]);
        Self { buf, len_at }
    }

    /// The whole buffer, for writers that encode straight into it.
    pub fn buf(&mut self) -> &mut Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_cstr(&mut self, s: &str) {
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
    }

    pub fn finish(self) {
        let len = (self.buf.len() - self.len_at) as i32;
        self.buf[self.len_at..self.len_at + 4].copy_from_slice(&len.to_be_bytes());
    }
}
