//! Client → server messages.
//!
//! Writers append complete frames to a caller-owned buffer so a whole
//! exchange (e.g. Parse, Describe, Sync) goes out in one write.

pub mod extended;
pub mod simple;

pub use extended::{
    write_bind, write_close_statement, write_describe_statement, write_execute, write_parse,
    write_sync,
};
pub use simple::{write_query, write_terminate};

/// Type tags of the frontend messages the driver sends.
pub mod msg_type {
    pub const PARSE: u8 = b'P';
    pub const BIND: u8 = b'B';
    pub const DESCRIBE: u8 = b'D';
    pub const EXECUTE: u8 = b'E';
    pub const CLOSE: u8 = b'C';
    pub const SYNC: u8 = b'S';
    pub const QUERY: u8 = b'Q';
    pub const TERMINATE: u8 = b'X';
}
