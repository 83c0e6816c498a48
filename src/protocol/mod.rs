//! PostgreSQL wire protocol, version 3.
//!
//! - `backend`: parsers for server messages, borrowing from the read buffer
//! - `frontend`: writers for the client messages the driver sends
//! - `codec`: message framing and field primitives
//! - `types`: OIDs, format codes, transaction status

pub mod backend;
pub mod codec;
pub mod frontend;
pub mod types;

pub use types::{FormatCode, Oid, TransactionStatus};
