//! Server → client messages.
//!
//! Parsers borrow from the payload in the connection's read buffer; nothing
//! is copied until a value is decoded into a `Row` or an error.

pub mod error;
pub mod extended;
pub mod query;
pub mod status;

pub use error::{ErrorResponse, NoticeResponse};
pub use extended::ParameterDescription;
pub use query::{CommandComplete, DataRow, FieldDescription, RowDescription};
pub use status::{NotificationResponse, ParameterStatus, ReadyForQuery};

/// Type tags of the backend messages the driver understands.
pub mod msg_type {
    // extended query
    pub const PARSE_COMPLETE: u8 = b'1';
    pub const BIND_COMPLETE: u8 = b'2';
    pub const CLOSE_COMPLETE: u8 = b'3';
    pub const PARAMETER_DESCRIPTION: u8 = b't';
    pub const NO_DATA: u8 = b'n';

    // results
    pub const ROW_DESCRIPTION: u8 = b'T';
    pub const DATA_ROW: u8 = b'D';
    pub const COMMAND_COMPLETE: u8 = b'C';
    pub const EMPTY_QUERY_RESPONSE: u8 = b'I';
    pub const ERROR_RESPONSE: u8 = b'E';
    pub const READY_FOR_QUERY: u8 = b'Z';

    // may arrive between any two messages
    pub const NOTICE_RESPONSE: u8 = b'N';
    pub const NOTIFICATION_RESPONSE: u8 = b'A';
    pub const PARAMETER_STATUS: u8 = b'S';

    /// True for messages that are not part of the current exchange.
    pub fn is_async(type_byte: u8) -> bool {
        matches!(
            type_byte,
            NOTICE_RESPONSE | NOTIFICATION_RESPONSE | PARAMETER_STATUS
        )
    }
}
