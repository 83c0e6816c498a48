//! ErrorResponse and NoticeResponse.

use crate::error::{Error, Result, ServerError};
use crate::protocol::codec::{read_cstr, read_u8};

/// Field tags of ErrorResponse and NoticeResponse.
pub mod field_type {
    pub const SEVERITY: u8 = b'S';
    /// Never localized (PostgreSQL 9.6+)
    pub const SEVERITY_NON_LOCALIZED: u8 = b'V';
    /// SQLSTATE
    pub const CODE: u8 = b'C';
    pub const MESSAGE: u8 = b'M';
    pub const DETAIL: u8 = b'D';
    pub const HINT: u8 = b'H';
    /// 1-based character offset into the query
    pub const POSITION: u8 = b'P';
    pub const WHERE: u8 = b'W';
    pub const SCHEMA: u8 = b's';
    pub const TABLE: u8 = b't';
    pub const COLUMN: u8 = b'c';
    pub const DATA_TYPE: u8 = b'd';
    pub const CONSTRAINT: u8 = b'n';
    pub const ROUTINE: u8 = b'R';
}

fn slot(fields: &mut ServerError, tag: u8) -> Option<&mut Option<String>> {
    use field_type::*;
    Some(match tag {
        SEVERITY => &mut fields.severity,
        SEVERITY_NON_LOCALIZED => &mut fields.severity_non_localized,
        CODE => &mut fields.code,
        MESSAGE => &mut fields.message,
        DETAIL => &mut fields.detail,
        HINT => &mut fields.hint,
        WHERE => &mut fields.where_,
        SCHEMA => &mut fields.schema,
        TABLE => &mut fields.table,
        COLUMN => &mut fields.column,
        DATA_TYPE => &mut fields.data_type,
        CONSTRAINT => &mut fields.constraint,
        ROUTINE => &mut fields.routine,
        _ => return None,
    })
}

/// Read `(tag, C string)` pairs up to the terminating zero byte. Values are
/// kept whole whatever their length.
fn parse_fields(payload: &[u8]) -> Result<ServerError> {
    let mut fields = ServerError::default();
    let mut data = payload;

    loop {
        let (tag, rest) = read_u8(data)?;
        if tag == 0 {
            return Ok(fields);
        }
        let (value, rest) = read_cstr(rest)?;
        data = rest;

        if tag == field_type::POSITION {
            fields.position = value.parse().ok();
        } else if let Some(target) = slot(&mut fields, tag) {
            *target = Some(value.to_owned());
        } else {
            tracing::trace!(tag = %(tag as char), "skipping unknown error field");
        }
    }
}

/// ErrorResponse ('E').
#[derive(Debug, Clone)]
pub struct ErrorResponse(pub ServerError);

impl ErrorResponse {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(Self(parse_fields(payload)?))
    }

    pub fn into_error(self) -> Error {
        Error::Server(self.0)
    }
}

/// Same fields as an error, reported without failing anything.
#[derive(Debug, Clone)]
pub struct NoticeResponse(pub ServerError);

impl NoticeResponse {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(Self(parse_fields(payload)?))
    }
}
