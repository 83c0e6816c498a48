//! Parse, Describe, Bind, Execute, Close and Sync.

use crate::error::{Error, Result};
use crate::protocol::codec::MessageBuilder;
use crate::protocol::types::{FormatCode, Oid};
use crate::types::{ToParams, preferred_format};

/// Counts travel as Int16 on the wire.
fn wire_count(len: usize, what: &str) -> Result<i16> {
    i16::try_from(len).map_err(|_| {
        Error::InvalidUsage(format!("too many {what}: {len} (at most {})", i16::MAX))
    })
}

/// Write Parse. An empty `param_oids` lets the server infer every
/// parameter type.
pub fn write_parse(buf: &mut Vec<u8>, name: &str, query: &str, param_oids: &[Oid]) -> Result<()> {
    let count = wire_count(param_oids.len(), "parameter types")?;
    let mut msg = MessageBuilder::new(buf, super::msg_type::PARSE);
    msg.write_cstr(name);
    msg.write_cstr(query);
    msg.write_i16(count);
    for &oid in param_oids {
        msg.write_u32(oid);
    }
    msg.finish();
    Ok(())
}

/// Write Bind for the unnamed portal or `portal`.
///
/// Each parameter is encoded for the type the server reported for it at
/// prepare time. On an encoding error nothing is left in `buf`.
pub fn write_bind<P: ToParams>(
    buf: &mut Vec<u8>,
    portal: &str,
    statement: &str,
    params: &P,
    param_oids: &[Oid],
    result_formats: &[FormatCode],
) -> Result<()> {
    let param_count = wire_count(param_oids.len(), "parameters")?;
    let result_count = wire_count(result_formats.len(), "result columns")?;

    let rollback = buf.len();
    let mut msg = MessageBuilder::new(buf, super::msg_type::BIND);

    msg.write_cstr(portal);
    msg.write_cstr(statement);

    msg.write_i16(param_count);
    for &oid in param_oids {
        msg.write_i16(preferred_format(oid) as i16);
    }

    msg.write_i16(param_count);
    if let Err(e) = params.encode(param_oids, msg.buf()) {
        buf.truncate(rollback);
        return Err(e);
    }

    msg.write_i16(result_count);
    for &fmt in result_formats {
        msg.write_i16(fmt as i16);
    }

    msg.finish();
    Ok(())
}

/// Write Execute; `max_rows == 0` fetches everything.
pub fn write_execute(buf: &mut Vec<u8>, portal: &str, max_rows: u32) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::EXECUTE);
    msg.write_cstr(portal);
    msg.write_u32(max_rows);
    msg.finish();
}

/// Write Describe for a prepared statement (not a portal).
pub fn write_describe_statement(buf: &mut Vec<u8>, name: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::DESCRIBE);
    msg.write_u8(b'S');
    msg.write_cstr(name);
    msg.finish();
}

/// Write Close for a prepared statement.
pub fn write_close_statement(buf: &mut Vec<u8>, name: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::CLOSE);
    msg.write_u8(b'S');
    msg.write_cstr(name);
    msg.finish();
}

/// Write Sync. The server answers with ReadyForQuery even after an error
/// earlier in the sequence.
pub fn write_sync(buf: &mut Vec<u8>) {
    let msg = MessageBuilder::new(buf, super::msg_type::SYNC);
    msg.finish();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::oid;

    #[test]
    fn test_parse() {
        let mut buf = Vec::new();
        write_parse(&mut buf, "stmt1", "SELECT $1::int", &[0]).unwrap();

        assert_eq!(buf[0], b'P');

        let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        assert_eq!(len as usize, buf.len() - 1);
    }

    #[test]
    fn test_sync() {
        let mut buf = Vec::new();
        write_sync(&mut buf);

        assert_eq!(buf, [b'S', 0, 0, 0, 4]);
    }

    #[test]
    fn test_close_statement() {
        let mut buf = Vec::new();
        write_close_statement(&mut buf, "s1");

        assert_eq!(buf[0], b'C');
        assert_eq!(&buf[5..], b"Ss1\0");
    }

    #[test]
    fn test_bind_with_null_text() {
        let mut buf = Vec::new();
        write_bind(
            &mut buf,
            "",
            "s1",
            &(None::<&str>,),
            &[oid::TEXT],
            &[FormatCode::Binary],
        )
        .unwrap();

        assert_eq!(buf[0], b'B');
        let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        assert_eq!(len as usize, buf.len() - 1);
        // portal "", statement "s1", 1 format (binary), 1 value of length -1
        let body = &buf[5..];
        assert_eq!(&body[..4], b"\0s1\0");
        assert_eq!(&body[4..8], &[0, 1, 0, 1]);
        assert_eq!(&body[8..10], &[0, 1]);
        assert_eq!(&body[10..14], &(-1_i32).to_be_bytes());
    }

    #[test]
    fn test_bind_encode_error_leaves_buffer_untouched() {
        let mut buf = vec![1, 2, 3];
        let result = write_bind(&mut buf, "", "s1", &(true,), &[oid::INT4], &[]);
        assert!(result.is_err());
        assert_eq!(buf, [1, 2, 3]);
    }

    #[test]
    fn test_parameter_count_over_int16_is_rejected() {
        let oids = vec![oid::TEXT; 40_000];
        let params = vec!["x"; 40_000];

        let mut buf = vec![7];
        let err = write_bind(&mut buf, "", "s1", &params, &oids, &[]).unwrap_err();
        assert!(matches!(err, Error::InvalidUsage(ref msg) if msg.contains("40000")));
        assert_eq!(buf, [7]);

        assert!(matches!(
            write_parse(&mut buf, "s1", "select 1", &oids),
            Err(Error::InvalidUsage(_))
        ));
        assert_eq!(buf, [7]);
    }

    #[test]
    fn test_execute() {
        let mut buf = Vec::new();
        write_execute(&mut buf, "", 0);

        assert_eq!(buf[0], b'E');
        // Length: 4 + 1 (empty string + null) + 4 (max_rows) = 9
        let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        assert_eq!(len, 9);
    }
}
