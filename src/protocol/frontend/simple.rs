//! Query and Terminate.

use crate::protocol::codec::MessageBuilder;

/// Write a Query message. `sql` may hold several `;`-separated statements;
/// results come back in text format.
pub fn write_query(buf: &mut Vec<u8>, sql: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::QUERY);
    msg.write_cstr(sql);
    msg.finish();
}

/// Write Terminate. The server closes the session without replying.
pub fn write_terminate(buf: &mut Vec<u8>) {
    MessageBuilder::new(buf, super::msg_type::TERMINATE).finish();
}
