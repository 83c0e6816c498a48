//! What a state machine asks its driver to do next.

use crate::error::ServerError;

/// I/O request returned by [`StateMachine::step`](super::StateMachine::step).
#[derive(Debug)]
pub enum Action {
    /// Send `buffer_set.write_buffer`, then read one message.
    WriteAndReadMessage,

    /// Read one message into `buffer_set`.
    ReadMessage,

    /// Hand the message to the connection's async message handler, then read
    /// the next message.
    HandleAsyncMessageAndReadMessage(AsyncMessage),

    /// ReadyForQuery was received and nothing was pending.
    Finished,
}

/// Message the server may send outside of any exchange.
#[derive(Debug, Clone)]
pub enum AsyncMessage {
    /// LISTEN/NOTIFY notification.
    Notification {
        /// Backend process that sent it
        pid: u32,
        channel: String,
        payload: String,
    },

    /// NoticeResponse (warnings, informational messages).
    Notice(ServerError),

    /// ParameterStatus, e.g. after `SET TimeZone`.
    ParameterChanged { name: String, value: String },
}
