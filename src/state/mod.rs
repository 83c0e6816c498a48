//! Sans-I/O state machines for PostgreSQL protocol.
//!
//! These state machines handle the protocol logic without performing any I/O.
//! They produce `Action` values that tell the caller what to do next. Every
//! exchange ends with Sync, so every machine runs until ReadyForQuery; an
//! error reported along the way is held back until then so the connection is
//! left in sync.

pub mod action;
pub mod extended;
pub mod simple_query;

pub use action::{Action, AsyncMessage};
pub use extended::{
    CloseStatementsStateMachine, ExecuteStateMachine, PrepareStateMachine, PreparedInfo,
};
pub use simple_query::SimpleQueryStateMachine;

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::protocol::backend::{
    ErrorResponse, NoticeResponse, NotificationResponse, ParameterStatus, ReadyForQuery,
    msg_type,
};
use crate::protocol::types::TransactionStatus;

/// A protocol exchange driven by the connection.
pub trait StateMachine {
    /// Advance the machine. The first call emits the request; later calls
    /// consume the message in `buffer_set`.
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action>;

    /// Transaction status from the final ReadyForQuery.
    fn transaction_status(&self) -> TransactionStatus;
}

/// Messages every exchange handles the same way: async messages, ErrorResponse,
/// and the closing ReadyForQuery.
#[derive(Debug, Default)]
pub(crate) struct SyncTail {
    pending: Option<Error>,
    draining: bool,
    transaction_status: TransactionStatus,
}

impl SyncTail {
    /// Handle the current message if it is one of the shared kinds. Returns
    /// `None` when the machine has to interpret it.
    pub(crate) fn handle(&mut self, buffer_set: &BufferSet) -> Result<Option<Action>> {
        let type_byte = buffer_set.type_byte;
        let payload = buffer_set.read_buffer.as_slice();

        if msg_type::is_async(type_byte) {
            let msg = parse_async_message(type_byte, payload)?;
            return Ok(Some(Action::HandleAsyncMessageAndReadMessage(msg)));
        }

        match type_byte {
            msg_type::READY_FOR_QUERY => {
                let ready = ReadyForQuery::parse(payload)?;
                let status = ready.status;
                self.transaction_status = ready.transaction_status().ok_or_else(|| {
                    Error::Protocol(format!("unknown transaction status {}", status))
                })?;
                match self.pending.take() {
                    Some(err) => Err(err),
                    None => Ok(Some(Action::Finished)),
                }
            }
            msg_type::ERROR_RESPONSE => {
                let err = ErrorResponse::parse(payload)?.into_error();
                self.defer(err)?;
                Ok(Some(Action::ReadMessage))
            }
            _ if self.draining => Ok(Some(Action::ReadMessage)),
            _ => Ok(None),
        }
    }

    /// Hold an error until ReadyForQuery and skip the rest of the exchange.
    /// Errors that break the connection are returned immediately.
    pub(crate) fn defer(&mut self, err: Error) -> Result<()> {
        if err.is_connection_broken() {
            return Err(err);
        }
        if self.pending.is_none() {
            self.pending = Some(err);
        }
        self.draining = true;
        Ok(())
    }

    pub(crate) fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }
}

pub(crate) fn parse_async_message(type_byte: u8, payload: &[u8]) -> Result<AsyncMessage> {
    match type_byte {
        msg_type::NOTICE_RESPONSE => {
            let notice = NoticeResponse::parse(payload)?;
            Ok(AsyncMessage::Notice(notice.0))
        }
        msg_type::PARAMETER_STATUS => {
            let param = ParameterStatus::parse(payload)?;
            Ok(AsyncMessage::ParameterChanged {
                name: param.name.to_string(),
                value: param.value.to_string(),
            })
        }
        msg_type::NOTIFICATION_RESPONSE => {
            let notification = NotificationResponse::parse(payload)?;
            Ok(AsyncMessage::Notification {
                pid: notification.pid,
                channel: notification.channel.to_string(),
                payload: notification.payload.to_string(),
            })
        }
        _ => Err(Error::Protocol(format!(
            "Unknown async message type: '{}'",
            type_byte as char
        ))),
    }
}

pub(crate) fn unexpected(type_byte: u8, context: &str) -> Error {
    Error::Protocol(format!(
        "Unexpected message '{}' {}",
        type_byte as char, context
    ))
}
