//! Simple query protocol state machine.

use std::sync::Arc;

use crate::buffer_set::BufferSet;
use crate::error::Result;
use crate::handler::RowHandler;
use crate::protocol::backend::{CommandComplete, DataRow, RowDescription, msg_type};
use crate::protocol::frontend::write_query;
use crate::protocol::types::TransactionStatus;
use crate::row::ColumnInfo;

use super::action::Action;
use super::{StateMachine, SyncTail, unexpected};

/// Simple query state machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    WaitingResponse,
    ProcessingRows,
}

/// Simple query protocol state machine.
///
/// The query string may hold several statements; each produces its own
/// result set and the exchange ends with a single ReadyForQuery. Rows arrive
/// in text format.
pub struct SimpleQueryStateMachine<H> {
    state: State,
    query: String,
    columns: Arc<[ColumnInfo]>,
    handler: H,
    tail: SyncTail,
}

impl<H: RowHandler> SimpleQueryStateMachine<H> {
    pub fn new(query: &str, handler: H) -> Self {
        Self {
            state: State::Initial,
            query: query.to_owned(),
            columns: Arc::from(Vec::new()),
            handler,
            tail: SyncTail::default(),
        }
    }

    pub fn into_handler(self) -> H {
        self.handler
    }
}

impl<H: RowHandler> StateMachine for SimpleQueryStateMachine<H> {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if self.state == State::Initial {
            buffer_set.write_buffer.clear();
            write_query(&mut buffer_set.write_buffer, &self.query);
            self.state = State::WaitingResponse;
            return Ok(Action::WriteAndReadMessage);
        }

        // ReadyForQuery may follow any command, so every state accepts it
        if let Some(action) = self.tail.handle(buffer_set)? {
            return Ok(action);
        }

        let type_byte = buffer_set.type_byte;
        let payload = buffer_set.read_buffer.as_slice();
        let outcome = match (self.state, type_byte) {
            (State::WaitingResponse, msg_type::ROW_DESCRIPTION) => {
                let desc = RowDescription::parse(payload)?;
                self.columns = desc.iter().map(ColumnInfo::from_field).collect();
                self.state = State::ProcessingRows;
                self.handler.result_start(&self.columns)
            }
            (State::ProcessingRows, msg_type::DATA_ROW) => {
                let row = DataRow::parse(payload)?;
                self.handler.row(&self.columns, row)
            }
            (_, msg_type::COMMAND_COMPLETE) => {
                let complete = CommandComplete::parse(payload)?;
                // More commands may follow in a multi-statement query
                self.state = State::WaitingResponse;
                self.handler.result_end(complete)
            }
            (State::WaitingResponse, msg_type::EMPTY_QUERY_RESPONSE) => Ok(()),
            _ => return Err(unexpected(type_byte, "in query response")),
        };
        if let Err(e) = outcome {
            self.tail.defer(e)?;
        }
        Ok(Action::ReadMessage)
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.tail.transaction_status()
    }
}
