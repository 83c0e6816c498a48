//! Extended query protocol state machines.

use std::sync::Arc;

use crate::buffer_set::BufferSet;
use crate::error::Result;
use crate::handler::RowHandler;
use crate::protocol::backend::{
    CommandComplete, DataRow, ParameterDescription, RowDescription, msg_type,
};
use crate::protocol::frontend::{
    write_bind, write_close_statement, write_describe_statement, write_execute, write_parse,
    write_sync,
};
use crate::protocol::types::{FormatCode, Oid, TransactionStatus};
use crate::row::ColumnInfo;
use crate::types::ToParams;

use super::action::Action;
use super::{StateMachine, SyncTail, unexpected};

/// Move a prebuilt request into the write buffer.
fn emit(request: &mut Vec<u8>, buffer_set: &mut BufferSet) -> Action {
    buffer_set.write_buffer.clear();
    buffer_set.write_buffer.append(request);
    Action::WriteAndReadMessage
}

/// Parse/Describe outcome for a new statement.
#[derive(Debug, Clone, Default)]
pub struct PreparedInfo {
    pub param_oids: Vec<Oid>,
    /// Empty if the statement returns no rows
    pub columns: Vec<ColumnInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PrepareState {
    Initial,
    WaitingParse,
    WaitingParams,
    WaitingRowDesc,
    WaitingReady,
}

/// Parse + Describe(statement) + Sync.
pub struct PrepareStateMachine {
    state: PrepareState,
    request: Vec<u8>,
    info: PreparedInfo,
    tail: SyncTail,
}

impl PrepareStateMachine {
    pub fn new(name: &str, query: &str) -> Result<Self> {
        let mut request = Vec::new();
        write_parse(&mut request, name, query, &[])?;
        write_describe_statement(&mut request, name);
        write_sync(&mut request);
        Ok(Self {
            state: PrepareState::Initial,
            request,
            info: PreparedInfo::default(),
            tail: SyncTail::default(),
        })
    }

    /// Statement metadata, once the machine has finished.
    pub fn into_info(self) -> PreparedInfo {
        self.info
    }
}

impl StateMachine for PrepareStateMachine {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if self.state == PrepareState::Initial {
            self.state = PrepareState::WaitingParse;
            return Ok(emit(&mut self.request, buffer_set));
        }

        if let Some(action) = self.tail.handle(buffer_set)? {
            if matches!(action, Action::Finished) && self.state != PrepareState::WaitingReady {
                return Err(unexpected(msg_type::READY_FOR_QUERY, "before Describe finished"));
            }
            return Ok(action);
        }

        let type_byte = buffer_set.type_byte;
        let payload = buffer_set.read_buffer.as_slice();
        match (self.state, type_byte) {
            (PrepareState::WaitingParse, msg_type::PARSE_COMPLETE) => {
                self.state = PrepareState::WaitingParams;
            }
            (PrepareState::WaitingParams, msg_type::PARAMETER_DESCRIPTION) => {
                self.info.param_oids = ParameterDescription::parse(payload)?.into_oids();
                self.state = PrepareState::WaitingRowDesc;
            }
            (PrepareState::WaitingRowDesc, msg_type::ROW_DESCRIPTION) => {
                let desc = RowDescription::parse(payload)?;
                self.info.columns = desc.iter().map(ColumnInfo::from_described).collect();
                self.state = PrepareState::WaitingReady;
            }
            (PrepareState::WaitingRowDesc, msg_type::NO_DATA) => {
                self.state = PrepareState::WaitingReady;
            }
            _ => return Err(unexpected(type_byte, "in prepare response")),
        }
        Ok(Action::ReadMessage)
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.tail.transaction_status()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecuteState {
    Initial,
    WaitingBind,
    ProcessingRows,
    WaitingReady,
}

/// Bind + Execute + Sync on the unnamed portal of a prepared statement.
pub struct ExecuteStateMachine<H> {
    state: ExecuteState,
    request: Vec<u8>,
    columns: Arc<[ColumnInfo]>,
    handler: H,
    tail: SyncTail,
}

impl<H: RowHandler> ExecuteStateMachine<H> {
    /// Encode the request up front, so a parameter that cannot be encoded
    /// fails before anything is sent.
    pub fn new<P: ToParams>(
        statement: &str,
        param_oids: &[Oid],
        columns: Arc<[ColumnInfo]>,
        params: &P,
        handler: H,
    ) -> Result<Self> {
        let result_formats: Vec<FormatCode> = columns.iter().map(|col| col.format).collect();
        let mut request = Vec::new();
        write_bind(&mut request, "", statement, params, param_oids, &result_formats)?;
        write_execute(&mut request, "", 0);
        write_sync(&mut request);
        Ok(Self {
            state: ExecuteState::Initial,
            request,
            columns,
            handler,
            tail: SyncTail::default(),
        })
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }
}

impl<H: RowHandler> StateMachine for ExecuteStateMachine<H> {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if self.state == ExecuteState::Initial {
            self.state = ExecuteState::WaitingBind;
            return Ok(emit(&mut self.request, buffer_set));
        }

        if let Some(action) = self.tail.handle(buffer_set)? {
            if matches!(action, Action::Finished) && self.state != ExecuteState::WaitingReady {
                return Err(unexpected(msg_type::READY_FOR_QUERY, "before the command completed"));
            }
            return Ok(action);
        }

        let type_byte = buffer_set.type_byte;
        let payload = buffer_set.read_buffer.as_slice();
        match (self.state, type_byte) {
            (ExecuteState::WaitingBind, msg_type::BIND_COMPLETE) => {
                if !self.columns.is_empty()
                    && let Err(e) = self.handler.result_start(&self.columns)
                {
                    self.tail.defer(e)?;
                }
                self.state = ExecuteState::ProcessingRows;
            }
            (ExecuteState::ProcessingRows, msg_type::DATA_ROW) => {
                let row = DataRow::parse(payload)?;
                if let Err(e) = self.handler.row(&self.columns, row) {
                    self.tail.defer(e)?;
                }
            }
            (ExecuteState::ProcessingRows, msg_type::COMMAND_COMPLETE) => {
                let complete = CommandComplete::parse(payload)?;
                if let Err(e) = self.handler.result_end(complete) {
                    self.tail.defer(e)?;
                }
                self.state = ExecuteState::WaitingReady;
            }
            (ExecuteState::ProcessingRows, msg_type::EMPTY_QUERY_RESPONSE) => {
                self.state = ExecuteState::WaitingReady;
            }
            _ => return Err(unexpected(type_byte, "in execute response")),
        }
        Ok(Action::ReadMessage)
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.tail.transaction_status()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseState {
    Initial,
    WaitingClose,
    WaitingReady,
}

/// Close(statement) for each name, then Sync.
pub struct CloseStatementsStateMachine {
    state: CloseState,
    request: Vec<u8>,
    remaining: usize,
    tail: SyncTail,
}

impl CloseStatementsStateMachine {
    pub fn new<S: AsRef<str>>(names: &[S]) -> Self {
        let mut request = Vec::new();
        for name in names {
            write_close_statement(&mut request, name.as_ref());
        }
        write_sync(&mut request);
        Self {
            state: CloseState::Initial,
            request,
            remaining: names.len(),
            tail: SyncTail::default(),
        }
    }
}

impl StateMachine for CloseStatementsStateMachine {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if self.state == CloseState::Initial {
            self.state = if self.remaining == 0 {
                CloseState::WaitingReady
            } else {
                CloseState::WaitingClose
            };
            return Ok(emit(&mut self.request, buffer_set));
        }

        if let Some(action) = self.tail.handle(buffer_set)? {
            if matches!(action, Action::Finished) && self.state != CloseState::WaitingReady {
                return Err(unexpected(msg_type::READY_FOR_QUERY, "before every Close completed"));
            }
            return Ok(action);
        }

        match (self.state, buffer_set.type_byte) {
            (CloseState::WaitingClose, msg_type::CLOSE_COMPLETE) => {
                self.remaining -= 1;
                if self.remaining == 0 {
                    self.state = CloseState::WaitingReady;
                }
                Ok(Action::ReadMessage)
            }
            (_, type_byte) => Err(unexpected(type_byte, "in close response")),
        }
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.tail.transaction_status()
    }
}
