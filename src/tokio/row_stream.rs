//! Lazily read result of a prepared statement.

use std::sync::Arc;

use crate::error::Result;
use crate::handler::QueueHandler;
use crate::row::Row;
use crate::state::ExecuteStateMachine;
use crate::statement::StatementState;

use super::conn::{Conn, Operation};

/// Rows of one execution, read from the server as they are requested.
///
/// The stream holds the connection for its whole life. Dropping it early
/// leaves the rest of the response on the wire; the next operation on the
/// connection reads it away before sending anything.
pub struct RowStream {
    conn: Conn,
    statement: Arc<StatementState>,
    op: Operation,
    machine: ExecuteStateMachine<QueueHandler>,
    done: bool,
}

impl RowStream {
    pub(crate) fn new(
        conn: Conn,
        statement: Arc<StatementState>,
        op: Operation,
        machine: ExecuteStateMachine<QueueHandler>,
    ) -> Self {
        Self {
            conn,
            statement,
            op,
            machine,
            done: false,
        }
    }

    /// Next row, or `None` once the result is exhausted.
    ///
    /// If the connection is closed while rows are still expected this returns
    /// `ConnectionClosed` rather than ending the stream.
    pub async fn next(&mut self) -> Result<Option<Row>> {
        loop {
            if let Some(row) = self.machine.handler_mut().pop() {
                return Ok(Some(row));
            }
            if self.done {
                return Ok(None);
            }
            match self.op.advance(&mut self.machine).await {
                Ok(finished) => self.done = finished,
                Err(e) => {
                    self.done = true;
                    self.conn.invalidate_if_stale(&self.statement, &e);
                    return Err(e);
                }
            }
        }
    }

    /// Read the remaining rows.
    pub async fn collect(mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Row count from the command tag; available once the stream is exhausted.
    pub fn rows_affected(&self) -> Option<u64> {
        self.machine.handler().rows_affected()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }
}

impl std::fmt::Debug for RowStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowStream")
            .field("statement", &self.statement.name())
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}
