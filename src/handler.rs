//! Result handlers driven by the state machines.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::Result;
use crate::protocol::backend::query::{CommandComplete, DataRow};
use crate::row::{ColumnInfo, Row};
use crate::state::AsyncMessage;

/// Sink for the result sets of one exchange.
///
/// A statement that returns rows produces `result_start`, one `row` per
/// DataRow and a closing `result_end`, even when no rows match. A statement
/// without a result set produces only `result_end`, whose tag carries the
/// affected row count. A multi-statement simple query repeats the pattern
/// once per statement.
///
/// An error returned from a callback is held until ReadyForQuery, so the
/// connection stays in sync.
pub trait RowHandler {
    fn result_start(&mut self, columns: &Arc<[ColumnInfo]>) -> Result<()> {
        let _ = columns;
        Ok(())
    }

    fn row(&mut self, columns: &Arc<[ColumnInfo]>, row: DataRow<'_>) -> Result<()>;

    fn result_end(&mut self, complete: CommandComplete<'_>) -> Result<()> {
        let _ = complete;
        Ok(())
    }
}

/// Ignores rows; remembers the last row count.
#[derive(Debug, Default)]
pub struct DropHandler {
    rows_affected: Option<u64>,
}

impl DropHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Row count of the last completed command, if its tag carries one.
    pub fn rows_affected(&self) -> Option<u64> {
        self.rows_affected
    }
}

impl RowHandler for DropHandler {
    fn row(&mut self, _columns: &Arc<[ColumnInfo]>, _row: DataRow<'_>) -> Result<()> {
        Ok(())
    }

    fn result_end(&mut self, complete: CommandComplete<'_>) -> Result<()> {
        self.rows_affected = complete.rows_affected();
        Ok(())
    }
}

/// Handler that decodes and keeps every row, in arrival order.
#[derive(Debug, Default)]
pub struct CollectHandler {
    rows: Vec<Row>,
}

impl CollectHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl RowHandler for CollectHandler {
    fn row(&mut self, columns: &Arc<[ColumnInfo]>, row: DataRow<'_>) -> Result<()> {
        self.rows.push(Row::decode(columns, row)?);
        Ok(())
    }
}

/// Handler that decodes only the first row and skips the rest.
#[derive(Debug, Default)]
pub struct FirstRowHandler {
    row: Option<Row>,
}

impl FirstRowHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<&Row> {
        self.row.as_ref()
    }

    pub fn into_row(self) -> Option<Row> {
        self.row
    }
}

impl RowHandler for FirstRowHandler {
    fn row(&mut self, columns: &Arc<[ColumnInfo]>, row: DataRow<'_>) -> Result<()> {
        if self.row.is_none() {
            self.row = Some(Row::decode(columns, row)?);
        }
        Ok(())
    }
}

/// Handler that buffers decoded rows until a consumer pops them.
#[derive(Debug, Default)]
pub struct QueueHandler {
    rows: VecDeque<Row>,
    rows_affected: Option<u64>,
}

impl QueueHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pop(&mut self) -> Option<Row> {
        self.rows.pop_front()
    }

    pub fn rows_affected(&self) -> Option<u64> {
        self.rows_affected
    }
}

impl RowHandler for QueueHandler {
    fn row(&mut self, columns: &Arc<[ColumnInfo]>, row: DataRow<'_>) -> Result<()> {
        self.rows.push_back(Row::decode(columns, row)?);
        Ok(())
    }

    fn result_end(&mut self, complete: CommandComplete<'_>) -> Result<()> {
        self.rows_affected = complete.rows_affected();
        Ok(())
    }
}

/// Receiver of messages the server may send at any time (notices,
/// LISTEN/NOTIFY notifications, parameter changes).
pub trait AsyncMessageHandler: Send {
    fn handle(&mut self, message: &AsyncMessage);
}

impl<F: FnMut(&AsyncMessage) + Send> AsyncMessageHandler for F {
    fn handle(&mut self, message: &AsyncMessage) {
        self(message)
    }
}
