//! Prepared statement handles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::error::{Error, Resource, Result};
use crate::handler::{CollectHandler, DropHandler, FirstRowHandler, QueueHandler};
use crate::protocol::types::Oid;
use crate::row::{ColumnInfo, Row};
use crate::tokio::RowStream;
use crate::tokio::conn::{Conn, Inner};
use crate::types::{FromValue, ToParams, Value};

/// Server-side statement shared by the cache and every handle to it.
#[derive(Debug)]
pub(crate) struct StatementState {
    name: String,
    query: String,
    param_types: Vec<Oid>,
    columns: Arc<[ColumnInfo]>,
    closed: AtomicBool,
    cacheable: bool,
}

impl StatementState {
    pub(crate) fn new(
        name: String,
        query: String,
        param_types: Vec<Oid>,
        columns: Arc<[ColumnInfo]>,
        cacheable: bool,
    ) -> Self {
        Self {
            name,
            query,
            param_types,
            columns,
            closed: AtomicBool::new(false),
            cacheable,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn query(&self) -> &str {
        &self.query
    }

    pub(crate) fn param_types(&self) -> &[Oid] {
        &self.param_types
    }

    pub(crate) fn columns(&self) -> &Arc<[ColumnInfo]> {
        &self.columns
    }

    pub(crate) fn is_cacheable(&self) -> bool {
        self.cacheable
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// A statement parsed and described on the server.
///
/// Handles are cheap to clone. A handle does not keep its connection alive,
/// and while any handle exists the statement is not closed on the server,
/// even after it has been evicted from the connection's cache.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    state: Arc<StatementState>,
    conn: Weak<Inner>,
}

impl PreparedStatement {
    pub(crate) fn new(state: Arc<StatementState>, conn: Weak<Inner>) -> Self {
        Self { state, conn }
    }

    pub(crate) fn state(&self) -> &Arc<StatementState> {
        &self.state
    }

    /// Query text, as used for the cache key.
    pub fn query(&self) -> &str {
        self.state.query()
    }

    /// Server-side statement name.
    pub fn name(&self) -> &str {
        self.state.name()
    }

    /// Parameter type OIDs reported by the server.
    pub fn param_types(&self) -> &[Oid] {
        self.state.param_types()
    }

    /// Result columns; empty for statements that return no rows.
    pub fn columns(&self) -> &[ColumnInfo] {
        self.state.columns()
    }

    /// True once the statement or its connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Resolve the owning connection and check the statement can be used
    /// with `params`. Nothing is sent on failure.
    fn bind_target<P: ToParams>(&self, params: &P) -> Result<Conn> {
        let conn = self
            .conn
            .upgrade()
            .map(Conn::from_inner)
            .ok_or(Error::ClosedResource(Resource::Connection))?;
        if conn.is_closed() {
            return Err(Error::ClosedResource(Resource::Connection));
        }
        if self.state.is_closed() {
            return Err(Error::ClosedResource(Resource::Statement));
        }
        let expected = self.state.param_types().len();
        if params.param_count() != expected {
            return Err(Error::InvalidUsage(format!(
                "statement expects {} parameters, got {}",
                expected,
                params.param_count()
            )));
        }
        Ok(conn)
    }

    /// Execute and return every row, in the order the server sent them.
    pub async fn fetch_all<P: ToParams>(&self, params: P) -> Result<Vec<Row>> {
        let conn = self.bind_target(&params)?;
        let handler = conn
            .run_statement(&self.state, &params, CollectHandler::new())
            .await?;
        Ok(handler.into_rows())
    }

    /// Execute and return the first row; an empty result is `RowNotFound`.
    pub async fn fetch_one<P: ToParams>(&self, params: P) -> Result<Row> {
        self.fetch_optional(params).await?.ok_or(Error::RowNotFound)
    }

    /// Execute and return the first row, if any.
    pub async fn fetch_optional<P: ToParams>(&self, params: P) -> Result<Option<Row>> {
        let conn = self.bind_target(&params)?;
        let handler = conn
            .run_statement(&self.state, &params, FirstRowHandler::new())
            .await?;
        Ok(handler.into_row())
    }

    /// Execute and return the first column of the first row.
    ///
    /// Zero rows decode as NULL, so `Option<T>` yields `None` and a
    /// non-nullable `T` fails with a decode error.
    pub async fn fetch_value<T: FromValue, P: ToParams>(&self, params: P) -> Result<T> {
        let value = self
            .fetch_optional(params)
            .await?
            .map_or(Value::Null, Row::into_first);
        T::from_value(value)
    }

    /// Like [`fetch_value`](Self::fetch_value), returning `default` when there
    /// are no rows.
    pub async fn fetch_value_or<T: FromValue, P: ToParams>(&self, params: P, default: T) -> Result<T> {
        match self.fetch_optional(params).await? {
            Some(row) => T::from_value(row.into_first()),
            None => Ok(default),
        }
    }

    /// Execute, discarding rows, and return the affected row count if the
    /// command reports one.
    pub async fn execute<P: ToParams>(&self, params: P) -> Result<Option<u64>> {
        let conn = self.bind_target(&params)?;
        let handler = conn
            .run_statement(&self.state, &params, DropHandler::new())
            .await?;
        Ok(handler.rows_affected())
    }

    /// Execute and read rows lazily.
    ///
    /// The connection stays busy until the stream has been read to the end
    /// or dropped.
    pub async fn fetch_stream<P: ToParams>(&self, params: P) -> Result<RowStream> {
        let conn = self.bind_target(&params)?;
        conn.start_stream(&self.state, &params, QueueHandler::new())
            .await
    }
}
