//! Asynchronous PostgreSQL connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, watch};

use crate::buffer_set::BufferSet;
use crate::cache::StatementCache;
use crate::error::{Error, Resource, Result};
use crate::handler::{AsyncMessageHandler, CollectHandler, DropHandler, QueueHandler, RowHandler};
use crate::opts::Opts;
use crate::protocol::backend::{ReadyForQuery, msg_type};
use crate::protocol::frontend::{write_close_statement, write_sync, write_terminate};
use crate::protocol::types::TransactionStatus;
use crate::row::Row;
use crate::state::{
    Action, AsyncMessage, CloseStatementsStateMachine, ExecuteStateMachine, PrepareStateMachine,
    SimpleQueryStateMachine, StateMachine,
};
use crate::statement::{PreparedStatement, StatementState};
use crate::types::{FromValue, ToParams};

use super::row_stream::RowStream;
use super::stream::{Disconnector, Stream};

/// Lifecycle of a connection.
///
/// `Idle ⇄ Busy` while in use; `Closing` once `close()` has started;
/// `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Idle,
    Busy,
    Closing,
    Closed,
}

/// Bookkeeping that is only touched synchronously.
struct Shared {
    state: ConnState,
    cache: StatementCache,
    transaction_status: TransactionStatus,
}

impl Shared {
    fn ensure_open(&self) -> Result<()> {
        match self.state {
            ConnState::Idle | ConnState::Busy => Ok(()),
            ConnState::Closing | ConnState::Closed => Err(Error::ClosedResource(Resource::Connection)),
        }
    }

    /// Close takes precedence over any eviction bookkeeping: every statement
    /// is invalidated whatever list it is on.
    fn invalidate_statements(&mut self) {
        self.cache.collect_released();
        let count = self.cache.drain_all();
        if count > 0 {
            tracing::debug!(count, "invalidated prepared statements");
        }
    }
}

/// Transport plus the flags that tell whether the last exchange completed.
struct Session {
    stream: Stream,
    buffer_set: BufferSet,
    /// A request was sent and its ReadyForQuery has not been read yet.
    pending_ready: bool,
    /// A write was interrupted; the byte stream cannot be trusted.
    write_in_progress: bool,
    /// The state machine is waiting for a message that has not been fully
    /// read yet.
    read_pending: bool,
}

pub(crate) struct Inner {
    opts: Opts,
    shared: parking_lot::Mutex<Shared>,
    session: Arc<AsyncMutex<Option<Session>>>,
    disconnector: Disconnector,
    closed_tx: watch::Sender<bool>,
    stmt_counter: AtomicU64,
    async_message_handler: parking_lot::Mutex<Option<Box<dyn AsyncMessageHandler>>>,
}

impl Inner {
    fn handle_async_message(&self, msg: &AsyncMessage) {
        let mut handler = self.async_message_handler.lock();
        match (handler.as_mut(), msg) {
            (Some(h), _) => h.handle(msg),
            (None, AsyncMessage::Notice(notice)) => {
                tracing::debug!(%notice, "server notice");
            }
            (None, _) => {}
        }
    }

    /// Tear the connection down without talking to the server.
    fn shut_down(&self) -> bool {
        {
            let mut shared = self.shared.lock();
            if shared.state == ConnState::Closed {
                return false;
            }
            shared.state = ConnState::Closed;
            shared.invalidate_statements();
        }
        self.closed_tx.send_replace(true);
        if self.disconnector.disconnect() {
            tracing::debug!("transport closed");
        }
        true
    }
}

fn interrupted_write() -> Error {
    Error::Protocol("a previous request was interrupted while being written".into())
}

/// Resolves once the connection has been closed or terminated.
async fn wait_closed(closed_rx: &mut watch::Receiver<bool>) {
    let _ = closed_rx.wait_for(|closed| *closed).await;
}

/// Exclusive use of the transport for one exchange.
///
/// Every wait races the closure signal, so `close()` and `terminate()` always
/// resolve an in-flight operation with `ConnectionClosed`.
pub(crate) struct Operation {
    inner: Arc<Inner>,
    guard: OwnedMutexGuard<Option<Session>>,
    closed_rx: watch::Receiver<bool>,
}

impl Operation {
    /// Wait for the transport. Concurrent callers are served one at a time.
    pub(crate) async fn begin(inner: &Arc<Inner>) -> Result<Self> {
        let mut closed_rx = inner.closed_tx.subscribe();
        inner.shared.lock().ensure_open()?;

        let guard = tokio::select! {
            biased;
            () = wait_closed(&mut closed_rx) => return Err(Error::ConnectionClosed),
            guard = Arc::clone(&inner.session).lock_owned() => guard,
        };

        {
            let mut shared = inner.shared.lock();
            match shared.state {
                ConnState::Closing | ConnState::Closed => return Err(Error::ConnectionClosed),
                ConnState::Idle | ConnState::Busy => shared.state = ConnState::Busy,
            }
        }

        let mut op = Self {
            inner: Arc::clone(inner),
            guard,
            closed_rx,
        };
        op.recover().await?;
        Ok(op)
    }

    fn session(&mut self) -> Result<&mut Session> {
        self.guard.as_mut().ok_or(Error::ConnectionClosed)
    }

    /// Finish an exchange a previous caller abandoned.
    async fn recover(&mut self) -> Result<()> {
        let session = self.session()?;
        if session.write_in_progress {
            let err = interrupted_write();
            self.abort(&err);
            return Err(err);
        }
        if !session.pending_ready {
            return Ok(());
        }

        tracing::debug!("draining abandoned exchange");
        let result = async {
            loop {
                self.read_message().await?;
                let session = self.session()?;
                if session.buffer_set.type_byte == msg_type::READY_FOR_QUERY {
                    let ready = ReadyForQuery::parse(&session.buffer_set.read_buffer)?;
                    return Ok(ready.transaction_status().unwrap_or_default());
                }
            }
        }
        .await;

        match result {
            Ok(status) => {
                self.session()?.pending_ready = false;
                self.inner.shared.lock().transaction_status = status;
                Ok(())
            }
            Err(e) => {
                self.abort(&e);
                Err(e)
            }
        }
    }

    async fn read_message(&mut self) -> Result<()> {
        let Self {
            guard, closed_rx, ..
        } = self;
        let session = guard.as_mut().ok_or(Error::ConnectionClosed)?;
        session.read_pending = true;
        let result = tokio::select! {
            biased;
            () = wait_closed(closed_rx) => Err(Error::ConnectionClosed),
            result = session.stream.read_message(&mut session.buffer_set) => result,
        };
        if result.is_ok() {
            session.read_pending = false;
        }
        result
    }

    async fn write_request(&mut self) -> Result<()> {
        let Self {
            guard, closed_rx, ..
        } = self;
        let session = guard.as_mut().ok_or(Error::ConnectionClosed)?;
        session.write_in_progress = true;
        session.pending_ready = true;
        let write = async {
            session.stream.write_all(&session.buffer_set.write_buffer).await?;
            session.stream.flush().await
        };
        let result = tokio::select! {
            biased;
            () = wait_closed(closed_rx) => Err(Error::ConnectionClosed),
            result = write => result.map_err(Error::from),
        };
        if result.is_ok() {
            session.write_in_progress = false;
        }
        result
    }

    /// Run one step of `machine` and the I/O it requests. Returns true once
    /// the exchange has finished.
    pub(crate) async fn advance<S: StateMachine>(&mut self, machine: &mut S) -> Result<bool> {
        match self.advance_inner(machine).await {
            Ok(false) => Ok(false),
            Ok(true) => {
                self.complete(machine.transaction_status())?;
                Ok(true)
            }
            Err(e) if e.is_connection_broken() => {
                self.abort(&e);
                Err(e)
            }
            // The machine reports operation errors only after ReadyForQuery.
            Err(e) => {
                self.complete(machine.transaction_status())?;
                Err(e)
            }
        }
    }

    async fn advance_inner<S: StateMachine>(&mut self, machine: &mut S) -> Result<bool> {
        // a previous call on this operation was cancelled mid-I/O
        let session = self.session()?;
        if session.write_in_progress {
            return Err(interrupted_write());
        }
        if session.read_pending {
            self.read_message().await?;
        }

        let session = self.session()?;
        match machine.step(&mut session.buffer_set)? {
            Action::WriteAndReadMessage => {
                self.write_request().await?;
                self.read_message().await?;
            }
            Action::ReadMessage => self.read_message().await?,
            Action::HandleAsyncMessageAndReadMessage(msg) => {
                self.inner.handle_async_message(&msg);
                self.read_message().await?;
            }
            Action::Finished => return Ok(true),
        }
        Ok(false)
    }

    /// Drive a state machine to completion.
    pub(crate) async fn drive<S: StateMachine>(&mut self, machine: &mut S) -> Result<()> {
        while !self.advance(machine).await? {}
        Ok(())
    }

    fn complete(&mut self, status: TransactionStatus) -> Result<()> {
        self.session()?.pending_ready = false;
        self.inner.shared.lock().transaction_status = status;
        Ok(())
    }

    /// Release statements on the server. A server-side failure is logged and
    /// otherwise ignored; the statements are gone from the client either way.
    pub(crate) async fn close_statements(&mut self, statements: Vec<Arc<StatementState>>) -> Result<()> {
        if statements.is_empty() {
            return Ok(());
        }
        let names: Vec<&str> = statements.iter().map(|s| s.name()).collect();
        tracing::debug!(count = names.len(), "closing released statements");
        let mut machine = CloseStatementsStateMachine::new(&names);
        match self.drive(&mut machine).await {
            Err(e) if !e.is_connection_broken() => {
                tracing::warn!(error = %e, "failed to close prepared statements");
                Ok(())
            }
            result => result,
        }
    }

    /// Give up on the connection after an error that broke the byte stream.
    fn abort(&mut self, err: &Error) {
        let state = self.inner.shared.lock().state;
        if matches!(state, ConnState::Closing | ConnState::Closed) {
            // close()/terminate() already owns the teardown
            return;
        }
        tracing::warn!(error = %err, "connection broken, closing");
        self.inner.shut_down();
        self.guard.take();
    }
}

impl Drop for Operation {
    fn drop(&mut self) {
        let mut shared = self.inner.shared.lock();
        match shared.state {
            ConnState::Busy => shared.state = ConnState::Idle,
            // terminate() could not reach the transport while we held it
            ConnState::Closed => {
                self.guard.take();
            }
            ConnState::Idle | ConnState::Closing => {}
        }
    }
}

/// Asynchronous PostgreSQL connection.
///
/// Cloning gives another handle to the same connection. Operations from all
/// handles are serialized; `close()` and `terminate()` are not queued and cut
/// short whatever is in flight.
#[derive(Clone)]
pub struct Conn {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("state", &self.state())
            .field("opts", &self.inner.opts)
            .finish_non_exhaustive()
    }
}

impl Conn {
    /// Wrap a stream that has completed startup and authentication and sits
    /// at its first ReadyForQuery.
    pub fn from_stream(stream: Stream, opts: Opts) -> Self {
        let (closed_tx, _) = watch::channel(false);
        let disconnector = stream.disconnector();
        let session = Session {
            stream,
            buffer_set: BufferSet::new(),
            pending_ready: false,
            write_in_progress: false,
            read_pending: false,
        };
        Self {
            inner: Arc::new(Inner {
                shared: parking_lot::Mutex::new(Shared {
                    state: ConnState::Idle,
                    cache: StatementCache::new(opts.statement_cache_size),
                    transaction_status: TransactionStatus::Idle,
                }),
                session: Arc::new(AsyncMutex::new(Some(session))),
                disconnector,
                closed_tx,
                stmt_counter: AtomicU64::new(0),
                async_message_handler: parking_lot::Mutex::new(None),
                opts,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    pub fn opts(&self) -> &Opts {
        &self.inner.opts
    }

    pub fn state(&self) -> ConnState {
        self.inner.shared.lock().state
    }

    /// True once `close()` or `terminate()` has been called, or the
    /// connection broke.
    pub fn is_closed(&self) -> bool {
        matches!(self.state(), ConnState::Closing | ConnState::Closed)
    }

    /// Transaction status reported by the last ReadyForQuery.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.inner.shared.lock().transaction_status
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction_status().in_transaction()
    }

    /// Set the async message handler.
    ///
    /// The handler is called when the server sends asynchronous messages:
    /// - `Notification` - from LISTEN/NOTIFY
    /// - `Notice` - warnings and informational messages
    /// - `ParameterChanged` - server parameter updates
    pub fn set_async_message_handler<H: AsyncMessageHandler + 'static>(&self, handler: H) {
        *self.inner.async_message_handler.lock() = Some(Box::new(handler));
    }

    pub fn clear_async_message_handler(&self) {
        *self.inner.async_message_handler.lock() = None;
    }

    // === Prepared statements ===

    /// Prepare `query`, reusing a cached statement for the same text.
    pub async fn prepare(&self, query: &str) -> Result<PreparedStatement> {
        let state = self.prepare_state(query.trim()).await?;
        Ok(PreparedStatement::new(state, Arc::downgrade(&self.inner)))
    }

    async fn prepare_state(&self, query: &str) -> Result<Arc<StatementState>> {
        let cacheable = {
            let mut shared = self.inner.shared.lock();
            shared.ensure_open()?;
            shared.cache.collect_released();
            let cacheable = shared.cache.is_enabled()
                && query.len() <= self.inner.opts.max_cacheable_statement_size;
            if cacheable && let Some(hit) = shared.cache.get(query) {
                tracing::trace!(statement = hit.name(), "statement cache hit");
                return Ok(hit);
            }
            cacheable
        };

        let mut op = Operation::begin(&self.inner).await?;

        // Another handle may have prepared the same query while we waited.
        if cacheable && let Some(hit) = self.inner.shared.lock().cache.get(query) {
            return Ok(hit);
        }

        let n = self.inner.stmt_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let name = format!("__pgprep_stmt_{n}");
        tracing::debug!(statement = %name, cacheable, "preparing statement");

        let mut machine = PrepareStateMachine::new(&name, query)?;
        op.drive(&mut machine).await?;
        let info = machine.into_info();

        let state = Arc::new(StatementState::new(
            name,
            query.to_owned(),
            info.param_oids,
            info.columns.into(),
            cacheable,
        ));

        let to_close = {
            let mut shared = self.inner.shared.lock();
            if shared.ensure_open().is_err() {
                // close() began after the exchange and has already drained the cache
                state.mark_closed();
                return Err(Error::ConnectionClosed);
            }
            if cacheable {
                shared.cache.insert(Arc::clone(&state));
            } else {
                // tracked so it is closed once the caller lets go of it
                shared.cache.retire(Arc::clone(&state));
            }
            shared.cache.take_to_close()
        };
        op.close_statements(to_close).await?;

        Ok(state)
    }

    pub(crate) async fn run_statement<P: ToParams, H: RowHandler>(
        &self,
        state: &Arc<StatementState>,
        params: &P,
        handler: H,
    ) -> Result<H> {
        let mut machine = ExecuteStateMachine::new(
            state.name(),
            state.param_types(),
            Arc::clone(state.columns()),
            params,
            handler,
        )?;
        let mut op = Operation::begin(&self.inner).await?;
        if state.is_closed() {
            return Err(Error::ClosedResource(Resource::Statement));
        }
        match op.drive(&mut machine).await {
            Ok(()) => Ok(machine.into_handler()),
            Err(e) => {
                self.invalidate_if_stale(state, &e);
                Err(e)
            }
        }
    }

    pub(crate) async fn start_stream<P: ToParams>(
        &self,
        state: &Arc<StatementState>,
        params: &P,
        handler: QueueHandler,
    ) -> Result<RowStream> {
        let machine = ExecuteStateMachine::new(
            state.name(),
            state.param_types(),
            Arc::clone(state.columns()),
            params,
            handler,
        )?;
        let op = Operation::begin(&self.inner).await?;
        if state.is_closed() {
            return Err(Error::ClosedResource(Resource::Statement));
        }
        Ok(RowStream::new(self.clone(), Arc::clone(state), op, machine))
    }

    /// Drop a statement from the cache when the server says its plan went stale.
    pub(crate) fn invalidate_if_stale(&self, state: &Arc<StatementState>, err: &Error) {
        if err.is_stale_plan() {
            tracing::debug!(statement = state.name(), "dropping statement with stale plan");
            self.inner.shared.lock().cache.remove(state);
        }
    }

    /// Close a one-shot statement right away if the cache does not keep it.
    async fn release_one_shot(&self, stmt: PreparedStatement) -> Result<()> {
        let cacheable = stmt.state().is_cacheable();
        drop(stmt);
        if cacheable || self.is_closed() {
            return Ok(());
        }
        let mut op = Operation::begin(&self.inner).await?;
        let to_close = {
            let mut shared = self.inner.shared.lock();
            shared.cache.collect_released();
            shared.cache.take_to_close()
        };
        op.close_statements(to_close).await
    }

    /// Prepare (or reuse) `sql` and return every row.
    pub async fn fetch_all<P: ToParams>(&self, sql: &str, params: P) -> Result<Vec<Row>> {
        let stmt = self.prepare(sql).await?;
        let result = stmt.fetch_all(params).await;
        let released = self.release_one_shot(stmt).await;
        let rows = result?;
        released?;
        Ok(rows)
    }

    /// Prepare (or reuse) `sql` and return its first row; `RowNotFound` if empty.
    pub async fn fetch_one<P: ToParams>(&self, sql: &str, params: P) -> Result<Row> {
        let stmt = self.prepare(sql).await?;
        let result = stmt.fetch_one(params).await;
        let released = self.release_one_shot(stmt).await;
        let row = result?;
        released?;
        Ok(row)
    }

    /// Prepare (or reuse) `sql` and return the first column of its first row.
    pub async fn fetch_value<T: FromValue, P: ToParams>(&self, sql: &str, params: P) -> Result<T> {
        let stmt = self.prepare(sql).await?;
        let result = stmt.fetch_value(params).await;
        let released = self.release_one_shot(stmt).await;
        let value = result?;
        released?;
        Ok(value)
    }

    /// Prepare (or reuse) `sql`, run it and return the affected row count.
    pub async fn execute_prepared<P: ToParams>(&self, sql: &str, params: P) -> Result<Option<u64>> {
        let stmt = self.prepare(sql).await?;
        let result = stmt.execute(params).await;
        let released = self.release_one_shot(stmt).await;
        let affected = result?;
        released?;
        Ok(affected)
    }

    // === Simple query protocol ===

    async fn simple<H: RowHandler>(&self, sql: &str, handler: H) -> Result<H> {
        let mut op = Operation::begin(&self.inner).await?;
        let mut machine = SimpleQueryStateMachine::new(sql, handler);
        op.drive(&mut machine).await?;
        Ok(machine.into_handler())
    }

    /// Run `sql` (which may hold several statements) and return the row
    /// count of the last command that reports one.
    pub async fn execute(&self, sql: &str) -> Result<Option<u64>> {
        Ok(self.simple(sql, DropHandler::new()).await?.rows_affected())
    }

    /// Run `sql` and collect the rows of every result set, in text format.
    pub async fn simple_query(&self, sql: &str) -> Result<Vec<Row>> {
        Ok(self.simple(sql, CollectHandler::new()).await?.into_rows())
    }

    // === Statement cache maintenance ===

    /// Retire every cached statement. Statements nobody holds are closed on
    /// the server at the next `prepare`.
    pub fn clear_statement_cache(&self) {
        self.inner.shared.lock().cache.clear();
    }

    /// Run a liveness pass now: evicted statements without handles move to
    /// the close queue. Returns how many moved.
    pub fn collect_released_statements(&self) -> usize {
        self.inner.shared.lock().cache.collect_released()
    }

    pub fn statement_cache_len(&self) -> usize {
        self.inner.shared.lock().cache.len()
    }

    /// Statements waiting for Close on the server.
    pub fn pending_close_len(&self) -> usize {
        self.inner.shared.lock().cache.pending_close_len()
    }

    /// Statements evicted from the cache that still have handles.
    pub fn evicted_in_use_len(&self) -> usize {
        self.inner.shared.lock().cache.evicted_in_use_len()
    }

    // === Shutdown ===

    /// Close the connection gracefully.
    ///
    /// An in-flight operation is interrupted with `ConnectionClosed`. Once the
    /// transport is free, released statements are closed and Terminate is
    /// sent. If the transport is not released
    /// within `close_timeout`, the connection is terminated instead. Calling
    /// it again is a no-op.
    pub async fn close(&self) -> Result<()> {
        {
            let mut shared = self.inner.shared.lock();
            match shared.state {
                ConnState::Closing | ConnState::Closed => return Ok(()),
                ConnState::Idle | ConnState::Busy => shared.state = ConnState::Closing,
            }
        }
        tracing::debug!("closing connection");
        self.inner.closed_tx.send_replace(true);

        let lock = Arc::clone(&self.inner.session).lock_owned();
        let guard = match self.inner.opts.close_timeout {
            Some(timeout) => tokio::time::timeout(timeout, lock).await.ok(),
            None => Some(lock.await),
        };

        let result = match guard {
            Some(mut guard) => match guard.take() {
                Some(mut session) => {
                    let to_close = {
                        let mut shared = self.inner.shared.lock();
                        shared.cache.collect_released();
                        shared.cache.take_to_close()
                    };
                    say_goodbye(&mut session, &to_close).await
                }
                None => Ok(()),
            },
            None => {
                tracing::warn!("timed out waiting for the in-flight operation, terminating");
                Ok(())
            }
        };

        if !self.inner.shut_down() {
            // terminate() ran meanwhile
            return result;
        }
        if let Ok(mut guard) = self.inner.session.try_lock() {
            guard.take();
        }
        result
    }

    /// Close the connection immediately without notifying the server.
    ///
    /// The transport is closed right away, even while a `RowStream` holds
    /// the connection. Every pending operation resolves with
    /// `ConnectionClosed`. Calling it again is a no-op.
    pub fn terminate(&self) {
        if !self.inner.shut_down() {
            return;
        }
        tracing::debug!("terminating connection");
        // If an operation holds the session it drops it on its way out.
        if let Ok(mut guard) = self.inner.session.try_lock() {
            guard.take();
        }
    }
}

/// Send Close for released statements, then Terminate, and shut the write
/// side down. Replies are not awaited.
async fn say_goodbye(session: &mut Session, to_close: &[Arc<StatementState>]) -> Result<()> {
    if session.write_in_progress {
        return Ok(());
    }
    let buf = &mut session.buffer_set.write_buffer;
    buf.clear();
    if !to_close.is_empty() {
        tracing::debug!(count = to_close.len(), "closing released statements before terminate");
        for stmt in to_close {
            write_close_statement(buf, stmt.name());
        }
        write_sync(buf);
    }
    write_terminate(buf);
    session.stream.write_all(&session.buffer_set.write_buffer).await?;
    session.stream.flush().await?;
    session.stream.shutdown().await?;
    Ok(())
}
