//! PostgreSQL client centered on server-side prepared statements.
//!
//! # Features
//!
//! - **Statement cache**: prepared statements are reused per query text and
//!   evicted in LRU order. An evicted statement is closed on the server only
//!   once no handle to it remains.
//! - **Cancellable connection**: `close()` and `terminate()` interrupt any
//!   in-flight or queued operation with `ConnectionClosed`.
//! - **Sans-I/O state machines**: protocol logic is separated from I/O.
//! - **Typed decoding**: binary format for built-in scalars, text for the rest.
//!
//! # Example
//!
//! ```no_run
//! use pgprep::tokio::{Conn, Stream};
//! use pgprep::Opts;
//!
//! async fn run(stream: Stream) -> pgprep::Result<()> {
//!     let conn = Conn::from_stream(stream, Opts::default());
//!
//!     let stmt = conn.prepare("SELECT $1::int4 * 2").await?;
//!     let doubled: i32 = stmt.fetch_value((21_i32,)).await?;
//!     assert_eq!(doubled, 42);
//!
//!     conn.close().await
//! }
//! ```

pub mod buffer_set;
mod cache;
pub mod error;
pub mod handler;
pub mod opts;
pub mod protocol;
pub mod row;
pub mod state;
pub mod statement;
pub mod tokio;
pub mod types;

pub use error::{Error, Resource, Result, ServerError};
pub use handler::{AsyncMessageHandler, CollectHandler, DropHandler, FirstRowHandler, RowHandler};
pub use opts::Opts;
pub use protocol::types::{FormatCode, Oid, TransactionStatus};
pub use row::{ColumnInfo, Row};
pub use state::AsyncMessage;
pub use statement::PreparedStatement;
pub use types::{FromValue, ToParams, ToWireValue, Value};
