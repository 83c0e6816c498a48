//! Asynchronous PostgreSQL client using Tokio.

pub(crate) mod conn;
mod row_stream;
mod stream;

pub use conn::{Conn, ConnState};
pub use row_stream::RowStream;
pub use stream::{AsyncStream, Stream};
