//! Error types for pgprep.

use thiserror::Error;

use crate::protocol::types::Oid;

/// Result type for pgprep operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Fields of an ErrorResponse or NoticeResponse.
///
/// Only the fields the server chose to send are set. Field meanings follow
/// the "Error and Notice Message Fields" section of the protocol docs.
#[derive(Debug, Clone, Default)]
pub struct ServerError {
    pub severity: Option<String>,
    /// `V` field; never translated
    pub severity_non_localized: Option<String>,
    /// Five-character SQLSTATE
    pub code: Option<String>,
    pub message: Option<String>,
    pub detail: Option<String>,
    pub hint: Option<String>,
    /// 1-based character offset into the query text
    pub position: Option<u32>,
    pub where_: Option<String>,
    pub schema: Option<String>,
    pub table: Option<String>,
    pub column: Option<String>,
    pub data_type: Option<String>,
    pub constraint: Option<String>,
    pub routine: Option<String>,
}

impl ServerError {
    /// `V` if present, otherwise `S`.
    pub fn severity(&self) -> Option<&str> {
        match &self.severity_non_localized {
            Some(severity) => Some(severity),
            None => self.severity.as_deref(),
        }
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// Primary message; empty if the server omitted it.
    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or_default()
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.severity, &self.code) {
            (Some(severity), Some(code)) => write!(f, "{severity} {code}: ")?,
            (Some(severity), None) => write!(f, "{severity}: ")?,
            (None, Some(code)) => write!(f, "{code}: ")?,
            (None, None) => {}
        }
        f.write_str(self.message())?;
        for (label, text) in [("DETAIL", &self.detail), ("HINT", &self.hint)] {
            if let Some(text) = text {
                write!(f, "\n{label}: {text}")?;
            }
        }
        Ok(())
    }
}

/// Object an operation was attempted on after it had been closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Connection,
    Statement,
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resource::Connection => f.write_str("connection"),
            Resource::Statement => f.write_str("prepared statement"),
        }
    }
}

/// Error type for pgprep.
#[derive(Debug, Error)]
pub enum Error {
    /// The server rejected a specific operation. The connection stays usable.
    #[error("PostgreSQL error: {0}")]
    Server(ServerError),

    /// Malformed or out-of-sequence wire message. Fatal to the connection.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error. Fatal to the connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed or terminated while the operation was waiting.
    #[error("connection was closed in the middle of an operation")]
    ConnectionClosed,

    /// The statement or connection had already been closed before the call.
    #[error("{0} is closed")]
    ClosedResource(Resource),

    /// A received value could not be interpreted under its declared type.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Caller error detected before anything was sent (e.g. parameter count).
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    /// `fetch_one` got an empty result.
    #[error("query returned no rows")]
    RowNotFound,
}

impl Error {
    /// True if the connection can no longer carry requests after this error.
    pub fn is_connection_broken(&self) -> bool {
        match self {
            Error::Io(_) | Error::Protocol(_) | Error::ConnectionClosed => true,
            // the server ends the session after FATAL and PANIC
            Error::Server(fields) => matches!(fields.severity(), Some("FATAL" | "PANIC")),
            _ => false,
        }
    }

    pub fn sqlstate(&self) -> Option<&str> {
        if let Error::Server(fields) = self {
            fields.code()
        } else {
            None
        }
    }

    /// Server reports that a cached plan no longer matches its result type.
    pub(crate) fn is_stale_plan(&self) -> bool {
        match self {
            Error::Server(fields) => {
                fields.code() == Some("0A000")
                    && fields.message().contains("cached plan must not change result type")
            }
            _ => false,
        }
    }

    pub(crate) fn type_mismatch(value_oid: Oid, target_oid: Oid) -> Self {
        Error::InvalidUsage(format!(
            "cannot encode a value of oid {} as parameter of oid {}",
            value_oid, target_oid
        ))
    }

    pub(crate) fn overflow(from: &str, to: &str) -> Self {
        Error::InvalidUsage(format!("value of type {} overflows {}", from, to))
    }
}

impl<Src: std::fmt::Debug, Dst: std::fmt::Debug + ?Sized>
    From<zerocopy::error::CastError<Src, Dst>> for Error
{
    fn from(err: zerocopy::error::CastError<Src, Dst>) -> Self {
        Error::Protocol(format!("malformed message: {err:?}"))
    }
}
