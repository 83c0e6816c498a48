//! Connection options.

use std::time::Duration;

use url::Url;

use crate::error::Error;

/// Per-connection options for statement caching and shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opts {
    /// Maximum number of prepared statements kept in the cache. `0` disables
    /// caching: every prepared statement is closed once no handle remains.
    ///
    /// Default: `100`
    pub statement_cache_size: usize,

    /// Queries longer than this many bytes are prepared without being cached.
    ///
    /// Default: `15 * 1024`
    pub max_cacheable_statement_size: usize,

    /// How long `close()` waits for an in-flight operation to release the
    /// connection before terminating it. `None` waits indefinitely.
    ///
    /// Default: `Some(10s)`
    pub close_timeout: Option<Duration>,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            statement_cache_size: 100,
            max_cacheable_statement_size: 15 * 1024,
            close_timeout: Some(Duration::from_secs(10)),
        }
    }
}

fn parse_usize(key: &str, value: &str) -> Result<usize, Error> {
    value
        .parse()
        .map_err(|e| Error::InvalidUsage(format!("Invalid {}: {} ({})", key, value, e)))
}

impl TryFrom<&Url> for Opts {
    type Error = Error;

    /// Read options from the query parameters of a PostgreSQL connection URL.
    ///
    /// Format: `postgres://[user[:password]@]host[:port][/database][?param1=value1&..]`
    ///
    /// Supported query parameters:
    /// - `statement_cache_size`: non-negative integer, `0` disables caching
    /// - `max_cacheable_statement_size`: bytes
    /// - `close_timeout_ms`: milliseconds, `0` waits indefinitely
    ///
    /// Other parameters belong to connection setup and are ignored here.
    fn try_from(url: &Url) -> Result<Self, Self::Error> {
        if !["postgres", "postgresql", "pg"].contains(&url.scheme()) {
            return Err(Error::InvalidUsage(format!(
                "Invalid scheme: expected 'postgres://' or 'pg://', got '{}://'",
                url.scheme()
            )));
        }

        let mut opts = Opts::default();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "statement_cache_size" => {
                    opts.statement_cache_size = parse_usize(&key, &value)?;
                }
                "max_cacheable_statement_size" => {
                    opts.max_cacheable_statement_size = parse_usize(&key, &value)?;
                }
                "close_timeout_ms" => {
                    let ms = parse_usize(&key, &value)?;
                    opts.close_timeout = (ms > 0).then(|| Duration::from_millis(ms as u64));
                }
                _ => {
                    tracing::debug!(key = %key, "ignoring connection parameter");
                }
            }
        }

        Ok(opts)
    }
}

impl TryFrom<&str> for Opts {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let url = Url::parse(s).map_err(|e| Error::InvalidUsage(format!("Invalid URL: {}", e)))?;
        Self::try_from(&url)
    }
}
