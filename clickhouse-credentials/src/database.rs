//! Database boundary.
//!
//! The engine never talks to a wire protocol directly. A [`Driver`] opens
//! [`Connection`]s, which expose the small blocking-style SQL surface the
//! lifecycle operations need: single-row queries, exec, and transactions.
//! Production drivers wrap a real ClickHouse client; tests use an
//! in-memory driver that records every call.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by a database driver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// The server could not be reached or rejected the login
    #[error("connection failed: {0}")]
    Connection(String),

    /// The server rejected a query or statement
    #[error("query failed: {0}")]
    Query(String),

    /// A result row did not have the expected shape
    #[error("unexpected row: {0}")]
    Decode(String),

    /// The connection or transaction was already closed
    #[error("connection is closed")]
    Closed,
}

impl DriverError {
    /// Create a connection error.
    #[must_use]
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a query error.
    #[must_use]
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Create a decode error.
    #[must_use]
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }
}

/// Result type for driver calls.
pub type DriverResult<T> = Result<T, DriverError>;

/// A single column value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    /// SQL NULL
    Null,
    /// Boolean
    Bool(bool),
    /// Any integer type; ClickHouse reports booleans as `UInt8`
    Int(i64),
    /// Any string type
    String(String),
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// One result row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    values: Vec<SqlValue>,
}

impl Row {
    /// Build a row from its column values.
    #[must_use]
    pub const fn new(values: Vec<SqlValue>) -> Self {
        Self { values }
    }

    /// Column values in select order.
    #[must_use]
    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    fn column(&self, idx: usize) -> DriverResult<&SqlValue> {
        self.values
            .get(idx)
            .ok_or_else(|| DriverError::decode(format!("no column at index {idx}")))
    }

    /// Read column `idx` as a boolean. Integers are true when non-zero.
    pub fn get_bool(&self, idx: usize) -> DriverResult<bool> {
        match self.column(idx)? {
            SqlValue::Bool(b) => Ok(*b),
            SqlValue::Int(i) => Ok(*i != 0),
            other => Err(DriverError::decode(format!(
                "column {idx} is not a boolean: {other}"
            ))),
        }
    }

    /// Read column `idx` as a string.
    pub fn get_string(&self, idx: usize) -> DriverResult<String> {
        match self.column(idx)? {
            SqlValue::String(s) => Ok(s.clone()),
            other => Err(DriverError::decode(format!(
                "column {idx} is not a string: {other}"
            ))),
        }
    }
}

/// Settings a driver needs to open a connection.
///
/// The URL has already had its `{{username}}`/`{{password}}` placeholders
/// substituted, so it may contain the password and must never be logged.
#[derive(Clone)]
pub struct ConnectOptions {
    /// Fully rendered connection URL
    pub url: String,
    /// Pool ceiling on open connections
    pub max_open_connections: u32,
    /// Pool ceiling on idle connections
    pub max_idle_connections: u32,
    /// Maximum lifetime of a pooled connection; `None` means unlimited
    pub max_connection_lifetime: Option<std::time::Duration>,
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("url", &"[REDACTED]")
            .field("max_open_connections", &self.max_open_connections)
            .field("max_idle_connections", &self.max_idle_connections)
            .field("max_connection_lifetime", &self.max_connection_lifetime)
            .finish()
    }
}

/// Opens connections to the target database.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Open a new connection (or pool) with the given options.
    async fn open(&self, options: &ConnectOptions) -> DriverResult<Arc<dyn Connection>>;
}

/// A live connection or pool.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Verify the connection is still usable.
    async fn ping(&self) -> DriverResult<()>;

    /// Run a query and return its first row, or `None` if it produced no rows.
    async fn query_row(&self, query: &str, args: &[&str]) -> DriverResult<Option<Row>>;

    /// Execute a statement outside of any transaction, with bound arguments.
    async fn exec(&self, query: &str, args: &[&str]) -> DriverResult<u64>;

    /// Start a transaction.
    async fn begin(&self) -> DriverResult<Box<dyn Transaction>>;

    /// Close the connection; later calls fail with [`DriverError::Closed`].
    async fn close(&self) -> DriverResult<()>;
}

/// A transaction on a [`Connection`].
///
/// Dropping a transaction without calling `commit` or `rollback` leaves
/// its fate to the driver; the engine always finishes explicitly.
#[async_trait]
pub trait Transaction: Send {
    /// Execute one fully rendered statement.
    async fn exec(&mut self, statement: &str) -> DriverResult<()>;

    /// Commit every statement executed so far.
    async fn commit(self: Box<Self>) -> DriverResult<()>;

    /// Discard every statement executed so far.
    async fn rollback(self: Box<Self>) -> DriverResult<()>;
}
