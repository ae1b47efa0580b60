//! Connection provider abstraction for the SQL Server diagnostic views.
//!
//! Probes never talk to the driver directly. They go through the
//! [`Connector`] / [`Session`] pair so the same probe code runs against a live
//! instance ([`MssqlConnector`]) and against scripted fixtures in tests
//! ([`mock::MockConnector`]).
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                  Monitor<C>                  │
//! │   resource_usage / storage / top_queries ... │
//! └──────────────────────┬───────────────────────┘
//!                        │ connect() per call
//!                 ┌──────▼──────┐
//!                 │  Connector  │ (trait)
//!                 └──────┬──────┘
//!              ┌─────────┴─────────┐
//!       ┌──────▼───────┐    ┌──────▼───────┐
//!       │MssqlConnector│    │MockConnector │
//!       │  (tiberius)  │    │  (testing)   │
//!       └──────────────┘    └──────────────┘
//! ```
//!
//! Rows are decoded eagerly into driver-neutral [`Row`]s so normalization code
//! only deals with [`Value`].

pub mod mock;
mod mssql;

use std::future::Future;
use std::time::Duration;

use chrono::NaiveDateTime;
use thiserror::Error;

pub use mssql::{
    ConnectionConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_PORT, MssqlConnector, MssqlSession,
};

/// Errors raised while opening a connection, running a statement or decoding
/// its rows.
#[derive(Debug, Error)]
pub enum SourceError {
    /// TCP connect or TDS login failed.
    #[error("connection failed: {0}")]
    Connect(String),
    /// Connection setup did not finish within the configured timeout.
    #[error("connection timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    /// The server rejected a statement (permission denied, missing view, ...).
    #[error("server error {code}: {message}")]
    Server { code: u32, message: String },
    /// Any other failure while running a statement.
    #[error("query failed: {0}")]
    Query(String),
    /// A column did not hold the type the probe expects.
    #[error("column {column}: expected {expected}, found {found}")]
    Decode {
        column: usize,
        expected: &'static str,
        found: &'static str,
    },
    /// A name could not be safely quoted as an identifier.
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),
    /// Statistics refresh stopped partway; the transaction was rolled back.
    #[error(
        "statistics refresh failed on [{database}] after {completed} of {total} databases; rolled back"
    )]
    Refresh {
        database: String,
        completed: usize,
        total: usize,
        #[source]
        source: Box<SourceError>,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opens sessions against the monitored instance.
///
/// Implementations hold configuration only; every call to [`connect`](Self::connect)
/// produces a fresh, independent session.
pub trait Connector: Send + Sync {
    type Session: Session;

    fn connect(&self) -> impl Future<Output = Result<Self::Session, SourceError>> + Send;
}

/// A live connection, used sequentially by one probe call and then closed.
pub trait Session: Send {
    /// Runs a statement and returns the rows of its first result set.
    fn query(&mut self, sql: &str) -> impl Future<Output = Result<Vec<Row>, SourceError>> + Send;

    /// Runs a statement, discarding any result sets it produces.
    fn execute(&mut self, sql: &str) -> impl Future<Output = Result<(), SourceError>> + Send;

    /// Closes the connection gracefully. Dropping a session also closes it.
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// A single decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    DateTime(NaiveDateTime),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::DateTime(_) => "datetime",
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// One row of a result set.
///
/// Accessors return `Ok(None)` for SQL `NULL` and for columns past the end of
/// the row, and [`SourceError::Decode`] when the value has an incompatible type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    fn value(&self, idx: usize) -> &Value {
        self.values.get(idx).unwrap_or(&Value::Null)
    }

    fn mismatch(&self, idx: usize, expected: &'static str) -> SourceError {
        SourceError::Decode {
            column: idx,
            expected,
            found: self.value(idx).kind(),
        }
    }

    /// Integer column. Floats with no fractional part are accepted.
    pub fn i64(&self, idx: usize) -> Result<Option<i64>, SourceError> {
        match self.value(idx) {
            Value::Null => Ok(None),
            Value::Int(v) => Ok(Some(*v)),
            Value::Float(v) if v.fract() == 0.0 => Ok(Some(*v as i64)),
            _ => Err(self.mismatch(idx, "int")),
        }
    }

    /// Numeric column, widened to `f64`.
    pub fn f64(&self, idx: usize) -> Result<Option<f64>, SourceError> {
        match self.value(idx) {
            Value::Null => Ok(None),
            Value::Int(v) => Ok(Some(*v as f64)),
            Value::Float(v) => Ok(Some(*v)),
            _ => Err(self.mismatch(idx, "number")),
        }
    }

    pub fn text(&self, idx: usize) -> Result<Option<&str>, SourceError> {
        match self.value(idx) {
            Value::Null => Ok(None),
            Value::Text(v) => Ok(Some(v.as_str())),
            _ => Err(self.mismatch(idx, "text")),
        }
    }

    /// Text column, `NULL` mapped to an empty string.
    pub fn text_or_empty(&self, idx: usize) -> Result<String, SourceError> {
        Ok(self.text(idx)?.unwrap_or_default().to_string())
    }

    pub fn datetime(&self, idx: usize) -> Result<Option<NaiveDateTime>, SourceError> {
        match self.value(idx) {
            Value::Null => Ok(None),
            Value::DateTime(v) => Ok(Some(*v)),
            _ => Err(self.mismatch(idx, "datetime")),
        }
    }
}

/// Builds a [`Row`] from heterogeneous values: `row![1, "master", None::<f64>]`.
#[macro_export]
macro_rules! row {
    ($($value:expr),* $(,)?) => {
        $crate::source::Row::new(vec![$($crate::source::Value::from($value)),*])
    };
}

/// Quotes a database name for interpolation into dynamic SQL.
///
/// Wraps the name in brackets and doubles any closing bracket. Empty names and
/// names longer than the 128-character `sysname` limit are rejected.
pub fn quote_identifier(name: &str) -> Result<String, SourceError> {
    if name.is_empty() || name.chars().count() > 128 || name.contains('\0') {
        return Err(SourceError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("[{}]", name.replace(']', "]]")))
}
