//! Scripted in-memory source for testing probes without a SQL Server.
//!
//! Responses are keyed by a SQL fragment: the first scripted fragment contained
//! in a statement decides its outcome. Every statement a session sees is
//! recorded in a log shared by all sessions of the connector, so tests can
//! assert on transaction control statements and execution order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{Connector, Row, Session, SourceError};

/// Error number reported for scripted failures (user-defined range).
pub const SCRIPTED_ERROR_CODE: u32 = 50000;

#[derive(Debug, Clone)]
enum Reply {
    Rows(Vec<Row>),
    Fail(String),
}

#[derive(Debug, Default)]
struct Shared {
    log: Mutex<Vec<String>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// Connector whose sessions answer from a fixed script.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    script: Arc<Vec<(String, Reply)>>,
    connect_error: Option<String>,
    shared: Arc<Shared>,
}

impl MockConnector {
    /// Creates a connector with an empty script.
    ///
    /// Unscripted queries fail; unscripted `execute` statements succeed.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, fragment: &str, reply: Reply) -> Self {
        Arc::make_mut(&mut self.script).push((fragment.to_string(), reply));
        self
    }

    /// Answers statements containing `fragment` with `rows`.
    pub fn on(self, fragment: &str, rows: Vec<Row>) -> Self {
        self.push(fragment, Reply::Rows(rows))
    }

    /// Fails statements containing `fragment` with a server error.
    pub fn fail_on(self, fragment: &str, message: &str) -> Self {
        self.push(fragment, Reply::Fail(message.to_string()))
    }

    /// Makes every `connect` call fail.
    pub fn refuse_connections(mut self, message: &str) -> Self {
        self.connect_error = Some(message.to_string());
        self
    }

    /// Statements seen so far, in execution order.
    pub fn statements(&self) -> Vec<String> {
        self.shared
            .log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of sessions opened.
    pub fn opened(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    /// Number of sessions closed via [`Session::close`].
    pub fn closed(&self) -> usize {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

/// Session handed out by [`MockConnector`].
#[derive(Debug)]
pub struct MockSession {
    script: Arc<Vec<(String, Reply)>>,
    shared: Arc<Shared>,
}

impl MockSession {
    fn record(&self, sql: &str) -> Option<&Reply> {
        self.shared
            .log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(sql.trim().to_string());
        self.script
            .iter()
            .find(|(fragment, _)| sql.contains(fragment.as_str()))
            .map(|(_, reply)| reply)
    }
}

impl Connector for MockConnector {
    type Session = MockSession;

    async fn connect(&self) -> Result<MockSession, SourceError> {
        if let Some(ref message) = self.connect_error {
            return Err(SourceError::Connect(message.clone()));
        }
        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        Ok(MockSession {
            script: self.script.clone(),
            shared: self.shared.clone(),
        })
    }
}

impl Session for MockSession {
    async fn query(&mut self, sql: &str) -> Result<Vec<Row>, SourceError> {
        match self.record(sql) {
            Some(Reply::Rows(rows)) => Ok(rows.clone()),
            Some(Reply::Fail(message)) => Err(SourceError::Server {
                code: SCRIPTED_ERROR_CODE,
                message: message.clone(),
            }),
            None => Err(SourceError::Query(format!(
                "no scripted response for: {}",
                sql.trim()
            ))),
        }
    }

    async fn execute(&mut self, sql: &str) -> Result<(), SourceError> {
        match self.record(sql) {
            Some(Reply::Fail(message)) => Err(SourceError::Server {
                code: SCRIPTED_ERROR_CODE,
                message: message.clone(),
            }),
            _ => Ok(()),
        }
    }

    async fn close(self) {
        self.shared.closed.fetch_add(1, Ordering::SeqCst);
    }
}
