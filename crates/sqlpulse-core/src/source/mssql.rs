//! Live SQL Server connections via tiberius.
//!
//! One connection per probe call: no pooling, no retry. Connection setup (TCP
//! connect plus TDS login) is bounded by [`ConnectionConfig::connect_timeout`];
//! statements inherit the driver's defaults.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tiberius::error::Error as TdsError;
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, FromSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

use super::{Connector, Row, Session, SourceError, Value};

/// Default TCP port of a SQL Server instance.
pub const DEFAULT_PORT: u16 = 1433;

/// Default bound on TCP connect plus login.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection parameters for the monitored instance.
///
/// When `connection_string` is set (ADO.NET format), it replaces the discrete
/// host/port/database/credential/encryption fields; `connect_timeout` still applies.
#[derive(Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    /// Require TLS for the whole session. When false only the login is encrypted.
    pub encrypt: bool,
    /// Skip certificate validation. On by default: stock instances present a
    /// self-signed certificate even for login-only TLS.
    pub trust_server_certificate: bool,
    pub connect_timeout: Duration,
    pub connection_string: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            database: "master".to_string(),
            user: String::new(),
            password: String::new(),
            encrypt: false,
            trust_server_certificate: true,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            connection_string: None,
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("encrypt", &self.encrypt)
            .field("trust_server_certificate", &self.trust_server_certificate)
            .field("connect_timeout", &self.connect_timeout)
            .field(
                "connection_string",
                &self.connection_string.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl ConnectionConfig {
    /// Builds the driver configuration.
    pub(crate) fn to_tiberius(&self) -> Result<Config, SourceError> {
        if let Some(ref ado) = self.connection_string {
            return Config::from_ado_string(ado)
                .map_err(|e| SourceError::Connect(format_mssql_error(&e)));
        }

        let mut config = Config::new();
        config.host(&self.host);
        config.port(self.port);
        config.database(&self.database);
        config.authentication(AuthMethod::sql_server(&self.user, &self.password));
        config.encryption(if self.encrypt {
            EncryptionLevel::Required
        } else {
            EncryptionLevel::Off
        });
        if self.trust_server_certificate {
            config.trust_cert();
        }
        Ok(config)
    }
}

/// Opens tiberius connections over tokio TCP streams.
#[derive(Debug, Clone)]
pub struct MssqlConnector {
    config: ConnectionConfig,
}

impl MssqlConnector {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }
}

/// A single live tiberius connection.
pub struct MssqlSession {
    client: Client<Compat<TcpStream>>,
}

impl Connector for MssqlConnector {
    type Session = MssqlSession;

    async fn connect(&self) -> Result<MssqlSession, SourceError> {
        let config = self.config.to_tiberius()?;
        let timeout = self.config.connect_timeout;
        match tokio::time::timeout(timeout, open(config)).await {
            Ok(session) => session,
            Err(_) => Err(SourceError::Timeout(timeout)),
        }
    }
}

async fn open(config: Config) -> Result<MssqlSession, SourceError> {
    let addr = config.get_addr();
    let tcp = TcpStream::connect(addr.as_str())
        .await
        .map_err(|e| SourceError::Connect(format!("{addr}: {e}")))?;
    tcp.set_nodelay(true)?;

    let client = Client::connect(config, tcp.compat_write())
        .await
        .map_err(|e| SourceError::Connect(format_mssql_error(&e)))?;
    debug!(%addr, "connection established");
    Ok(MssqlSession { client })
}

impl Session for MssqlSession {
    async fn query(&mut self, sql: &str) -> Result<Vec<Row>, SourceError> {
        let stream = self.client.simple_query(sql).await.map_err(driver_error)?;
        let rows = stream.into_first_result().await.map_err(driver_error)?;
        rows.into_iter().map(decode_row).collect()
    }

    async fn execute(&mut self, sql: &str) -> Result<(), SourceError> {
        let stream = self.client.simple_query(sql).await.map_err(driver_error)?;
        stream.into_results().await.map_err(driver_error)?;
        Ok(())
    }

    async fn close(self) {
        if let Err(e) = self.client.close().await {
            debug!(error = %format_mssql_error(&e), "connection close failed");
        }
    }
}

fn decode_row(row: tiberius::Row) -> Result<Row, SourceError> {
    row.into_iter()
        .enumerate()
        .map(|(idx, data)| decode_column(idx, data))
        .collect::<Result<Vec<_>, _>>()
        .map(Row::new)
}

fn decode_column(idx: usize, data: ColumnData<'static>) -> Result<Value, SourceError> {
    let value = match data {
        ColumnData::U8(v) => v.map(|v| Value::Int(v.into())),
        ColumnData::I16(v) => v.map(|v| Value::Int(v.into())),
        ColumnData::I32(v) => v.map(|v| Value::Int(v.into())),
        ColumnData::I64(v) => v.map(Value::Int),
        ColumnData::F32(v) => v.map(|v| Value::Float(v.into())),
        ColumnData::F64(v) => v.map(Value::Float),
        ColumnData::Bit(v) => v.map(|v| Value::Int(v.into())),
        ColumnData::Numeric(v) => {
            v.map(|n| Value::Float(n.value() as f64 / 10f64.powi(n.scale().into())))
        }
        ColumnData::String(v) => v.map(|s| Value::Text(s.into_owned())),
        ColumnData::Guid(v) => v.map(|g| Value::Text(g.to_string())),
        ColumnData::Xml(v) => v.map(|x| Value::Text(x.into_owned().into_string())),
        dt @ (ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_)) => {
            NaiveDateTime::from_sql(&dt)
                .map_err(driver_error)?
                .map(Value::DateTime)
        }
        d @ ColumnData::Date(_) => NaiveDate::from_sql(&d)
            .map_err(driver_error)?
            .map(|d| Value::DateTime(d.and_time(chrono::NaiveTime::MIN))),
        dto @ ColumnData::DateTimeOffset(_) => DateTime::<Utc>::from_sql(&dto)
            .map_err(driver_error)?
            .map(|d| Value::DateTime(d.naive_utc())),
        other => {
            return Err(SourceError::Decode {
                column: idx,
                expected: "scalar",
                found: column_kind(&other),
            });
        }
    };
    Ok(value.unwrap_or(Value::Null))
}

fn column_kind(data: &ColumnData<'static>) -> &'static str {
    match data {
        ColumnData::Binary(_) => "binary",
        ColumnData::Time(_) => "time",
        _ => "unsupported",
    }
}

/// Maps a driver error raised while running a statement.
fn driver_error(e: TdsError) -> SourceError {
    match e {
        TdsError::Server(token) => SourceError::Server {
            code: token.code(),
            message: token.message().to_string(),
        },
        other => SourceError::Query(format_mssql_error(&other)),
    }
}

/// Formats a tiberius error for display.
pub(crate) fn format_mssql_error(e: &TdsError) -> String {
    match e {
        TdsError::Server(token) => format!(
            "error {} (state {}, class {}): {}",
            token.code(),
            token.state(),
            token.class(),
            token.message()
        ),
        TdsError::Routing { host, port } => {
            format!("server redirected the connection to {host}:{port}")
        }
        other => {
            let msg = other.to_string();
            if msg.contains("Connection refused") {
                "connection refused".to_string()
            } else {
                msg
            }
        }
    }
}
