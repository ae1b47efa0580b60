mod auth;
mod handlers;
mod openapi;
mod state;

use std::net::SocketAddr;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

use sqlpulse_core::source::{DEFAULT_PORT, MssqlConnector};
use sqlpulse_core::{ConnectionConfig, Monitor};

use auth::{AccessLogLayer, Credentials};
use openapi::ApiDoc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

// ============================================================
// CLI
// ============================================================

#[derive(Parser)]
#[command(name = "sqlpulse-web", about = "SQL Server health monitoring API", version = sqlpulse_core::VERSION)]
struct Args {
    /// Listen address.
    #[arg(long, default_value = "127.0.0.1:5000", env = "SQLPULSE_LISTEN")]
    listen: String,

    /// SQL Server host.
    #[arg(long, default_value = "localhost", env = "SQLPULSE_DB_HOST")]
    db_host: String,

    /// SQL Server TCP port.
    #[arg(long, default_value_t = DEFAULT_PORT, env = "SQLPULSE_DB_PORT")]
    db_port: u16,

    /// Database to connect to. Invalid objects are reported for this database only.
    #[arg(long, default_value = "master", env = "SQLPULSE_DB_NAME")]
    db_name: String,

    /// SQL login name.
    #[arg(long, default_value = "", env = "SQLPULSE_DB_USER")]
    db_user: String,

    /// SQL login password.
    #[arg(long, default_value = "", env = "SQLPULSE_DB_PASSWORD", hide_env_values = true)]
    db_password: String,

    /// Encrypt the whole session, not only the login. Enable with --db-encrypt=true.
    #[arg(long, default_value_t = false, action = clap::ArgAction::Set, env = "SQLPULSE_DB_ENCRYPT")]
    db_encrypt: bool,

    /// Accept any server certificate, including self-signed ones.
    /// Disable with --db-trust-server-certificate=false.
    #[arg(
        long,
        default_value_t = true,
        action = clap::ArgAction::Set,
        env = "SQLPULSE_DB_TRUST_SERVER_CERTIFICATE"
    )]
    db_trust_server_certificate: bool,

    /// Bound on TCP connect plus login, in seconds.
    #[arg(long, default_value = "5", env = "SQLPULSE_DB_CONNECT_TIMEOUT")]
    db_connect_timeout: u64,

    /// ADO.NET connection string. Overrides the --db-* connection flags.
    #[arg(long, env = "SQLPULSE_CONNECTION_STRING", hide_env_values = true)]
    connection_string: Option<String>,

    /// Basic Auth username. If set, --auth-password is also required.
    #[arg(long, env = "SQLPULSE_AUTH_USER")]
    auth_user: Option<String>,

    /// Basic Auth password.
    #[arg(long, env = "SQLPULSE_AUTH_PASSWORD", hide_env_values = true)]
    auth_password: Option<String>,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            host: self.db_host.clone(),
            port: self.db_port,
            database: self.db_name.clone(),
            user: self.db_user.clone(),
            password: self.db_password.clone(),
            encrypt: self.db_encrypt,
            trust_server_certificate: self.db_trust_server_certificate,
            connect_timeout: Duration::from_secs(self.db_connect_timeout),
            connection_string: self
                .connection_string
                .clone()
                .filter(|s| !s.trim().is_empty()),
        }
    }

    fn credentials(&self) -> Result<Option<Credentials>, &'static str> {
        match (&self.auth_user, &self.auth_password) {
            (Some(user), Some(pass)) => Ok(Some(Arc::new((user.clone(), pass.clone())))),
            (Some(_), None) | (None, Some(_)) => {
                Err("--auth-user and --auth-password must both be set")
            }
            (None, None) => Ok(None),
        }
    }
}

// ============================================================
// Main
// ============================================================

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to build tokio runtime");
            process::exit(1);
        }
    };
    runtime.block_on(async_main(args));
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["sqlpulse_web", "sqlpulse_core"] {
        if let Ok(directive) = format!("{target}={level}").parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn async_main(args: Args) {
    let config = args.connection_config();
    info!(
        version = sqlpulse_core::VERSION,
        host = %config.host,
        port = config.port,
        database = %config.database,
        connection_string = config.connection_string.is_some(),
        "starting"
    );
    let monitor = Arc::new(Monitor::new(MssqlConnector::new(config)));

    let auth_creds = match args.credentials() {
        Ok(creds) => creds,
        Err(msg) => {
            error!("{msg}");
            process::exit(1);
        }
    };
    if auth_creds.is_some() {
        info!("basic auth enabled");
    }

    // Router
    let mut app = handlers::routes::<MssqlConnector>()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .with_state(monitor);

    // AccessLogLayer goes before auth so it wraps it and can read the AuthUser extension
    app = app.layer(AccessLogLayer);

    if let Some(creds) = auth_creds {
        app = app.layer(axum::middleware::from_fn_with_state(
            creds,
            auth::basic_auth_middleware,
        ));
    }

    let app = app
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new());

    let app = app.into_make_service_with_connect_info::<SocketAddr>();

    let addr: SocketAddr = match args.listen.parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(listen = %args.listen, error = %e, "invalid listen address");
            process::exit(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%addr, error = %e, "failed to bind");
            process::exit(1);
        }
    };
    info!(%addr, "listening");

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "server error");
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use clap::{CommandFactory, FromArgMatches};

    /// Parses flags with every `env` fallback switched off, so the caller's
    /// shell cannot leak into the result.
    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["sqlpulse-web"];
        argv.extend_from_slice(extra);
        let matches = Args::command()
            .mut_args(|arg| arg.env(None::<&'static str>))
            .try_get_matches_from(argv)
            .unwrap();
        Args::from_arg_matches(&matches).unwrap()
    }

    #[test]
    fn defaults_ignore_environment() {
        let config = parse(&[]).connection_config();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 1433);
        assert_eq!(config.database, "master");
        assert!(!config.encrypt);
        assert!(config.trust_server_certificate);
        assert!(config.connection_string.is_none());
    }

    #[test]
    fn flags_map_onto_connection_config() {
        let args = parse(&[
            "--db-host",
            "db.internal",
            "--db-port",
            "14330",
            "--db-name",
            "Sales",
            "--db-user",
            "monitor",
            "--db-password",
            "pw",
            "--db-encrypt",
            "true",
            "--db-trust-server-certificate",
            "false",
            "--db-connect-timeout",
            "9",
        ]);
        let config = args.connection_config();
        assert_eq!(config.host, "db.internal");
        assert_eq!(config.port, 14330);
        assert_eq!(config.database, "Sales");
        assert_eq!(config.user, "monitor");
        assert_eq!(config.password, "pw");
        assert!(config.encrypt);
        assert!(!config.trust_server_certificate);
        assert_eq!(config.connect_timeout, Duration::from_secs(9));
        assert!(config.connection_string.is_none());
    }

    #[test]
    fn blank_connection_string_is_ignored() {
        let args = parse(&["--connection-string", "  "]);
        assert!(args.connection_config().connection_string.is_none());

        let args = parse(&["--connection-string", "server=tcp:reporting,1500"]);
        assert_eq!(
            args.connection_config().connection_string.as_deref(),
            Some("server=tcp:reporting,1500")
        );
    }

    #[test]
    fn auth_flags_must_come_in_pairs() {
        assert!(parse(&[]).credentials().unwrap().is_none());
        assert!(parse(&["--auth-user", "ops"]).credentials().is_err());
        assert!(parse(&["--auth-password", "pw"]).credentials().is_err());

        let creds = parse(&["--auth-user", "ops", "--auth-password", "pw"])
            .credentials()
            .unwrap()
            .unwrap();
        assert_eq!(creds.0, "ops");
        assert_eq!(creds.1, "pw");
    }
}
