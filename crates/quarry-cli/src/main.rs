use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser};

use quarry_adapters::{DatabaseAdapter, create_adapter};
use quarry_core::AdapterConfig;
use quarry_core::config::{MysqlConfig, PostgresConfig, SqlServerConfig, SqliteConfig};
use quarry_mcp::McpServer;

/// Environment variable consumed as the MySQL password under
/// managed-identity auth. Token acquisition itself happens outside this
/// process; whatever signer produced the token, it arrives here opaque.
const MYSQL_IAM_TOKEN_VAR: &str = "QUARRY_MYSQL_IAM_TOKEN";

#[derive(Parser, Debug)]
#[command(
    name = "quarry",
    version,
    about = "MCP server exposing a relational database as typed tools"
)]
struct Cli {
    /// Path to a SQLite database file (the default engine)
    #[arg(value_name = "DB_PATH")]
    db_path: Option<String>,

    /// Connect to SQL Server
    #[arg(long, group = "engine")]
    sqlserver: bool,

    /// Connect to PostgreSQL
    #[arg(long, visible_alias = "postgres", group = "engine")]
    postgresql: bool,

    /// Connect to MySQL
    #[arg(long, group = "engine")]
    mysql: bool,

    /// SQL Server instance name or address
    #[arg(long)]
    server: Option<String>,

    /// PostgreSQL / MySQL host
    #[arg(long)]
    host: Option<String>,

    /// Database name
    #[arg(long)]
    database: Option<String>,

    /// Login user
    #[arg(long)]
    user: Option<String>,

    /// Login password
    #[arg(long)]
    password: Option<String>,

    /// Port override (defaults: 1433 / 5432 / 3306)
    #[arg(long)]
    port: Option<u16>,

    /// Enable TLS for PostgreSQL / MySQL connections
    #[arg(long, value_name = "BOOL")]
    ssl: Option<bool>,

    /// Connect timeout in milliseconds
    #[arg(long = "connection-timeout", value_name = "MS")]
    connection_timeout: Option<u64>,

    /// Authenticate to MySQL with a managed-identity (AWS IAM) token
    #[arg(long = "aws-iam-auth")]
    aws_iam_auth: bool,

    /// AWS region for IAM authentication
    #[arg(long = "aws-region")]
    aws_region: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries protocol frames; every diagnostic goes to stderr.
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let Some(config) = build_config(&cli)? else {
        eprintln!("{}", Cli::command().render_long_help());
        std::process::exit(1);
    };

    tracing::info!("Initializing {} database", config.kind().display_name());
    if let AdapterConfig::Sqlite(cfg) = &config {
        tracing::info!("Using SQLite database at path: {}", cfg.path);
    }

    let adapter: Arc<dyn DatabaseAdapter> = Arc::from(create_adapter(config));
    adapter
        .init()
        .await
        .context("failed to initialize database connection")?;
    tracing::info!("Connected to {} database", adapter.metadata().name);

    let shutdown = adapter.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutting down");
        if let Err(e) = shutdown.close().await {
            tracing::warn!("Error closing database connection: {e}");
        }
        std::process::exit(0);
    });

    let server = McpServer::new(adapter.clone());
    tracing::info!("Server running. Press Ctrl+C to exit");
    server.run_stdio().await?;

    // stdin closed; release the connection before exiting normally.
    if let Err(e) = adapter.close().await {
        tracing::warn!("Error closing database connection: {e}");
    }
    Ok(())
}

/// Map the flag surface onto one engine's connection settings. `None` means
/// no engine was selected at all, which callers treat as a usage error.
fn build_config(cli: &Cli) -> anyhow::Result<Option<AdapterConfig>> {
    if cli.sqlserver {
        let server = cli.server.clone().context("--sqlserver requires --server")?;
        let database = cli
            .database
            .clone()
            .context("--sqlserver requires --database")?;
        return Ok(Some(AdapterConfig::SqlServer(SqlServerConfig {
            server,
            database,
            user: cli.user.clone(),
            password: cli.password.clone(),
            port: cli.port.unwrap_or(1433),
            trust_cert: true,
        })));
    }

    if cli.postgresql {
        let host = cli.host.clone().context("--postgresql requires --host")?;
        let database = cli
            .database
            .clone()
            .context("--postgresql requires --database")?;
        return Ok(Some(AdapterConfig::Postgres(PostgresConfig {
            host,
            database,
            user: cli.user.clone(),
            password: cli.password.clone(),
            port: cli.port.unwrap_or(5432),
            ssl: cli.ssl.unwrap_or(false),
            connect_timeout_ms: cli.connection_timeout.unwrap_or(30_000),
        })));
    }

    if cli.mysql {
        let host = cli.host.clone().context("--mysql requires --host")?;
        let database = cli
            .database
            .clone()
            .context("--mysql requires --database")?;
        let mut ssl = cli.ssl.unwrap_or(false);
        let mut password = cli.password.clone();
        if cli.aws_iam_auth {
            if cli.user.is_none() {
                anyhow::bail!("AWS IAM authentication requires a username (--user)");
            }
            if cli.aws_region.is_none() {
                anyhow::bail!("AWS IAM authentication requires a region (--aws-region)");
            }
            ssl = true;
            tracing::info!("AWS IAM authentication enabled - SSL configured automatically");
            if password.is_none() {
                password = std::env::var(MYSQL_IAM_TOKEN_VAR).ok();
            }
        }
        return Ok(Some(AdapterConfig::Mysql(MysqlConfig {
            host,
            database,
            user: cli.user.clone(),
            password,
            port: cli.port.unwrap_or(3306),
            ssl,
            connect_timeout_ms: cli.connection_timeout.unwrap_or(30_000),
            iam_auth: cli.aws_iam_auth,
            region: cli.aws_region.clone(),
        })));
    }

    Ok(cli
        .db_path
        .clone()
        .map(|path| AdapterConfig::Sqlite(SqliteConfig { path })))
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {e}");
                let _ = ctrl_c.await;
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).expect("arguments must parse")
    }

    #[test]
    fn bare_path_selects_the_file_engine() {
        let cli = parse(&["quarry", "./analytics.db"]);
        let config = build_config(&cli).unwrap().unwrap();
        match config {
            AdapterConfig::Sqlite(cfg) => assert_eq!(cfg.path, "./analytics.db"),
            other => panic!("expected sqlite, got {other:?}"),
        }
    }

    #[test]
    fn no_engine_and_no_path_is_a_usage_error() {
        let cli = parse(&["quarry"]);
        assert!(build_config(&cli).unwrap().is_none());
    }

    #[test]
    fn engine_flags_are_mutually_exclusive() {
        assert!(Cli::try_parse_from(["quarry", "--sqlserver", "--mysql"]).is_err());
    }

    #[test]
    fn sqlserver_requires_server_and_database() {
        let cli = parse(&["quarry", "--sqlserver", "--database", "sales"]);
        let err = build_config(&cli).unwrap_err();
        assert!(err.to_string().contains("--server"));

        let cli = parse(&[
            "quarry",
            "--sqlserver",
            "--server",
            "db.internal",
            "--database",
            "sales",
        ]);
        let config = build_config(&cli).unwrap().unwrap();
        match config {
            AdapterConfig::SqlServer(cfg) => {
                assert_eq!(cfg.server, "db.internal");
                assert_eq!(cfg.port, 1433);
                assert!(cfg.trust_cert);
            }
            other => panic!("expected sqlserver, got {other:?}"),
        }
    }

    #[test]
    fn postgres_alias_and_defaults() {
        let cli = parse(&[
            "quarry",
            "--postgres",
            "--host",
            "pg.internal",
            "--database",
            "sales",
        ]);
        let config = build_config(&cli).unwrap().unwrap();
        match config {
            AdapterConfig::Postgres(cfg) => {
                assert_eq!(cfg.host, "pg.internal");
                assert_eq!(cfg.port, 5432);
                assert!(!cfg.ssl);
                assert_eq!(cfg.connect_timeout_ms, 30_000);
            }
            other => panic!("expected postgres, got {other:?}"),
        }
    }

    #[test]
    fn iam_auth_needs_user_and_region_and_forces_ssl() {
        let cli = parse(&[
            "quarry",
            "--mysql",
            "--host",
            "my.internal",
            "--database",
            "sales",
            "--user",
            "svc",
            "--aws-iam-auth",
        ]);
        let err = build_config(&cli).unwrap_err();
        assert!(err.to_string().contains("--aws-region"));

        let cli = parse(&[
            "quarry",
            "--mysql",
            "--host",
            "my.internal",
            "--database",
            "sales",
            "--user",
            "svc",
            "--aws-iam-auth",
            "--aws-region",
            "eu-west-1",
            "--ssl",
            "false",
        ]);
        let config = build_config(&cli).unwrap().unwrap();
        match config {
            AdapterConfig::Mysql(cfg) => {
                assert!(cfg.ssl, "IAM auth must force TLS on");
                assert!(cfg.iam_auth);
                assert_eq!(cfg.region.as_deref(), Some("eu-west-1"));
            }
            other => panic!("expected mysql, got {other:?}"),
        }
    }

    #[test]
    fn mysql_without_iam_keeps_explicit_settings() {
        let cli = parse(&[
            "quarry",
            "--mysql",
            "--host",
            "my.internal",
            "--database",
            "sales",
            "--port",
            "3307",
            "--ssl",
            "true",
            "--connection-timeout",
            "5000",
        ]);
        let config = build_config(&cli).unwrap().unwrap();
        match config {
            AdapterConfig::Mysql(cfg) => {
                assert_eq!(cfg.port, 3307);
                assert!(cfg.ssl);
                assert_eq!(cfg.connect_timeout_ms, 5000);
                assert!(!cfg.iam_auth);
                assert!(cfg.password.is_none());
            }
            other => panic!("expected mysql, got {other:?}"),
        }
    }
}
