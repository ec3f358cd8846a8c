use serde::{Deserialize, Serialize};

use crate::error::AdapterError;

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Sqlite,
    SqlServer,
    Postgresql,
    Mysql,
}

impl BackendKind {
    /// Resolve a backend tag, case-insensitively. `postgres` is accepted as an
    /// alias for `postgresql`.
    pub fn parse(tag: &str) -> Result<Self, AdapterError> {
        match tag.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "sqlserver" => Ok(Self::SqlServer),
            "postgresql" | "postgres" => Ok(Self::Postgresql),
            "mysql" => Ok(Self::Mysql),
            _ => Err(AdapterError::UnsupportedBackend(tag.to_string())),
        }
    }

    /// Tag used in metadata payloads and resource URIs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::SqlServer => "sqlserver",
            Self::Postgresql => "postgresql",
            Self::Mysql => "mysql",
        }
    }

    /// Product name used in metadata payloads and logs.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Sqlite => "SQLite",
            Self::SqlServer => "SQL Server",
            Self::Postgresql => "PostgreSQL",
            Self::Mysql => "MySQL",
        }
    }
}

/// Connection settings for one backend, fixed for the adapter's lifetime.
#[derive(Debug, Clone)]
pub enum AdapterConfig {
    Sqlite(SqliteConfig),
    SqlServer(SqlServerConfig),
    Postgres(PostgresConfig),
    Mysql(MysqlConfig),
}

impl AdapterConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            AdapterConfig::Sqlite(_) => BackendKind::Sqlite,
            AdapterConfig::SqlServer(_) => BackendKind::SqlServer,
            AdapterConfig::Postgres(_) => BackendKind::Postgresql,
            AdapterConfig::Mysql(_) => BackendKind::Mysql,
        }
    }
}

/// The file engine's whole configuration is a path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlServerConfig {
    pub server: String,
    pub database: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_sqlserver_port")]
    pub port: u16,
    /// Accept the server certificate without validation. Matches the
    /// lab/internal deployments this tool targets.
    #[serde(default = "default_true")]
    pub trust_cert: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub database: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_postgres_port")]
    pub port: u16,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MysqlConfig {
    pub host: String,
    pub database: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_mysql_port")]
    pub port: u16,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Use a managed-identity bearer token as the password. Token acquisition
    /// is delegated to the caller; this flag only changes how the connection
    /// is assembled (TLS forced, token consumed as the password field).
    #[serde(default)]
    pub iam_auth: bool,
    #[serde(default)]
    pub region: Option<String>,
}

fn default_sqlserver_port() -> u16 {
    1433
}

fn default_postgres_port() -> u16 {
    5432
}

fn default_mysql_port() -> u16 {
    3306
}

fn default_connect_timeout_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_tags_parse_case_insensitively() {
        assert_eq!(BackendKind::parse("sqlite").unwrap(), BackendKind::Sqlite);
        assert_eq!(
            BackendKind::parse("SQLServer").unwrap(),
            BackendKind::SqlServer
        );
        assert_eq!(
            BackendKind::parse("PostgreSQL").unwrap(),
            BackendKind::Postgresql
        );
        assert_eq!(
            BackendKind::parse("postgres").unwrap(),
            BackendKind::Postgresql
        );
        assert_eq!(BackendKind::parse("MYSQL").unwrap(), BackendKind::Mysql);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let err = BackendKind::parse("oracle").unwrap_err();
        assert_eq!(err.to_string(), "Unsupported database type: oracle");
    }

    #[test]
    fn sqlserver_config_fills_defaults() {
        let cfg: SqlServerConfig = serde_json::from_value(serde_json::json!({
            "server": "db.internal",
            "database": "orders"
        }))
        .expect("must deserialize");
        assert_eq!(cfg.port, 1433);
        assert!(cfg.trust_cert);
        assert!(cfg.user.is_none());
    }

    #[test]
    fn mysql_config_fills_defaults() {
        let cfg: MysqlConfig = serde_json::from_value(serde_json::json!({
            "host": "db.internal",
            "database": "orders"
        }))
        .expect("must deserialize");
        assert_eq!(cfg.port, 3306);
        assert_eq!(cfg.connect_timeout_ms, 30_000);
        assert!(!cfg.iam_auth);
    }
}
