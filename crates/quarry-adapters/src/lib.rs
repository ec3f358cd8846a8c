use async_trait::async_trait;

use quarry_core::config::SqliteConfig;
use quarry_core::{AdapterConfig, AdapterError, BackendInfo, BackendKind, Row, RunResult};

// One adapter per engine
pub mod mysql;
pub mod postgres;
pub mod sqlite;
pub mod sqlserver;

// Marker rewriting and the pooled backend's retry policy
pub mod placeholder;
pub mod resilience;

pub use mysql::MysqlAdapter;
pub use postgres::PostgresAdapter;
pub use resilience::RetryPolicy;
pub use sqlite::SqliteAdapter;
pub use sqlserver::SqlServerAdapter;

/// Uniform query contract implemented by every backend engine.
///
/// Adapters are constructed cold: `init` performs the connection work and is
/// called once per instance. Statement text uses `?` as the positional
/// parameter marker; each adapter rewrites markers into its engine's native
/// syntax before execution (see [`placeholder`]).
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    /// Establish the connection or pool. Fails with a connection error on
    /// network or auth failure.
    async fn init(&self) -> Result<(), AdapterError>;

    /// Release all backend resources. Safe when never initialized and safe to
    /// call more than once.
    async fn close(&self) -> Result<(), AdapterError>;

    /// Run a row-returning statement. Never partially returns rows on failure.
    async fn query_all(
        &self,
        sql: &str,
        params: &[serde_json::Value],
    ) -> Result<Vec<Row>, AdapterError>;

    /// Run a mutating statement, returning normalized change counters.
    async fn execute(
        &self,
        sql: &str,
        params: &[serde_json::Value],
    ) -> Result<RunResult, AdapterError>;

    /// Run one or more statements with no parameter binding. Used for DDL.
    async fn exec_batch(&self, sql: &str) -> Result<(), AdapterError>;

    /// Engine identity and location fields.
    fn metadata(&self) -> BackendInfo;

    /// Catalog statement listing user tables. Pure string builder, no I/O.
    fn list_tables_statement(&self) -> String;

    /// Catalog statement describing the columns of `table`. The name is
    /// substituted verbatim; this surface is internal and never receives
    /// untrusted input.
    fn describe_table_statement(&self, table: &str) -> String;
}

/// Build the adapter for `config`. Selection happens once at startup; nothing
/// downstream inspects the concrete type again.
pub fn create_adapter(config: AdapterConfig) -> Box<dyn DatabaseAdapter> {
    match config {
        AdapterConfig::Sqlite(cfg) => Box::new(SqliteAdapter::new(cfg)),
        AdapterConfig::SqlServer(cfg) => Box::new(SqlServerAdapter::new(cfg)),
        AdapterConfig::Postgres(cfg) => Box::new(PostgresAdapter::new(cfg)),
        AdapterConfig::Mysql(cfg) => Box::new(MysqlAdapter::new(cfg)),
    }
}

/// Build an adapter from a backend tag and a raw configuration value.
///
/// Tags resolve case-insensitively and unknown tags fail with an
/// unsupported-backend error. For the file engine a bare JSON string is
/// accepted as the database path.
pub fn create_adapter_from_tag(
    tag: &str,
    config: serde_json::Value,
) -> Result<Box<dyn DatabaseAdapter>, AdapterError> {
    let kind = BackendKind::parse(tag)?;
    let config = match (kind, config) {
        (BackendKind::Sqlite, serde_json::Value::String(path)) => {
            AdapterConfig::Sqlite(SqliteConfig { path })
        }
        (BackendKind::Sqlite, value) => AdapterConfig::Sqlite(parse_config(value)?),
        (BackendKind::SqlServer, value) => AdapterConfig::SqlServer(parse_config(value)?),
        (BackendKind::Postgresql, value) => AdapterConfig::Postgres(parse_config(value)?),
        (BackendKind::Mysql, value) => AdapterConfig::Mysql(parse_config(value)?),
    };
    Ok(create_adapter(config))
}

fn parse_config<T: serde::de::DeserializeOwned>(
    value: serde_json::Value,
) -> Result<T, AdapterError> {
    serde_json::from_value(value)
        .map_err(|e| AdapterError::Validation(format!("Invalid connection settings: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_accepts_bare_path_for_the_file_engine() {
        let adapter = create_adapter_from_tag("sqlite", serde_json::json!("/tmp/test.db"))
            .expect("bare path must be accepted");
        let info = adapter.metadata();
        assert_eq!(info.kind, BackendKind::Sqlite);
        assert_eq!(info.path.as_deref(), Some("/tmp/test.db"));
    }

    #[test]
    fn factory_resolves_tags_case_insensitively() {
        let adapter = create_adapter_from_tag(
            "SqlServer",
            serde_json::json!({"server": "db.internal", "database": "orders"}),
        )
        .expect("mixed-case tag must resolve");
        assert_eq!(adapter.metadata().kind, BackendKind::SqlServer);

        let adapter = create_adapter_from_tag(
            "POSTGRES",
            serde_json::json!({"host": "db.internal", "database": "orders"}),
        )
        .expect("alias must resolve");
        assert_eq!(adapter.metadata().kind, BackendKind::Postgresql);
    }

    #[test]
    fn factory_rejects_unknown_tags() {
        let err = create_adapter_from_tag("mongodb", serde_json::json!({}))
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "Unsupported database type: mongodb");
    }

    #[test]
    fn factory_rejects_incomplete_settings() {
        let err = create_adapter_from_tag("mysql", serde_json::json!({"host": "only"}))
            .err()
            .unwrap();
        assert!(err.to_string().starts_with("Invalid connection settings"));
    }
}
