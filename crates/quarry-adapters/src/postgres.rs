use std::time::Duration;

use base64::{Engine as _, engine::general_purpose};
use tokio::sync::Mutex;
use tokio_postgres::NoTls;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{ToSql, Type};
use tracing::{error, info, warn};

use quarry_core::config::PostgresConfig;
use quarry_core::{AdapterError, BackendInfo, BackendKind, Row, RunResult};

use crate::DatabaseAdapter;
use crate::placeholder::to_numbered_markers;

/// PostgreSQL client-socket engine.
///
/// `?` markers are rewritten to `$N` before execution. INSERT statements
/// without a RETURNING clause get ` RETURNING id` appended so the insert
/// identity can be reported; tables without an `id` column fall back to a
/// plain execution and report identity 0.
pub struct PostgresAdapter {
    config: PostgresConfig,
    client: Mutex<Option<tokio_postgres::Client>>,
}

impl PostgresAdapter {
    pub fn new(config: PostgresConfig) -> Self {
        Self {
            config,
            client: Mutex::new(None),
        }
    }
}

fn query_error(e: tokio_postgres::Error) -> AdapterError {
    AdapterError::Query(format!("PostgreSQL query error: {e}"))
}

fn is_insert(sql: &str) -> bool {
    sql.trim_start().to_uppercase().starts_with("INSERT")
}

fn has_returning(sql: &str) -> bool {
    sql.to_uppercase().contains("RETURNING")
}

fn is_undefined_column(e: &tokio_postgres::Error) -> bool {
    e.as_db_error()
        .map(|db| *db.code() == SqlState::UNDEFINED_COLUMN)
        .unwrap_or(false)
}

fn json_to_pg(value: &serde_json::Value) -> Box<dyn ToSql + Sync + Send> {
    match value {
        serde_json::Value::Null => Box::new(Option::<String>::None),
        serde_json::Value::Bool(b) => Box::new(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Box::new(i),
            None => Box::new(n.as_f64().unwrap_or(0.0)),
        },
        serde_json::Value::String(s) => Box::new(s.clone()),
        other => Box::new(other.to_string()),
    }
}

fn param_refs(owned: &[Box<dyn ToSql + Sync + Send>]) -> Vec<&(dyn ToSql + Sync)> {
    owned
        .iter()
        .map(|p| p.as_ref() as &(dyn ToSql + Sync))
        .collect()
}

fn pg_value_to_json(row: &tokio_postgres::Row, idx: usize, ty: &Type) -> serde_json::Value {
    use serde_json::Value;

    match *ty {
        Type::BOOL => row
            .try_get::<_, Option<bool>>(idx)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)
            .ok()
            .flatten()
            .map(|v| Value::from(i64::from(v)))
            .unwrap_or(Value::Null),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)
            .ok()
            .flatten()
            .map(|v| Value::from(i64::from(v)))
            .unwrap_or(Value::Null),
        Type::INT8 => row
            .try_get::<_, Option<i64>>(idx)
            .ok()
            .flatten()
            .map(Value::from)
            .unwrap_or(Value::Null),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)
            .ok()
            .flatten()
            .map(|v| Value::from(f64::from(v)))
            .unwrap_or(Value::Null),
        Type::FLOAT8 => row
            .try_get::<_, Option<f64>>(idx)
            .ok()
            .flatten()
            .map(Value::from)
            .unwrap_or(Value::Null),
        // Rendered as a string, matching the driver's text representation
        // and avoiding float precision loss.
        Type::NUMERIC => row
            .try_get::<_, Option<rust_decimal::Decimal>>(idx)
            .ok()
            .flatten()
            .map(|d| Value::String(d.to_string()))
            .unwrap_or(Value::Null),
        Type::VARCHAR | Type::TEXT | Type::BPCHAR | Type::NAME => row
            .try_get::<_, Option<String>>(idx)
            .ok()
            .flatten()
            .map(Value::String)
            .unwrap_or(Value::Null),
        Type::BYTEA => row
            .try_get::<_, Option<Vec<u8>>>(idx)
            .ok()
            .flatten()
            .map(|b| Value::String(general_purpose::STANDARD.encode(b)))
            .unwrap_or(Value::Null),
        Type::DATE => row
            .try_get::<_, Option<chrono::NaiveDate>>(idx)
            .ok()
            .flatten()
            .map(|d| Value::String(d.to_string()))
            .unwrap_or(Value::Null),
        Type::TIME => row
            .try_get::<_, Option<chrono::NaiveTime>>(idx)
            .ok()
            .flatten()
            .map(|t| Value::String(t.to_string()))
            .unwrap_or(Value::Null),
        Type::TIMESTAMP => row
            .try_get::<_, Option<chrono::NaiveDateTime>>(idx)
            .ok()
            .flatten()
            .map(|t| Value::String(t.to_string()))
            .unwrap_or(Value::Null),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)
            .ok()
            .flatten()
            .map(|t| Value::String(t.to_rfc3339()))
            .unwrap_or(Value::Null),
        Type::UUID => row
            .try_get::<_, Option<uuid::Uuid>>(idx)
            .ok()
            .flatten()
            .map(|u| Value::String(u.to_string()))
            .unwrap_or(Value::Null),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<serde_json::Value>>(idx)
            .ok()
            .flatten()
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<_, Option<String>>(idx)
            .ok()
            .flatten()
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

fn pg_row_to_json(row: &tokio_postgres::Row) -> Row {
    let mut object = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        object.insert(
            column.name().to_string(),
            pg_value_to_json(row, idx, column.type_()),
        );
    }
    object
}

fn insert_id(row: &tokio_postgres::Row) -> i64 {
    row.try_get::<_, i64>("id")
        .ok()
        .or_else(|| row.try_get::<_, i32>("id").ok().map(i64::from))
        .unwrap_or(0)
}

#[async_trait::async_trait]
impl DatabaseAdapter for PostgresAdapter {
    async fn init(&self) -> Result<(), AdapterError> {
        let cfg = &self.config;
        info!(
            "Connecting to PostgreSQL: {}, Database: {}",
            cfg.host, cfg.database
        );
        if cfg.ssl {
            warn!("SSL requested for PostgreSQL but TLS support is not built in; connecting without encryption");
        }

        let mut pg = tokio_postgres::Config::new();
        pg.host(&cfg.host);
        pg.port(cfg.port);
        pg.dbname(&cfg.database);
        if let Some(user) = &cfg.user {
            pg.user(user);
        }
        if let Some(password) = &cfg.password {
            pg.password(password);
        }
        pg.connect_timeout(Duration::from_millis(cfg.connect_timeout_ms));

        let (client, connection) = pg.connect(NoTls).await.map_err(|e| {
            error!("PostgreSQL connection error: {e}");
            AdapterError::Connection(format!("Failed to connect to PostgreSQL: {e}"))
        })?;
        // The connection object drives the socket; it runs until the client
        // is dropped.
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!("PostgreSQL connection task exited: {e}");
            }
        });
        info!("PostgreSQL connection established successfully");

        *self.client.lock().await = Some(client);
        Ok(())
    }

    async fn close(&self) -> Result<(), AdapterError> {
        // Dropping the client ends the connection task.
        self.client.lock().await.take();
        Ok(())
    }

    async fn query_all(
        &self,
        sql: &str,
        params: &[serde_json::Value],
    ) -> Result<Vec<Row>, AdapterError> {
        let guard = self.client.lock().await;
        let client = guard
            .as_ref()
            .ok_or_else(|| AdapterError::Connection("Database not initialized".into()))?;

        let translated = to_numbered_markers(sql);
        let owned: Vec<_> = params.iter().map(json_to_pg).collect();
        let rows = client
            .query(&translated, &param_refs(&owned))
            .await
            .map_err(query_error)?;
        Ok(rows.iter().map(pg_row_to_json).collect())
    }

    async fn execute(
        &self,
        sql: &str,
        params: &[serde_json::Value],
    ) -> Result<RunResult, AdapterError> {
        let guard = self.client.lock().await;
        let client = guard
            .as_ref()
            .ok_or_else(|| AdapterError::Connection("Database not initialized".into()))?;

        let translated = to_numbered_markers(sql);
        let owned: Vec<_> = params.iter().map(json_to_pg).collect();
        let refs = param_refs(&owned);

        if is_insert(sql) {
            let with_identity = if has_returning(sql) {
                translated.clone()
            } else {
                format!("{translated} RETURNING id")
            };
            match client.query(&with_identity, &refs).await {
                Ok(rows) => Ok(RunResult {
                    changes: rows.len() as u64,
                    last_insert_id: rows.first().map(insert_id).unwrap_or(0),
                }),
                // No `id` column: run the statement as written and report
                // identity 0. The insert itself must still succeed.
                Err(e) if !has_returning(sql) && is_undefined_column(&e) => {
                    let changes = client
                        .execute(&translated, &refs)
                        .await
                        .map_err(query_error)?;
                    Ok(RunResult {
                        changes,
                        last_insert_id: 0,
                    })
                }
                Err(e) => Err(query_error(e)),
            }
        } else {
            let changes = client.execute(&translated, &refs).await.map_err(query_error)?;
            Ok(RunResult {
                changes,
                last_insert_id: 0,
            })
        }
    }

    async fn exec_batch(&self, sql: &str) -> Result<(), AdapterError> {
        let guard = self.client.lock().await;
        let client = guard
            .as_ref()
            .ok_or_else(|| AdapterError::Connection("Database not initialized".into()))?;
        client
            .batch_execute(sql)
            .await
            .map_err(|e| AdapterError::Query(format!("PostgreSQL batch error: {e}")))
    }

    fn metadata(&self) -> BackendInfo {
        BackendInfo::server(
            BackendKind::Postgresql,
            self.config.host.clone(),
            self.config.database.clone(),
        )
    }

    fn list_tables_statement(&self) -> String {
        "SELECT table_name as name FROM information_schema.tables WHERE table_schema = 'public' ORDER BY table_name"
            .to_string()
    }

    fn describe_table_statement(&self, table: &str) -> String {
        format!(
            r#"
      SELECT
        c.column_name as name,
        c.data_type as type,
        CASE WHEN c.is_nullable = 'NO' THEN 1 ELSE 0 END as notnull,
        CASE WHEN pk.constraint_name IS NOT NULL THEN 1 ELSE 0 END as pk,
        c.column_default as dflt_value,
        pgd.description AS comment
      FROM
        information_schema.columns c
      LEFT JOIN
        information_schema.key_column_usage kcu
        ON c.table_name = kcu.table_name AND c.column_name = kcu.column_name
      LEFT JOIN
        information_schema.table_constraints pk
        ON kcu.constraint_name = pk.constraint_name AND pk.constraint_type = 'PRIMARY KEY'
      LEFT JOIN
        pg_catalog.pg_class pgc
        ON pgc.relname = c.table_name
      LEFT JOIN
        pg_catalog.pg_attribute pga
        ON pga.attrelid = pgc.oid AND pga.attname = c.column_name
      LEFT JOIN
        pg_catalog.pg_description pgd
        ON pgd.objoid = pgc.oid AND pgd.objsubid = pga.attnum
      WHERE
        c.table_name = '{table}'
        AND c.table_schema = 'public'
      ORDER BY
        c.ordinal_position
    "#
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> PostgresAdapter {
        PostgresAdapter::new(PostgresConfig {
            host: "db.internal".into(),
            database: "orders".into(),
            user: Some("app".into()),
            password: None,
            port: 5432,
            ssl: false,
            connect_timeout_ms: 30_000,
        })
    }

    #[test]
    fn insert_statements_are_detected_case_insensitively() {
        assert!(is_insert("INSERT INTO t VALUES (1)"));
        assert!(is_insert("  insert into t values (1)"));
        assert!(!is_insert("UPDATE t SET a = 1"));
        assert!(!is_insert("SELECT * FROM inserts"));
    }

    #[test]
    fn returning_clause_is_detected() {
        assert!(has_returning("INSERT INTO t VALUES (1) RETURNING id"));
        assert!(has_returning("insert into t values (1) returning name"));
        assert!(!has_returning("INSERT INTO t VALUES (1)"));
    }

    #[test]
    fn markers_translate_before_execution() {
        assert_eq!(
            to_numbered_markers("INSERT INTO t (v) VALUES (?)"),
            "INSERT INTO t (v) VALUES ($1)"
        );
    }

    #[tokio::test]
    async fn uninitialized_use_is_rejected() {
        let err = adapter().query_all("SELECT 1", &[]).await.unwrap_err();
        assert_eq!(err.to_string(), "Database not initialized");
    }

    #[tokio::test]
    async fn close_is_safe_uninitialized() {
        adapter().close().await.expect("close");
    }

    #[test]
    fn metadata_reports_host_and_database() {
        let info = adapter().metadata();
        assert_eq!(info.name, "PostgreSQL");
        assert_eq!(info.server.as_deref(), Some("db.internal"));
        assert_eq!(info.database.as_deref(), Some("orders"));
        assert!(info.path.is_none());
    }

    #[test]
    fn describe_statement_targets_the_public_schema() {
        let sql = adapter().describe_table_statement("users");
        assert!(sql.contains("c.table_name = 'users'"));
        assert!(sql.contains("table_schema = 'public'"));
        assert!(sql.contains("pgd.description AS comment"));
    }
}
