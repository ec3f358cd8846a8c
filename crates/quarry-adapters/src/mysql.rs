use std::time::Duration;

use base64::{Engine as _, engine::general_purpose};
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, SslOpts};
use tokio::sync::Mutex;
use tracing::{error, info};

use quarry_core::config::MysqlConfig;
use quarry_core::{AdapterError, BackendInfo, BackendKind, Row, RunResult};

use crate::DatabaseAdapter;

/// MySQL client-socket engine.
///
/// `?` markers are native here; no rewriting happens. Managed-identity auth
/// consumes an opaque bearer token as the password and forces TLS; acquiring
/// the token is the caller's job.
pub struct MysqlAdapter {
    config: MysqlConfig,
    conn: Mutex<Option<Conn>>,
}

impl MysqlAdapter {
    pub fn new(config: MysqlConfig) -> Self {
        Self {
            config,
            conn: Mutex::new(None),
        }
    }

    fn build_opts(&self) -> Opts {
        let cfg = &self.config;
        let mut builder = OptsBuilder::default()
            .ip_or_hostname(cfg.host.clone())
            .tcp_port(cfg.port)
            .db_name(Some(cfg.database.clone()))
            .user(cfg.user.clone())
            .pass(cfg.password.clone())
            .tcp_connect_timeout(Some(Duration::from_millis(cfg.connect_timeout_ms)));

        if cfg.ssl || cfg.iam_auth {
            let mut ssl = SslOpts::default();
            if cfg.iam_auth {
                // Managed RDS endpoints present certificates the local trust
                // store may not know.
                ssl = ssl.with_danger_accept_invalid_certs(true);
            }
            builder = builder.ssl_opts(Some(ssl));
        }
        builder.into()
    }
}

fn query_error(e: mysql_async::Error) -> AdapterError {
    AdapterError::Query(format!("MySQL query error: {e}"))
}

fn json_to_mysql(value: &serde_json::Value) -> mysql_async::Value {
    use mysql_async::Value as V;
    match value {
        serde_json::Value::Null => V::NULL,
        serde_json::Value::Bool(b) => V::Int(i64::from(*b)),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => V::Int(i),
            None => V::Double(n.as_f64().unwrap_or(0.0)),
        },
        serde_json::Value::String(s) => V::Bytes(s.clone().into_bytes()),
        other => V::Bytes(other.to_string().into_bytes()),
    }
}

fn mysql_value_to_json(value: mysql_async::Value) -> serde_json::Value {
    use mysql_async::Value as V;
    use serde_json::Value;

    match value {
        V::NULL => Value::Null,
        // Text and binary columns both arrive as bytes; non-UTF-8 payloads
        // are rendered as base64.
        V::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(s) => Value::String(s),
            Err(e) => Value::String(general_purpose::STANDARD.encode(e.into_bytes())),
        },
        V::Int(i) => Value::from(i),
        V::UInt(u) => Value::from(u),
        V::Float(f) => Value::from(f64::from(f)),
        V::Double(d) => Value::from(d),
        V::Date(y, mo, d, h, mi, s, micros) => {
            if micros > 0 {
                Value::String(format!(
                    "{y:04}-{mo:02}-{d:02} {h:02}:{mi:02}:{s:02}.{micros:06}"
                ))
            } else {
                Value::String(format!("{y:04}-{mo:02}-{d:02} {h:02}:{mi:02}:{s:02}"))
            }
        }
        V::Time(negative, days, h, m, s, micros) => {
            let sign = if negative { "-" } else { "" };
            let hours = u32::from(days) * 24 + u32::from(h);
            if micros > 0 {
                Value::String(format!("{sign}{hours:02}:{m:02}:{s:02}.{micros:06}"))
            } else {
                Value::String(format!("{sign}{hours:02}:{m:02}:{s:02}"))
            }
        }
    }
}

fn mysql_row_to_json(mut row: mysql_async::Row) -> Row {
    let columns = row.columns();
    let mut object = Row::new();
    for (i, column) in columns.iter().enumerate() {
        let value = row
            .take::<mysql_async::Value, _>(i)
            .unwrap_or(mysql_async::Value::NULL);
        object.insert(column.name_str().into_owned(), mysql_value_to_json(value));
    }
    object
}

#[async_trait::async_trait]
impl DatabaseAdapter for MysqlAdapter {
    async fn init(&self) -> Result<(), AdapterError> {
        let cfg = &self.config;
        info!("Connecting to MySQL: {}, Database: {}", cfg.host, cfg.database);

        if cfg.iam_auth {
            if cfg.region.is_none() {
                return Err(AdapterError::Connection(
                    "AWS IAM authentication requires a region".into(),
                ));
            }
            if cfg.user.is_none() {
                return Err(AdapterError::Connection(
                    "AWS IAM authentication requires a username".into(),
                ));
            }
            info!(
                "Using AWS IAM authentication for user: {}",
                cfg.user.as_deref().unwrap_or_default()
            );
        }

        let conn = Conn::new(self.build_opts()).await.map_err(|e| {
            error!("MySQL connection error: {e}");
            if cfg.iam_auth {
                AdapterError::Connection(format!(
                    "Failed to connect to MySQL using AWS IAM authentication: {e}. Verify the token, IAM permissions and RDS configuration."
                ))
            } else {
                AdapterError::Connection(format!("Failed to connect to MySQL: {e}"))
            }
        })?;
        info!("MySQL connection established successfully");

        *self.conn.lock().await = Some(conn);
        Ok(())
    }

    async fn close(&self) -> Result<(), AdapterError> {
        if let Some(conn) = self.conn.lock().await.take() {
            conn.disconnect()
                .await
                .map_err(|e| AdapterError::Connection(format!("Error closing MySQL connection: {e}")))?;
        }
        Ok(())
    }

    async fn query_all(
        &self,
        sql: &str,
        params: &[serde_json::Value],
    ) -> Result<Vec<Row>, AdapterError> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| AdapterError::Connection("Database not initialized".into()))?;

        let params: Vec<mysql_async::Value> = params.iter().map(json_to_mysql).collect();
        let rows: Vec<mysql_async::Row> =
            conn.exec(sql, params).await.map_err(query_error)?;
        Ok(rows.into_iter().map(mysql_row_to_json).collect())
    }

    async fn execute(
        &self,
        sql: &str,
        params: &[serde_json::Value],
    ) -> Result<RunResult, AdapterError> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| AdapterError::Connection("Database not initialized".into()))?;

        let params: Vec<mysql_async::Value> = params.iter().map(json_to_mysql).collect();
        conn.exec_drop(sql, params).await.map_err(query_error)?;
        Ok(RunResult {
            changes: conn.affected_rows(),
            last_insert_id: conn.last_insert_id().map(|id| id as i64).unwrap_or(0),
        })
    }

    async fn exec_batch(&self, sql: &str) -> Result<(), AdapterError> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| AdapterError::Connection("Database not initialized".into()))?;
        conn.query_drop(sql)
            .await
            .map_err(|e| AdapterError::Query(format!("MySQL batch error: {e}")))
    }

    fn metadata(&self) -> BackendInfo {
        BackendInfo::server(
            BackendKind::Mysql,
            self.config.host.clone(),
            self.config.database.clone(),
        )
    }

    fn list_tables_statement(&self) -> String {
        format!(
            "SELECT table_name AS name FROM information_schema.tables WHERE table_schema = '{}'",
            self.config.database
        )
    }

    fn describe_table_statement(&self, table: &str) -> String {
        format!(
            r#"
      SELECT
        COLUMN_NAME as name,
        DATA_TYPE as type,
        CASE WHEN IS_NULLABLE = 'NO' THEN 1 ELSE 0 END as notnull,
        CASE WHEN COLUMN_KEY = 'PRI' THEN 1 ELSE 0 END as pk,
        COLUMN_DEFAULT as dflt_value,
        COLUMN_COMMENT as comment
      FROM
        INFORMATION_SCHEMA.COLUMNS
      WHERE
        TABLE_NAME = '{table}'
        AND TABLE_SCHEMA = '{}'
      ORDER BY
        ORDINAL_POSITION
    "#,
            self.config.database
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MysqlConfig {
        MysqlConfig {
            host: "db.internal".into(),
            database: "orders".into(),
            user: Some("app".into()),
            password: Some("secret".into()),
            port: 3306,
            ssl: false,
            connect_timeout_ms: 30_000,
            iam_auth: false,
            region: None,
        }
    }

    #[tokio::test]
    async fn iam_auth_requires_a_region() {
        let adapter = MysqlAdapter::new(MysqlConfig {
            iam_auth: true,
            region: None,
            ..config()
        });
        let err = adapter.init().await.unwrap_err();
        assert_eq!(err.to_string(), "AWS IAM authentication requires a region");
    }

    #[tokio::test]
    async fn iam_auth_requires_a_username() {
        let adapter = MysqlAdapter::new(MysqlConfig {
            iam_auth: true,
            region: Some("eu-west-1".into()),
            user: None,
            ..config()
        });
        let err = adapter.init().await.unwrap_err();
        assert_eq!(err.to_string(), "AWS IAM authentication requires a username");
    }

    #[tokio::test]
    async fn uninitialized_use_is_rejected() {
        let adapter = MysqlAdapter::new(config());
        let err = adapter.query_all("SELECT 1", &[]).await.unwrap_err();
        assert_eq!(err.to_string(), "Database not initialized");
    }

    #[test]
    fn text_bytes_become_strings() {
        let v = mysql_value_to_json(mysql_async::Value::Bytes(b"hello".to_vec()));
        assert_eq!(v, "hello");
    }

    #[test]
    fn binary_bytes_become_base64() {
        let v = mysql_value_to_json(mysql_async::Value::Bytes(vec![0xff, 0xfe]));
        assert_eq!(v, "//4=");
    }

    #[test]
    fn temporal_values_render_as_strings() {
        let v = mysql_value_to_json(mysql_async::Value::Date(2024, 3, 9, 14, 30, 5, 0));
        assert_eq!(v, "2024-03-09 14:30:05");

        let v = mysql_value_to_json(mysql_async::Value::Time(true, 1, 2, 15, 0, 0));
        assert_eq!(v, "-26:15:00");
    }

    #[test]
    fn list_tables_statement_is_scoped_to_the_database() {
        let adapter = MysqlAdapter::new(config());
        assert!(
            adapter
                .list_tables_statement()
                .contains("table_schema = 'orders'")
        );
    }

    #[test]
    fn metadata_reports_host_and_database() {
        let adapter = MysqlAdapter::new(config());
        let info = adapter.metadata();
        assert_eq!(info.name, "MySQL");
        assert_eq!(info.server.as_deref(), Some("db.internal"));
        assert_eq!(info.database.as_deref(), Some("orders"));
    }
}
