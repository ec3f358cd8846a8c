use std::sync::{Arc, Mutex};

use base64::{Engine as _, engine::general_purpose};
use rusqlite::Connection;
use rusqlite::types::ValueRef;
use tracing::{error, info};

use quarry_core::config::SqliteConfig;
use quarry_core::{AdapterError, BackendInfo, BackendKind, Row, RunResult};

use crate::DatabaseAdapter;

/// Embedded file engine.
///
/// The driver is synchronous, so the handle lives behind a blocking mutex and
/// every statement runs on the blocking thread pool. `?` markers are native
/// here; no rewriting happens.
pub struct SqliteAdapter {
    path: String,
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteAdapter {
    pub fn new(config: SqliteConfig) -> Self {
        Self {
            path: config.path,
            conn: Arc::new(Mutex::new(None)),
        }
    }

    async fn with_conn<T, F>(&self, op: F) -> Result<T, AdapterError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, AdapterError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| AdapterError::Connection("SQLite connection lock poisoned".into()))?;
            let db = guard
                .as_ref()
                .ok_or_else(|| AdapterError::Connection("Database not initialized".into()))?;
            op(db)
        })
        .await
        .map_err(|e| AdapterError::Query(format!("SQLite task failed: {e}")))?
    }
}

fn query_error(e: rusqlite::Error) -> AdapterError {
    AdapterError::Query(e.to_string())
}

fn json_to_sql(value: &serde_json::Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match value {
        serde_json::Value::Null => Sql::Null,
        serde_json::Value::Bool(b) => Sql::Integer(i64::from(*b)),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Sql::Integer(i),
            None => Sql::Real(n.as_f64().unwrap_or(0.0)),
        },
        serde_json::Value::String(s) => Sql::Text(s.clone()),
        other => Sql::Text(other.to_string()),
    }
}

fn value_ref_to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => i.into(),
        ValueRef::Real(f) => f.into(),
        ValueRef::Text(t) => serde_json::Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => serde_json::Value::String(general_purpose::STANDARD.encode(b)),
    }
}

#[async_trait::async_trait]
impl DatabaseAdapter for SqliteAdapter {
    async fn init(&self) -> Result<(), AdapterError> {
        let path = self.path.clone();
        let conn = Arc::clone(&self.conn);
        info!("Opening SQLite database at: {path}");
        tokio::task::spawn_blocking(move || {
            let db = Connection::open(&path).map_err(|e| {
                error!("SQLite connection error: {e}");
                AdapterError::Connection(format!("Failed to open SQLite database: {e}"))
            })?;
            let mut guard = conn
                .lock()
                .map_err(|_| AdapterError::Connection("SQLite connection lock poisoned".into()))?;
            *guard = Some(db);
            Ok(())
        })
        .await
        .map_err(|e| AdapterError::Connection(format!("SQLite task failed: {e}")))??;
        info!("SQLite database opened successfully");
        Ok(())
    }

    async fn close(&self) -> Result<(), AdapterError> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| AdapterError::Connection("SQLite connection lock poisoned".into()))?;
            if let Some(db) = guard.take() {
                db.close().map_err(|(_, e)| {
                    AdapterError::Connection(format!("Error closing SQLite database: {e}"))
                })?;
            }
            Ok(())
        })
        .await
        .map_err(|e| AdapterError::Connection(format!("SQLite task failed: {e}")))?
    }

    async fn query_all(
        &self,
        sql: &str,
        params: &[serde_json::Value],
    ) -> Result<Vec<Row>, AdapterError> {
        let sql = sql.to_string();
        let params: Vec<rusqlite::types::Value> = params.iter().map(json_to_sql).collect();
        self.with_conn(move |db| {
            let mut stmt = db.prepare(&sql).map_err(query_error)?;
            let names: Vec<String> = stmt
                .column_names()
                .into_iter()
                .map(|s| s.to_string())
                .collect();
            let mut rows = stmt
                .query(rusqlite::params_from_iter(params))
                .map_err(query_error)?;
            let mut out = Vec::new();
            while let Some(row) = rows.next().map_err(query_error)? {
                let mut object = Row::new();
                for (i, name) in names.iter().enumerate() {
                    let value = row.get_ref(i).map_err(query_error)?;
                    object.insert(name.clone(), value_ref_to_json(value));
                }
                out.push(object);
            }
            Ok(out)
        })
        .await
    }

    async fn execute(
        &self,
        sql: &str,
        params: &[serde_json::Value],
    ) -> Result<RunResult, AdapterError> {
        let sql = sql.to_string();
        let params: Vec<rusqlite::types::Value> = params.iter().map(json_to_sql).collect();
        self.with_conn(move |db| {
            let changes = db
                .execute(&sql, rusqlite::params_from_iter(params))
                .map_err(query_error)?;
            Ok(RunResult {
                changes: changes as u64,
                last_insert_id: db.last_insert_rowid(),
            })
        })
        .await
    }

    async fn exec_batch(&self, sql: &str) -> Result<(), AdapterError> {
        let sql = sql.to_string();
        self.with_conn(move |db| db.execute_batch(&sql).map_err(query_error))
            .await
    }

    fn metadata(&self) -> BackendInfo {
        BackendInfo::file(BackendKind::Sqlite, self.path.clone())
    }

    fn list_tables_statement(&self) -> String {
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'".to_string()
    }

    fn describe_table_statement(&self, table: &str) -> String {
        format!(
            "SELECT name, type, \"notnull\", pk, dflt_value, NULL as comment FROM pragma_table_info('{table}')"
        )
    }
}
