//! Pooled SQL Server engine with connection resilience.
//!
//! This is the one backend that survives a dropped connection. Operations run
//! through a retry loop: a failure whose text matches the policy's fault
//! vocabulary marks the pool disconnected, backs off linearly and redials.
//! Logic errors (bad SQL, constraint violations) propagate on the first
//! attempt, and so do redial failures, since a server that refuses new
//! connections will not be helped by more dialing.

use std::time::{Duration, Instant};

use base64::{Engine as _, engine::general_purpose};
use tiberius::{AuthMethod, Client, Config};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{error, info, warn};

use quarry_core::config::SqlServerConfig;
use quarry_core::{AdapterError, BackendInfo, BackendKind, Row, RunResult};

use crate::DatabaseAdapter;
use crate::placeholder;
use crate::resilience::{
    CONNECT_WAIT_CEILING, CONNECT_WAIT_INTERVAL, ConnectionState, RetryPolicy,
};

type TdsClient = Client<Compat<TcpStream>>;

struct PoolState {
    state: ConnectionState,
    client: Option<TdsClient>,
    initialized: bool,
}

impl Default for PoolState {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            client: None,
            initialized: false,
        }
    }
}

/// What to do next, decided under the pool lock and acted on outside it.
enum Step {
    Ready,
    Wait,
    Dial(Option<TdsClient>),
}

pub struct SqlServerAdapter {
    config: SqlServerConfig,
    pool: Mutex<PoolState>,
    policy: RetryPolicy,
    wait_interval: Duration,
    wait_ceiling: Duration,
}

impl SqlServerAdapter {
    pub fn new(config: SqlServerConfig) -> Self {
        Self::with_policy(config, RetryPolicy::default())
    }

    /// Construct with a custom retry policy. The default policy suits
    /// interactive use; batch callers may want a larger budget.
    pub fn with_policy(config: SqlServerConfig, policy: RetryPolicy) -> Self {
        Self {
            config,
            pool: Mutex::new(PoolState::default()),
            policy,
            wait_interval: CONNECT_WAIT_INTERVAL,
            wait_ceiling: CONNECT_WAIT_CEILING,
        }
    }

    #[cfg(test)]
    fn with_timing(
        config: SqlServerConfig,
        policy: RetryPolicy,
        wait_interval: Duration,
        wait_ceiling: Duration,
    ) -> Self {
        Self {
            config,
            pool: Mutex::new(PoolState::default()),
            policy,
            wait_interval,
            wait_ceiling,
        }
    }

    /// Guarantee a live client or fail.
    ///
    /// At most one dial is in flight per adapter; `Connecting` is the flag.
    /// Callers observing `Connecting` poll until it resolves, up to the wait
    /// ceiling. On ceiling they reset the state so a later call can redial,
    /// then fail with a timeout.
    async fn ensure_connected(&self) -> Result<(), AdapterError> {
        let deadline = Instant::now() + self.wait_ceiling;
        loop {
            let step = {
                let mut pool = self.pool.lock().await;
                if !pool.initialized {
                    return Err(AdapterError::Connection("Database not initialized".into()));
                }
                match pool.state {
                    ConnectionState::Connected if pool.client.is_some() => Step::Ready,
                    ConnectionState::Connecting => Step::Wait,
                    _ => {
                        pool.state = ConnectionState::Connecting;
                        Step::Dial(pool.client.take())
                    }
                }
            };

            match step {
                Step::Ready => return Ok(()),
                Step::Wait => {
                    if Instant::now() >= deadline {
                        let mut pool = self.pool.lock().await;
                        if pool.state == ConnectionState::Connecting {
                            pool.state = ConnectionState::Disconnected;
                        }
                        return Err(AdapterError::ConnectTimeout);
                    }
                    tokio::time::sleep(self.wait_interval).await;
                }
                Step::Dial(stale) => {
                    // The dead handle is closed before the new dial so the
                    // server side does not accumulate half-open sessions.
                    if let Some(old) = stale {
                        if let Err(e) = old.close().await {
                            warn!("Error closing stale SQL Server connection: {e}");
                        }
                    }
                    match self.dial().await {
                        Ok(client) => {
                            let mut pool = self.pool.lock().await;
                            pool.client = Some(client);
                            pool.state = ConnectionState::Connected;
                            return Ok(());
                        }
                        Err(e) => {
                            let mut pool = self.pool.lock().await;
                            pool.state = ConnectionState::Disconnected;
                            pool.client = None;
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    async fn dial(&self) -> Result<TdsClient, AdapterError> {
        let cfg = &self.config;
        info!(
            "Connecting to SQL Server: {}, Database: {}",
            cfg.server, cfg.database
        );

        let mut tds = Config::new();
        tds.host(&cfg.server);
        tds.port(cfg.port);
        tds.database(&cfg.database);
        if let Some(user) = &cfg.user {
            tds.authentication(AuthMethod::sql_server(
                user,
                cfg.password.as_deref().unwrap_or(""),
            ));
        }
        if cfg.trust_cert {
            tds.trust_cert();
        }

        let tcp = TcpStream::connect(tds.get_addr()).await.map_err(|e| {
            error!("SQL Server connection error: {e}");
            AdapterError::Connection(format!("Failed to connect to SQL Server: {e}"))
        })?;
        tcp.set_nodelay(true).ok();

        let client = Client::connect(tds, tcp.compat_write()).await.map_err(|e| {
            error!("SQL Server connection error: {e}");
            AdapterError::Connection(format!("Failed to connect to SQL Server: {e}"))
        })?;
        info!("SQL Server connection established successfully");
        Ok(client)
    }

    /// Decide whether a failed attempt continues the retry loop.
    ///
    /// Returns `Ok(())` to retry after marking the pool disconnected and
    /// sleeping the backoff. Logic errors and an exhausted budget propagate.
    async fn handle_operation_failure(
        &self,
        err: AdapterError,
        attempt: u32,
    ) -> Result<(), AdapterError> {
        if !self.policy.is_connection_fault(&err.to_string()) {
            return Err(err);
        }
        self.mark_disconnected().await;
        if attempt > self.policy.max_retries {
            return Err(AdapterError::Transient(err.to_string()));
        }
        warn!("SQL Server connection fault on attempt {attempt}, retrying: {err}");
        tokio::time::sleep(self.policy.backoff(attempt)).await;
        Ok(())
    }

    async fn mark_disconnected(&self) {
        let mut pool = self.pool.lock().await;
        pool.state = ConnectionState::Disconnected;
        // The dead handle stays in place; the next dial closes it first.
    }

    async fn query_once(
        &self,
        translated: &str,
        params: &[serde_json::Value],
    ) -> Result<Vec<Row>, AdapterError> {
        let tib_params: Vec<SqlParam> = params.iter().cloned().map(SqlParam).collect();
        let refs = param_refs(&tib_params);

        let mut pool = self.pool.lock().await;
        let client = pool
            .client
            .as_mut()
            .ok_or_else(|| AdapterError::Connection("Database not initialized".into()))?;

        let rows = client
            .query(translated, &refs)
            .await
            .map_err(query_error)?
            .into_first_result()
            .await
            .map_err(query_error)?;
        Ok(rows.iter().map(tds_row_to_json).collect())
    }

    async fn execute_once(
        &self,
        sql: &str,
        translated: &str,
        params: &[serde_json::Value],
    ) -> Result<RunResult, AdapterError> {
        let tib_params: Vec<SqlParam> = params.iter().cloned().map(SqlParam).collect();
        let refs = param_refs(&tib_params);

        let mut pool = self.pool.lock().await;
        let client = pool
            .client
            .as_mut()
            .ok_or_else(|| AdapterError::Connection("Database not initialized".into()))?;

        if is_insert(sql) {
            // SCOPE_IDENTITY() runs in the same batch as the insert, so it
            // sees exactly the identity this statement produced.
            let batch =
                format!("{translated}; SELECT CAST(SCOPE_IDENTITY() AS BIGINT) AS inserted_id");
            let results = client
                .query(&batch, &refs)
                .await
                .map_err(query_error)?
                .into_results()
                .await
                .map_err(query_error)?;
            let last_id = results
                .last()
                .and_then(|rows| rows.first())
                .and_then(|row| row.try_get::<i64, _>(0).ok().flatten())
                .unwrap_or(0);
            Ok(RunResult {
                changes: normalized_changes(sql, last_id),
                last_insert_id: last_id,
            })
        } else {
            client
                .execute(translated, &refs)
                .await
                .map_err(query_error)?;
            Ok(RunResult {
                changes: normalized_changes(sql, 0),
                last_insert_id: 0,
            })
        }
    }

    async fn exec_batch_once(&self, sql: &str) -> Result<(), AdapterError> {
        let mut pool = self.pool.lock().await;
        let client = pool
            .client
            .as_mut()
            .ok_or_else(|| AdapterError::Connection("Database not initialized".into()))?;
        client
            .simple_query(sql)
            .await
            .map_err(|e| AdapterError::Query(format!("SQL Server batch error: {e}")))?
            .into_results()
            .await
            .map_err(|e| AdapterError::Query(format!("SQL Server batch error: {e}")))?;
        Ok(())
    }
}

fn query_error(e: tiberius::error::Error) -> AdapterError {
    AdapterError::Query(format!("SQL Server query error: {e}"))
}

fn is_insert(sql: &str) -> bool {
    sql.trim_start().to_uppercase().starts_with("INSERT")
}

/// Change counter the engine reports without a second round trip: one row for
/// an insert that produced an identity, zero for everything else. Updates and
/// deletes therefore always report zero on this backend.
fn normalized_changes(sql: &str, last_id: i64) -> u64 {
    if is_insert(sql) && last_id > 0 { 1 } else { 0 }
}

/// Owned parameter holder bound as a typed TDS parameter, never interpolated
/// into statement text.
struct SqlParam(serde_json::Value);

impl tiberius::ToSql for SqlParam {
    fn to_sql(&self) -> tiberius::ColumnData<'_> {
        use std::borrow::Cow;
        use tiberius::ColumnData;

        match &self.0 {
            serde_json::Value::Null => ColumnData::String(None),
            serde_json::Value::Bool(b) => ColumnData::Bit(Some(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => ColumnData::I64(Some(i)),
                None => ColumnData::F64(Some(n.as_f64().unwrap_or(0.0))),
            },
            serde_json::Value::String(s) => ColumnData::String(Some(Cow::Borrowed(s.as_str()))),
            other => ColumnData::String(Some(Cow::Owned(other.to_string()))),
        }
    }
}

fn param_refs(tib_params: &[SqlParam]) -> Vec<&dyn tiberius::ToSql> {
    tib_params
        .iter()
        .map(|p| p as &dyn tiberius::ToSql)
        .collect()
}

/// Typed probes, narrowest first so BIT does not surface as bytes. Unmatched
/// types fall through to null.
fn tds_value_to_json(row: &tiberius::Row, idx: usize) -> serde_json::Value {
    use serde_json::Value;

    if let Ok(Some(v)) = row.try_get::<bool, _>(idx) {
        return Value::Bool(v);
    }
    if let Ok(Some(v)) = row.try_get::<u8, _>(idx) {
        return Value::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<i16, _>(idx) {
        return Value::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<i32, _>(idx) {
        return Value::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<i64, _>(idx) {
        return Value::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<f32, _>(idx) {
        return Value::from(f64::from(v));
    }
    if let Ok(Some(v)) = row.try_get::<f64, _>(idx) {
        return Value::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<tiberius::numeric::Numeric, _>(idx) {
        return Value::String(v.to_string());
    }
    if let Ok(Some(v)) = row.try_get::<&str, _>(idx) {
        return Value::String(v.to_string());
    }
    if let Ok(Some(v)) = row.try_get::<uuid::Uuid, _>(idx) {
        return Value::String(v.to_string());
    }
    if let Ok(Some(v)) = row.try_get::<chrono::NaiveDateTime, _>(idx) {
        return Value::String(v.to_string());
    }
    if let Ok(Some(v)) = row.try_get::<chrono::NaiveDate, _>(idx) {
        return Value::String(v.to_string());
    }
    if let Ok(Some(v)) = row.try_get::<chrono::NaiveTime, _>(idx) {
        return Value::String(v.to_string());
    }
    if let Ok(Some(v)) = row.try_get::<chrono::DateTime<chrono::Utc>, _>(idx) {
        return Value::String(v.to_rfc3339());
    }
    if let Ok(Some(v)) = row.try_get::<&[u8], _>(idx) {
        return Value::String(general_purpose::STANDARD.encode(v));
    }
    Value::Null
}

fn tds_row_to_json(row: &tiberius::Row) -> Row {
    let mut object = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        object.insert(column.name().to_string(), tds_value_to_json(row, i));
    }
    object
}

#[async_trait::async_trait]
impl DatabaseAdapter for SqlServerAdapter {
    async fn init(&self) -> Result<(), AdapterError> {
        {
            let mut pool = self.pool.lock().await;
            pool.initialized = true;
        }
        self.ensure_connected().await
    }

    async fn close(&self) -> Result<(), AdapterError> {
        let client = {
            let mut pool = self.pool.lock().await;
            pool.state = ConnectionState::Disconnected;
            pool.initialized = false;
            pool.client.take()
        };
        if let Some(client) = client {
            client.close().await.map_err(|e| {
                AdapterError::Connection(format!("Error closing SQL Server connection: {e}"))
            })?;
        }
        Ok(())
    }

    async fn query_all(
        &self,
        sql: &str,
        params: &[serde_json::Value],
    ) -> Result<Vec<Row>, AdapterError> {
        let translated = placeholder::to_named_markers(sql);
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.ensure_connected().await?;
            match self.query_once(&translated, params).await {
                Ok(rows) => return Ok(rows),
                Err(e) => self.handle_operation_failure(e, attempt).await?,
            }
        }
    }

    async fn execute(
        &self,
        sql: &str,
        params: &[serde_json::Value],
    ) -> Result<RunResult, AdapterError> {
        let translated = placeholder::to_named_markers(sql);
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.ensure_connected().await?;
            match self.execute_once(sql, &translated, params).await {
                Ok(result) => return Ok(result),
                Err(e) => self.handle_operation_failure(e, attempt).await?,
            }
        }
    }

    async fn exec_batch(&self, sql: &str) -> Result<(), AdapterError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.ensure_connected().await?;
            match self.exec_batch_once(sql).await {
                Ok(()) => return Ok(()),
                Err(e) => self.handle_operation_failure(e, attempt).await?,
            }
        }
    }

    fn metadata(&self) -> BackendInfo {
        BackendInfo::server(
            BackendKind::SqlServer,
            self.config.server.clone(),
            self.config.database.clone(),
        )
    }

    fn list_tables_statement(&self) -> String {
        "SELECT TABLE_NAME as name FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_TYPE = 'BASE TABLE' ORDER BY TABLE_NAME".to_string()
    }

    fn describe_table_statement(&self, table: &str) -> String {
        format!(
            r#"
      SELECT
        c.COLUMN_NAME as name,
        c.DATA_TYPE as type,
        CASE WHEN c.IS_NULLABLE = 'NO' THEN 1 ELSE 0 END as notnull,
        CASE WHEN pk.CONSTRAINT_TYPE = 'PRIMARY KEY' THEN 1 ELSE 0 END as pk,
        c.COLUMN_DEFAULT as dflt_value
      FROM
        INFORMATION_SCHEMA.COLUMNS c
      LEFT JOIN
        INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu ON c.TABLE_NAME = kcu.TABLE_NAME AND c.COLUMN_NAME = kcu.COLUMN_NAME
      LEFT JOIN
        INFORMATION_SCHEMA.TABLE_CONSTRAINTS pk ON kcu.CONSTRAINT_NAME = pk.CONSTRAINT_NAME AND pk.CONSTRAINT_TYPE = 'PRIMARY KEY'
      WHERE
        c.TABLE_NAME = '{table}'
      ORDER BY
        c.ORDINAL_POSITION
    "#
        )
    }
}
