//! Tool dispatch and the per-tool flows.
//!
//! Every flow resolves to a tool-result envelope; adapter and validation
//! failures become `isError` envelopes with a per-tool message prefix and
//! never surface as JSON-RPC errors. Destructive tools gate on an explicit
//! `confirm` flag: a missing flag yields a pending prompt that is itself a
//! success envelope, so callers can re-issue the call rather than handle a
//! failure.

use std::sync::Arc;

use serde_json::{Value, json};

use quarry_core::{ColumnInfo, Row};
use quarry_adapters::DatabaseAdapter;

use crate::format;
use crate::protocol::CallToolResponse;

/// Memo table backing the insight tools. The dialect is the file engine's;
/// on client-server engines the statement fails and the failure surfaces
/// through the ordinary error envelope.
const INSIGHTS_DDL: &str = "CREATE TABLE IF NOT EXISTS mcp_insights (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  insight TEXT NOT NULL,
  created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
)";

const INSIGHTS_PROBE: &str =
    "SELECT name FROM sqlite_master WHERE type='table' AND name = 'mcp_insights'";

/// Executes tool calls against one adapter.
pub struct ToolExecutor {
    adapter: Arc<dyn DatabaseAdapter>,
}

impl ToolExecutor {
    pub fn new(adapter: Arc<dyn DatabaseAdapter>) -> Self {
        Self { adapter }
    }

    /// Dispatch one tool call. Unknown tool names are reported inside the
    /// envelope, not as a protocol-level failure.
    pub async fn execute(&self, name: &str, args: &Value) -> CallToolResponse {
        match name {
            "read_query" => wrap(self.read_query(args).await, "SQL Error"),
            "write_query" => wrap(self.write_query(args).await, "SQL Error"),
            "create_table" => wrap(self.create_table(args).await, "SQL Error"),
            "alter_table" => wrap(self.alter_table(args).await, "SQL Error"),
            "drop_table" => wrap(self.drop_table(args).await, "Error dropping table"),
            "export_query" => match self.export_query(args).await {
                Ok(response) => response,
                Err(message) => format::error_response(format!("Export Error: {message}")),
            },
            "list_tables" => wrap(self.list_tables().await, "Error listing tables"),
            "describe_table" => wrap(self.describe_table(args).await, "Error describing table"),
            "append_insight" => wrap(self.append_insight(args).await, "Error appending insight"),
            "list_insights" => wrap(self.list_insights().await, "Error listing insights"),
            other => format::error_response(format!("Unknown tool: {other}")),
        }
    }

    async fn read_query(&self, args: &Value) -> Result<Value, String> {
        let query = str_arg(args, "query").ok_or("Query is required")?;
        if !is_select(query) {
            return Err("Only SELECT queries are allowed with read_query".into());
        }
        let rows = self.run_query(query).await?;
        Ok(serde_json::to_value(rows).unwrap_or_default())
    }

    async fn write_query(&self, args: &Value) -> Result<Value, String> {
        let query = str_arg(args, "query").ok_or("Query is required")?;
        if is_select(query) {
            return Err("Use read_query for SELECT operations".into());
        }
        if !is_write(query) {
            return Err(
                "Only INSERT, UPDATE, DELETE, or TRUNCATE operations are allowed with write_query"
                    .into(),
            );
        }
        if !confirmed(args) {
            return Ok(confirmation_prompt("this write operation"));
        }
        let result = self
            .adapter
            .execute(query, &[])
            .await
            .map_err(|e| e.to_string())?;
        Ok(json!({ "affected_rows": result.changes }))
    }

    async fn create_table(&self, args: &Value) -> Result<Value, String> {
        let query = str_arg(args, "query").ok_or("Query is required")?;
        if !is_create_table(query) {
            return Err("Only CREATE TABLE statements are allowed".into());
        }
        if !confirmed(args) {
            return Ok(confirmation_prompt("creating the table"));
        }
        self.adapter
            .exec_batch(query)
            .await
            .map_err(|e| e.to_string())?;
        Ok(json!({ "success": true, "message": "Table created successfully" }))
    }

    async fn alter_table(&self, args: &Value) -> Result<Value, String> {
        let query = str_arg(args, "query").ok_or("Query is required")?;
        if !is_alter_table(query) {
            return Err("Only ALTER TABLE statements are allowed".into());
        }
        if !confirmed(args) {
            return Ok(confirmation_prompt("altering the table"));
        }
        self.adapter
            .exec_batch(query)
            .await
            .map_err(|e| e.to_string())?;
        Ok(json!({ "success": true, "message": "Table altered successfully" }))
    }

    async fn drop_table(&self, args: &Value) -> Result<Value, String> {
        let table = str_arg(args, "table_name").ok_or("Table name is required")?;
        if !self.table_exists(table).await? {
            return Err(format!("Table '{table}' does not exist"));
        }
        if !confirmed(args) {
            return Ok(confirmation_prompt("dropping the table"));
        }
        self.adapter
            .exec_batch(&format!("DROP TABLE \"{table}\""))
            .await
            .map_err(|e| e.to_string())?;
        Ok(json!({
            "success": true,
            "message": format!("Table '{table}' dropped successfully"),
        }))
    }

    async fn export_query(&self, args: &Value) -> Result<CallToolResponse, String> {
        let query = str_arg(args, "query").ok_or("Query is required")?;
        if !is_select(query) {
            return Err("Only SELECT queries are allowed with export_query".into());
        }
        let fmt = args
            .get("format")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_lowercase();
        if fmt != "csv" && fmt != "json" {
            return Err("Unsupported export format. Use 'csv' or 'json'".into());
        }
        let rows = self.run_query(query).await?;
        if fmt == "csv" {
            Ok(format::text_response(format::rows_to_csv(&rows)))
        } else {
            Ok(format::success_response(
                &serde_json::to_value(rows).unwrap_or_default(),
            ))
        }
    }

    async fn list_tables(&self) -> Result<Value, String> {
        let rows = self.run_query(&self.adapter.list_tables_statement()).await?;
        let names: Vec<Value> = rows
            .iter()
            .filter_map(|row| row.get("name"))
            .cloned()
            .collect();
        Ok(Value::Array(names))
    }

    async fn describe_table(&self, args: &Value) -> Result<Value, String> {
        let table = str_arg(args, "table_name").ok_or("Table name is required")?;
        if !self.table_exists(table).await? {
            return Err(format!("Table '{table}' does not exist"));
        }
        let rows = self
            .run_query(&self.adapter.describe_table_statement(table))
            .await?;
        let columns: Vec<ColumnInfo> = rows.iter().map(column_from_row).collect();
        Ok(serde_json::to_value(columns).unwrap_or_default())
    }

    async fn append_insight(&self, args: &Value) -> Result<Value, String> {
        let insight = str_arg(args, "insight").ok_or("Insight text is required")?;
        self.adapter
            .exec_batch(INSIGHTS_DDL)
            .await
            .map_err(|e| e.to_string())?;
        self.adapter
            .execute(
                "INSERT INTO mcp_insights (insight) VALUES (?)",
                &[json!(insight)],
            )
            .await
            .map_err(|e| e.to_string())?;
        Ok(json!({ "success": true, "message": "Insight added" }))
    }

    async fn list_insights(&self) -> Result<Value, String> {
        // First call on a fresh database creates the memo table and reports
        // an empty memo instead of a missing-table error.
        let probe = self.run_query(INSIGHTS_PROBE).await?;
        if probe.is_empty() {
            self.adapter
                .exec_batch(INSIGHTS_DDL)
                .await
                .map_err(|e| e.to_string())?;
            return Ok(json!([]));
        }
        let rows = self
            .run_query("SELECT * FROM mcp_insights ORDER BY created_at DESC")
            .await?;
        Ok(serde_json::to_value(rows).unwrap_or_default())
    }

    async fn run_query(&self, sql: &str) -> Result<Vec<Row>, String> {
        self.adapter
            .query_all(sql, &[])
            .await
            .map_err(|e| e.to_string())
    }

    async fn table_exists(&self, table: &str) -> Result<bool, String> {
        let rows = self.run_query(&self.adapter.list_tables_statement()).await?;
        Ok(rows
            .iter()
            .any(|row| row.get("name").and_then(Value::as_str) == Some(table)))
    }
}

fn wrap(outcome: Result<Value, String>, prefix: &str) -> CallToolResponse {
    match outcome {
        Ok(payload) => format::success_response(&payload),
        Err(message) => format::error_response(format!("{prefix}: {message}")),
    }
}

/// SELECT detector shared by the read and export paths.
pub(crate) fn is_select(sql: &str) -> bool {
    sql.trim().to_lowercase().starts_with("select")
}

/// Mutation detector for the write path. DDL is deliberately excluded; the
/// schema tools own those statement classes.
pub(crate) fn is_write(sql: &str) -> bool {
    let sql = sql.trim().to_lowercase();
    ["insert", "update", "delete", "truncate"]
        .iter()
        .any(|kw| sql.starts_with(kw))
}

pub(crate) fn is_create_table(sql: &str) -> bool {
    sql.trim().to_lowercase().starts_with("create table")
}

pub(crate) fn is_alter_table(sql: &str) -> bool {
    sql.trim().to_lowercase().starts_with("alter table")
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn confirmed(args: &Value) -> bool {
    truthy(args.get("confirm"))
}

/// Loose truthiness for the confirmation flag: boolean true, any nonzero
/// number, or a nonempty string other than "0".
fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
        Some(Value::String(s)) => !s.is_empty() && s != "0",
        _ => false,
    }
}

fn confirmation_prompt(action: &str) -> Value {
    json!({
        "success": false,
        "message": format!(
            "Safety confirmation required. Set confirm=true to proceed with {action}."
        ),
    })
}

fn column_from_row(row: &Row) -> ColumnInfo {
    ColumnInfo {
        name: row
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        column_type: row
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        notnull: truthy(row.get("notnull")),
        default_value: text_or_none(row.get("dflt_value")),
        primary_key: truthy(row.get("pk")),
        comment: row
            .get("comment")
            .and_then(Value::as_str)
            .map(str::to_string)
            .filter(|c| !c.is_empty()),
    }
}

fn text_or_none(value: Option<&Value>) -> Option<String> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}
