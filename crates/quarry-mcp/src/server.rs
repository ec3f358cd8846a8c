//! MCP server implementation.
//!
//! This module provides the stdio JSON-RPC server that exposes the database
//! tools and schema resources over a single adapter.

use std::io::{BufRead, Write};
use std::sync::Arc;

use serde_json::{Value, json};

use quarry_adapters::DatabaseAdapter;

use crate::error::McpError;
use crate::executor::ToolExecutor;
use crate::protocol::*;
use crate::resources;
use crate::tools::ToolRegistry;

/// The MCP server.
pub struct McpServer {
    adapter: Arc<dyn DatabaseAdapter>,
    executor: ToolExecutor,
    tools: ToolRegistry,
}

impl McpServer {
    /// Create a server over an initialized adapter. The caller keeps its own
    /// handle for closing the connection on shutdown.
    pub fn new(adapter: Arc<dyn DatabaseAdapter>) -> Self {
        Self {
            executor: ToolExecutor::new(adapter.clone()),
            tools: ToolRegistry::builtin(),
            adapter,
        }
    }

    /// Run the server over stdio until stdin closes or `shutdown` arrives.
    ///
    /// Malformed frames get a parse-error response and the loop keeps
    /// serving; only transport failures end the session early.
    pub async fn run_stdio(&self) -> Result<(), McpError> {
        tracing::info!("Starting MCP server with stdio transport");

        let stdin = std::io::stdin();
        let stdout = std::io::stdout();
        let mut stdout_lock = stdout.lock();

        for line in stdin.lock().lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let request = match parse_frame(&line) {
                Ok(request) => request,
                Err(response) => {
                    let response_json = serde_json::to_string(&response)?;
                    writeln!(stdout_lock, "{}", response_json)?;
                    stdout_lock.flush()?;
                    continue;
                }
            };

            let shutting_down = request.method == "shutdown";
            if let Some(response) = self.handle_request(request).await {
                let response_json = serde_json::to_string(&response)?;
                writeln!(stdout_lock, "{}", response_json)?;
                stdout_lock.flush()?;
            }
            if shutting_down {
                break;
            }
        }

        Ok(())
    }

    /// Handle a JSON-RPC request. Notifications (requests without an id)
    /// yield `None`; everything else yields exactly one response.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let is_notification = request.id.is_none();
        let id = request.id.clone();

        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(id),
            "initialized" => JsonRpcResponse::success(id, json!({})),
            "notifications/initialized" => return None,
            "tools/list" => self.handle_list_tools(id),
            "tools/call" => self.handle_call_tool(id, request.params).await,
            "resources/list" => self.handle_list_resources(id).await,
            "resources/read" => self.handle_read_resource(id, request.params).await,
            "shutdown" => self.handle_shutdown(id),
            _ => JsonRpcResponse::error(
                id,
                -32601,
                format!("Method not found: {}", request.method),
            ),
        };

        if is_notification { None } else { Some(response) }
    }

    fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        let result = json!({
            "protocolVersion": "2024-11-05",
            "serverInfo": {
                "name": "quarry",
                "version": env!("CARGO_PKG_VERSION")
            },
            "capabilities": {
                "tools": {},
                "resources": {}
            }
        });
        JsonRpcResponse::success(id, result)
    }

    fn handle_list_tools(&self, id: Option<Value>) -> JsonRpcResponse {
        JsonRpcResponse::success(id, json!({ "tools": self.tools.list() }))
    }

    async fn handle_call_tool(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let params: CallToolParams = match params {
            Some(p) => match serde_json::from_value(p) {
                Ok(params) => params,
                Err(e) => {
                    return JsonRpcResponse::error(id, -32602, format!("Invalid params: {}", e));
                }
            },
            None => return JsonRpcResponse::error(id, -32602, "Missing params"),
        };

        // Tool-level failures, unknown names included, ride inside the
        // envelope so callers always get a result for a well-formed call.
        let response = self.executor.execute(&params.name, &params.arguments).await;
        JsonRpcResponse::success(id, serde_json::to_value(response).unwrap_or_default())
    }

    async fn handle_list_resources(&self, id: Option<Value>) -> JsonRpcResponse {
        match resources::list_resources(self.adapter.as_ref()).await {
            Ok(entries) => JsonRpcResponse::success(id, json!({ "resources": entries })),
            Err(message) => JsonRpcResponse::error(
                id,
                -32603,
                format!("Error listing resources: {message}"),
            ),
        }
    }

    async fn handle_read_resource(
        &self,
        id: Option<Value>,
        params: Option<Value>,
    ) -> JsonRpcResponse {
        let uri = params
            .as_ref()
            .and_then(|p| p.get("uri"))
            .and_then(|v| v.as_str());
        let Some(uri) = uri else {
            return JsonRpcResponse::error(id, -32602, "Missing uri");
        };

        match resources::read_resource(self.adapter.as_ref(), uri).await {
            Ok(contents) => JsonRpcResponse::success(id, contents),
            Err(message) => JsonRpcResponse::error(
                id,
                -32603,
                format!("Error reading resource: {message}"),
            ),
        }
    }

    fn handle_shutdown(&self, id: Option<Value>) -> JsonRpcResponse {
        tracing::info!("MCP server shutdown requested");
        JsonRpcResponse::success(id, json!(null))
    }
}

fn parse_frame(line: &str) -> Result<JsonRpcRequest, JsonRpcResponse> {
    serde_json::from_str(line)
        .map_err(|e| JsonRpcResponse::error(None, -32700, format!("Parse error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_adapters::SqliteAdapter;
    use quarry_core::config::SqliteConfig;

    async fn sqlite_server(dir: &tempfile::TempDir) -> McpServer {
        let path = dir.path().join("mcp.db").to_string_lossy().into_owned();
        let adapter = SqliteAdapter::new(SqliteConfig { path });
        adapter.init().await.expect("sqlite init");
        McpServer::new(Arc::new(adapter))
    }

    fn request(method: &str, id: Option<Value>, params: Option<Value>) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }

    #[tokio::test]
    async fn initialize_reports_identity_and_capabilities() {
        let dir = tempfile::tempdir().unwrap();
        let server = sqlite_server(&dir).await;

        let response = server
            .handle_request(request("initialize", Some(json!(1)), None))
            .await
            .unwrap();
        assert!(response.error.is_none());
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], json!("2024-11-05"));
        assert_eq!(result["serverInfo"]["name"], json!("quarry"));
        assert!(result["capabilities"]["tools"].is_object());
        assert!(result["capabilities"]["resources"].is_object());
    }

    #[tokio::test]
    async fn notifications_are_not_answered() {
        let dir = tempfile::tempdir().unwrap();
        let server = sqlite_server(&dir).await;

        let response = server
            .handle_request(request("notifications/initialized", None, None))
            .await;
        assert!(response.is_none());

        // Any id-less request is a notification, whatever the method.
        let response = server
            .handle_request(request("tools/list", None, None))
            .await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn tools_list_exposes_the_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let server = sqlite_server(&dir).await;

        let response = server
            .handle_request(request("tools/list", Some(json!(2)), None))
            .await
            .unwrap();
        let tools = response.result.unwrap()["tools"].as_array().unwrap().len();
        assert_eq!(tools, 10);
    }

    #[tokio::test]
    async fn call_tool_validates_params() {
        let dir = tempfile::tempdir().unwrap();
        let server = sqlite_server(&dir).await;

        let response = server
            .handle_request(request("tools/call", Some(json!(3)), None))
            .await
            .unwrap();
        let error = response.error.unwrap();
        assert_eq!(error.code, -32602);
        assert_eq!(error.message, "Missing params");

        let response = server
            .handle_request(request(
                "tools/call",
                Some(json!(4)),
                Some(json!({"arguments": {}})),
            ))
            .await
            .unwrap();
        let error = response.error.unwrap();
        assert_eq!(error.code, -32602);
        assert!(error.message.starts_with("Invalid params:"));
    }

    #[tokio::test]
    async fn unknown_tools_stay_inside_the_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let server = sqlite_server(&dir).await;

        let response = server
            .handle_request(request(
                "tools/call",
                Some(json!(5)),
                Some(json!({"name": "nonexistent", "arguments": {}})),
            ))
            .await
            .unwrap();
        assert!(response.error.is_none());
        let result = response.result.unwrap();
        assert_eq!(result["isError"], json!(true));
        assert!(
            result["content"][0]["text"]
                .as_str()
                .unwrap()
                .contains("Unknown tool: nonexistent")
        );
    }

    #[tokio::test]
    async fn tool_calls_round_trip_through_the_protocol() {
        let dir = tempfile::tempdir().unwrap();
        let server = sqlite_server(&dir).await;

        let response = server
            .handle_request(request(
                "tools/call",
                Some(json!(6)),
                Some(json!({
                    "name": "create_table",
                    "arguments": {
                        "query": "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT)",
                        "confirm": true,
                    },
                })),
            ))
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["isError"], json!(false));

        let response = server
            .handle_request(request(
                "tools/call",
                Some(json!(7)),
                Some(json!({"name": "list_tables", "arguments": {}})),
            ))
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert!(
            result["content"][0]["text"]
                .as_str()
                .unwrap()
                .contains("notes")
        );
    }

    #[tokio::test]
    async fn resources_list_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let server = sqlite_server(&dir).await;
        server
            .handle_request(request(
                "tools/call",
                Some(json!(8)),
                Some(json!({
                    "name": "create_table",
                    "arguments": {"query": "CREATE TABLE users (id INTEGER)", "confirm": true},
                })),
            ))
            .await;

        let response = server
            .handle_request(request("resources/list", Some(json!(9)), None))
            .await
            .unwrap();
        let resources = response.result.unwrap()["resources"].clone();
        assert_eq!(resources.as_array().unwrap().len(), 1);
        let uri = resources[0]["uri"].as_str().unwrap().to_string();
        assert!(uri.ends_with("/users/schema"));

        let response = server
            .handle_request(request(
                "resources/read",
                Some(json!(10)),
                Some(json!({"uri": uri})),
            ))
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["contents"][0]["mimeType"], json!("application/json"));

        let response = server
            .handle_request(request("resources/read", Some(json!(11)), Some(json!({}))))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().message, "Missing uri");
    }

    #[tokio::test]
    async fn unknown_methods_fail_with_method_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let server = sqlite_server(&dir).await;

        let response = server
            .handle_request(request("prompts/list", Some(json!(12)), None))
            .await
            .unwrap();
        let error = response.error.unwrap();
        assert_eq!(error.code, -32601);
        assert_eq!(error.message, "Method not found: prompts/list");
    }

    #[tokio::test]
    async fn shutdown_acknowledges() {
        let dir = tempfile::tempdir().unwrap();
        let server = sqlite_server(&dir).await;

        let response = server
            .handle_request(request("shutdown", Some(json!(13)), None))
            .await
            .unwrap();
        assert!(response.error.is_none());
        assert_eq!(response.result, Some(json!(null)));
    }

    #[test]
    fn malformed_frames_get_a_parse_error() {
        let response = parse_frame("{not json").unwrap_err();
        assert!(response.id.is_none());
        let error = response.error.unwrap();
        assert_eq!(error.code, -32700);
        assert!(error.message.starts_with("Parse error:"));
    }
}
