//! # quarry-mcp
//!
//! MCP (Model Context Protocol) server implementation for Quarry.
//!
//! This crate exposes one database adapter as a set of typed tools over a
//! stdio JSON-RPC transport. It supports:
//!
//! - **Uniform Tool Surface**: The same ten tools regardless of engine
//! - **Confirmation Gating**: Destructive tools require an explicit flag
//! - **Result Envelopes**: Tool failures are data, not protocol errors
//! - **Schema Resources**: Per-table column listings as MCP resources
//!
//! ## Architecture
//!
//! ```text
//! AI Agent (Claude, GPT, etc.)
//!       │
//!       │ MCP protocol (list tools / call tool / read resource)
//!       ▼
//! ┌──────────────────┐
//! │ Quarry MCP Server│
//! │  1. Parse frame  │
//! │  2. Dispatch tool│
//! │  3. Validate the │
//! │     statement    │
//! │  4. Gate writes  │
//! │     on confirm   │
//! │  5. Execute via  │
//! │     the adapter  │
//! │  6. Render the   │
//! │     envelope     │
//! └────────┬─────────┘
//!          │
//!          ▼
//!   SQLite / SQL Server / PostgreSQL / MySQL
//! ```
//!
//! ## Tool Surface
//!
//! | Tool | Class | Description |
//! |------|-------|-------------|
//! | `read_query` | read | Run a SELECT and return rows |
//! | `write_query` | write | Run INSERT/UPDATE/DELETE/TRUNCATE |
//! | `create_table` | schema | Run a CREATE TABLE statement |
//! | `alter_table` | schema | Run an ALTER TABLE statement |
//! | `drop_table` | schema | Drop a table by name |
//! | `export_query` | read | Run a SELECT and render CSV or JSON |
//! | `list_tables` | schema | List user tables |
//! | `describe_table` | schema | Describe a table's columns |
//! | `append_insight` | memo | Record a business insight |
//! | `list_insights` | memo | List recorded insights |
//!
//! ## Example Usage
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use quarry_adapters::{DatabaseAdapter, create_adapter_from_tag};
//! use quarry_mcp::McpServer;
//!
//! let adapter: Arc<dyn DatabaseAdapter> =
//!     Arc::from(create_adapter_from_tag("sqlite", serde_json::json!("./my.db"))?);
//! adapter.init().await?;
//!
//! let server = McpServer::new(adapter.clone());
//! server.run_stdio().await?;
//! adapter.close().await?;
//! ```

pub mod error;
pub mod executor;
pub mod format;
pub mod protocol;
pub mod resources;
pub mod server;
pub mod tools;

// Re-export main types
pub use error::McpError;
pub use executor::ToolExecutor;
pub use protocol::{
    CallToolParams, CallToolResponse, JsonRpcRequest, JsonRpcResponse, ResourceEntry,
    ToolAnnotations, ToolContent, ToolDefinition,
};
pub use server::McpServer;
pub use tools::ToolRegistry;
