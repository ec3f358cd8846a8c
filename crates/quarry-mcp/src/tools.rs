//! Static tool catalog.
//!
//! The tool set never changes at runtime; the registry exists so the server
//! can list definitions and tests can assert their shape. Listing order is
//! the declaration order below.

use serde_json::json;

use crate::protocol::{ToolAnnotations, ToolDefinition};

/// Registry of the built-in tools.
pub struct ToolRegistry {
    tools: Vec<ToolDefinition>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ToolRegistry {
    /// The complete catalog: three query tools, five schema tools, two
    /// insight tools.
    pub fn builtin() -> Self {
        Self {
            tools: builtin_tools(),
        }
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Check if a tool exists.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// List all tools in catalog order.
    pub fn list(&self) -> &[ToolDefinition] {
        &self.tools
    }

    /// Get the number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Get tool names in catalog order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }
}

fn query_only_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "query": {"type": "string"},
        },
        "required": ["query"],
    })
}

fn confirmable_query_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "query": {"type": "string"},
            "confirm": {"type": "boolean"},
        },
        "required": ["query"],
    })
}

fn status_output_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "success": {"type": "boolean"},
            "message": {"type": "string"},
        },
    })
}

fn builtin_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "read_query".into(),
            description: Some("Execute a SELECT query to read data from the database".into()),
            input_schema: query_only_schema(),
            output_schema: Some(json!({"type": "array", "items": {"type": "object"}})),
            annotations: Some(ToolAnnotations::read_only()),
        },
        ToolDefinition {
            name: "write_query".into(),
            description: Some("Execute an INSERT, UPDATE, DELETE or TRUNCATE query".into()),
            input_schema: confirmable_query_schema(),
            output_schema: Some(json!({
                "type": "object",
                "properties": {"affected_rows": {"type": "integer"}},
            })),
            annotations: Some(ToolAnnotations::destructive()),
        },
        ToolDefinition {
            name: "create_table".into(),
            description: Some("Create a new table in the database".into()),
            input_schema: confirmable_query_schema(),
            output_schema: Some(status_output_schema()),
            annotations: Some(ToolAnnotations::destructive()),
        },
        ToolDefinition {
            name: "alter_table".into(),
            description: Some(
                "Modify an existing table structure (add columns, rename tables, ...)".into(),
            ),
            input_schema: confirmable_query_schema(),
            output_schema: Some(status_output_schema()),
            annotations: Some(ToolAnnotations::destructive()),
        },
        ToolDefinition {
            name: "drop_table".into(),
            description: Some("Remove a table from the database (requires confirmation)".into()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "table_name": {"type": "string"},
                    "confirm": {"type": "boolean"},
                },
                "required": ["table_name", "confirm"],
            }),
            output_schema: Some(status_output_schema()),
            annotations: Some(ToolAnnotations::destructive()),
        },
        ToolDefinition {
            name: "export_query".into(),
            description: Some("Export query results in CSV or JSON format".into()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "format": {"type": "string", "enum": ["csv", "json"]},
                },
                "required": ["query", "format"],
            }),
            output_schema: Some(json!({"type": "string"})),
            annotations: Some(ToolAnnotations::read_only()),
        },
        ToolDefinition {
            name: "list_tables".into(),
            description: Some("Get a list of all tables in the database".into()),
            input_schema: json!({"type": "object", "properties": {}}),
            output_schema: Some(json!({"type": "array", "items": {"type": "string"}})),
            annotations: Some(ToolAnnotations::read_only()),
        },
        ToolDefinition {
            name: "describe_table".into(),
            description: Some("View the structure of a specific table".into()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "table_name": {"type": "string"},
                },
                "required": ["table_name"],
            }),
            output_schema: Some(json!({
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "type": {"type": "string"},
                        "notnull": {"type": "boolean"},
                        "default_value": {"type": ["string", "null"]},
                        "primary_key": {"type": "boolean"},
                        "comment": {"type": ["string", "null"]},
                    },
                },
            })),
            annotations: Some(ToolAnnotations::read_only()),
        },
        ToolDefinition {
            name: "append_insight".into(),
            description: Some("Add a business insight to the memo".into()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "insight": {"type": "string"},
                    "confirm": {"type": "boolean"},
                },
                "required": ["insight"],
            }),
            output_schema: Some(status_output_schema()),
            annotations: None,
        },
        ToolDefinition {
            name: "list_insights".into(),
            description: Some("List all business insights in the memo".into()),
            input_schema: json!({"type": "object", "properties": {}}),
            output_schema: Some(json!({"type": "array", "items": {"type": "object"}})),
            annotations: Some(ToolAnnotations::read_only()),
        },
    ]
}
