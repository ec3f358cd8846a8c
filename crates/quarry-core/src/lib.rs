use serde::{Deserialize, Serialize};

// Configuration types shared across all quarry crates
pub mod config;
pub mod error;

// Re-export the types every other crate reaches for
pub use config::{
    AdapterConfig, BackendKind, MysqlConfig, PostgresConfig, SqlServerConfig, SqliteConfig,
};
pub use error::AdapterError;

/// A single result row: column name to JSON value, in driver column order.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Normalized outcome of a mutating statement.
///
/// `last_insert_id` defaults to 0 for statement kinds where the engine does
/// not report an identity value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunResult {
    pub changes: u64,
    pub last_insert_id: i64,
}

/// One column of a described table, normalized across engines.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    pub notnull: bool,
    pub default_value: Option<String>,
    pub primary_key: bool,
    pub comment: Option<String>,
}

/// Engine identity and location, as reported by an adapter.
///
/// The file engine fills `path`; client-server engines fill `server` and
/// `database`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: BackendKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

impl BackendInfo {
    pub fn file(kind: BackendKind, path: impl Into<String>) -> Self {
        Self {
            name: kind.display_name().to_string(),
            kind,
            path: Some(path.into()),
            server: None,
            database: None,
        }
    }

    pub fn server(
        kind: BackendKind,
        server: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            name: kind.display_name().to_string(),
            kind,
            path: None,
            server: Some(server.into()),
            database: Some(database.into()),
        }
    }
}
