//! Error types for the MCP crate.

use thiserror::Error;

/// Errors that can occur in the MCP server.
///
/// Tool failures never appear here: the dispatcher converts them to the
/// response envelope. These variants cover the transport itself.
#[derive(Debug, Error)]
pub enum McpError {
    /// Failed to start the server.
    #[error("failed to start MCP server: {0}")]
    StartupFailed(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
