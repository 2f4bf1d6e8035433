//! Error types for the language-server transport.

use thiserror::Error;

/// Errors that can occur while talking to a language server.
#[derive(Debug, Error)]
pub enum LspError {
    /// Failed to spawn the server process.
    #[error("failed to spawn language server '{command}': {source}")]
    SpawnFailed {
        /// The command that failed to spawn.
        command: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Server executable not found.
    #[error(
        "{command} not found\n\n{install_hint}\n\nTo resolve without a language server, pass --no-lsp."
    )]
    NotFound {
        /// The command that was not found.
        command: String,
        /// Installation instructions for the missing command.
        install_hint: String,
    },

    /// I/O error on the server's pipes.
    #[error("language server communication error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to serialize a request to JSON.
    #[error("failed to serialize request: {0}")]
    Serialize(#[source] serde_json::Error),

    /// Failed to deserialize a response from JSON.
    #[error("failed to deserialize response: {0}")]
    Deserialize(#[source] serde_json::Error),

    /// Malformed message framing.
    #[error("invalid message header: {0}")]
    InvalidHeader(String),

    /// Path cannot be expressed as a `file://` URI (or vice versa).
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Server answered with a JSON-RPC error object.
    #[error("server error {code}: {message}")]
    ServerError {
        /// The JSON-RPC error code.
        code: i64,
        /// The error message from the server.
        message: String,
    },

    /// Response ID doesn't match request ID.
    #[error("response ID mismatch: expected {expected}, got {actual}")]
    IdMismatch {
        /// The expected request ID.
        expected: i64,
        /// The actual response ID received.
        actual: i64,
    },

    /// Server closed its output stream.
    #[error("language server exited unexpectedly")]
    ServerExited,

    /// Initialize handshake failed.
    #[error("initialize handshake failed: {0}")]
    InitializeFailed(String),

    /// The client is no longer usable (poisoned lock, aborted worker).
    #[error("language server client unavailable: {0}")]
    Disconnected(String),
}

/// JSON-RPC and LSP error codes the classifier cares about.
pub mod codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i64 = -32700;
    /// The JSON sent is not a valid request object.
    pub const INVALID_REQUEST: i64 = -32600;
    /// The method does not exist.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i64 = -32602;
    /// The server has not been initialized yet.
    pub const SERVER_NOT_INITIALIZED: i64 = -32002;
    /// The server cancelled the request.
    pub const SERVER_CANCELLED: i64 = -32802;
    /// Document content changed while the request ran.
    pub const CONTENT_MODIFIED: i64 = -32801;
    /// The client cancelled the request.
    pub const REQUEST_CANCELLED: i64 = -32800;
}

impl LspError {
    /// Create a "not found" error with an install hint.
    #[must_use]
    pub fn not_found(command: &str, install_hint: &str) -> Self {
        Self::NotFound {
            command: command.to_string(),
            install_hint: install_hint.to_string(),
        }
    }

    /// Create a spawn failed error.
    #[must_use]
    pub fn spawn_failed(command: &str, source: std::io::Error) -> Self {
        Self::SpawnFailed {
            command: command.to_string(),
            source,
        }
    }

    /// Create a server error from a JSON-RPC error response.
    #[must_use]
    pub fn server_error(code: i64, message: impl Into<String>) -> Self {
        Self::ServerError {
            code,
            message: message.into(),
        }
    }
}
