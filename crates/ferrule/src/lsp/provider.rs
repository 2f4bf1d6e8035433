//! Language server launch configuration.

use serde_json::Value;

/// How to spawn and configure a language server.
///
/// # Example
///
/// ```rust
/// use ferrule::lsp::LspProvider;
///
/// struct Wrapped;
///
/// impl LspProvider for Wrapped {
///     fn command(&self) -> &str { "ra-multiplex" }
///     fn args(&self) -> Vec<&str> { vec!["client"] }
/// }
/// ```
pub trait LspProvider: Send + Sync {
    /// The command to spawn.
    fn command(&self) -> &str;

    /// Additional command-line arguments.
    fn args(&self) -> Vec<&str> {
        vec![]
    }

    /// Value for `initializationOptions` in the initialize request.
    fn initialize_options(&self) -> Option<Value> {
        None
    }

    /// Language identifier sent with `textDocument/didOpen`.
    fn language_id(&self) -> &str {
        "rust"
    }

    /// Installation hint shown when the server is not found.
    fn install_hint(&self) -> &str {
        "Please install the language server and ensure it's in your PATH."
    }
}

/// rust-analyzer, installed via `rustup component add rust-analyzer`.
#[derive(Debug, Clone, Default)]
pub struct RustAnalyzerProvider {
    command: Option<String>,
}

impl RustAnalyzerProvider {
    /// Use a specific executable instead of `rust-analyzer` on `PATH`.
    #[must_use]
    pub fn with_command(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
        }
    }
}

impl LspProvider for RustAnalyzerProvider {
    fn command(&self) -> &str {
        self.command.as_deref().unwrap_or("rust-analyzer")
    }

    fn initialize_options(&self) -> Option<Value> {
        // Proc-macro expansion and build scripts make the first query very
        // slow on large workspaces and do not change reference answers.
        Some(serde_json::json!({
            "cargo": { "buildScripts": { "enable": false } },
            "procMacro": { "enable": false },
        }))
    }

    fn install_hint(&self) -> &str {
        "Install rust-analyzer: rustup component add rust-analyzer"
    }
}
