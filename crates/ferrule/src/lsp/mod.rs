//! Language-server backed Lookup Service.
//!
//! A thin JSON-RPC transport for stdio language servers such as
//! rust-analyzer, plus [`LspLookupService`], which adapts it to the
//! [`LookupService`](crate::LookupService) seam.
//!
//! ## Usage
//!
//! ```no_run
//! use ferrule::lsp::{LspLookupService, RustAnalyzerProvider};
//! use std::path::Path;
//!
//! let service = LspLookupService::start(&RustAnalyzerProvider::default(), Path::new("."))?;
//! // hand `service` to `Project::with_lookup_service`
//! service.shutdown()?;
//! # Ok::<(), ferrule::lsp::LspError>(())
//! ```
//!
//! ## Design Notes
//!
//! - Uses `lsp-types` for all protocol types
//! - JSON-RPC format: `Content-Length: N\r\n\r\n{json}`
//! - The client offers UTF-8 positions and falls back to UTF-16 if the
//!   server declines; columns are converted both ways against the source text
//! - Edited sources are resent with `didChange` (full text, next version)
//! - One worker thread owns the client; a request that outlives the stall
//!   limit makes further lookups fail fast until it returns

mod error;
mod provider;
mod service;
mod transport;

pub use error::{LspError, codes};
pub use provider::{LspProvider, RustAnalyzerProvider};
pub use service::LspLookupService;
pub use transport::{
    JsonRpcChannel, LspClient, OpenDocuments, PositionEncoding, path_to_uri, uri_to_path,
};

/// Result type for language-server operations.
pub type Result<T> = std::result::Result<T, LspError>;
