//! Error types for Ferrule operations.
//!
//! Errors are split into two families:
//!
//! - **`Error`**: hard, caller-visible failures (bad configuration, I/O while
//!   loading sources, a batch with nothing to resolve).
//! - **`ReferenceError`**: a classified Lookup Service failure. These are
//!   produced by the classifier, absorbed by the retry loop while they are
//!   transient, and only surfaced when the budget is spent and fallback is
//!   off or not applicable.
//!
//! ## Error Categorization
//!
//! `ReferenceErrorKind` uses a 4xx/5xx style split:
//! - Input problems (the request was wrong): missing file, malformed request
//! - Service problems (the backend misbehaved): unavailable, timeout

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::syntax::SymbolNode;

/// Result type for Ferrule operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for Ferrule operations.
#[derive(Debug, Error)]
pub enum Error {
    /// File system operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Tree-sitter parsing infrastructure failed
    #[error("parser error: {0}")]
    Parser(String),

    /// Invalid configuration or arguments
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed
    #[error("failed to parse configuration: {0}")]
    ConfigFormat(#[from] serde_yaml::Error),

    /// A batch was submitted but none of its targets could be attempted
    #[error("no resolvable targets: {0}")]
    NoResolvableTargets(String),

    /// The language server backing the Lookup Service could not be started
    #[error(transparent)]
    Lsp(#[from] crate::lsp::LspError),

    /// A lookup failed terminally and no fallback applied
    #[error(transparent)]
    Lookup(#[from] ReferenceError),
}

/// Classified failure of a Lookup Service call.
///
/// Carries enough context (file, line, retry count, timestamp) to be logged
/// or shown to a user directly.
#[derive(Debug, Clone, Serialize)]
pub struct ReferenceError {
    /// Category of the failure
    pub kind: ReferenceErrorKind,
    /// Human-readable error message
    pub message: String,
    /// Whether the retry loop may try again
    pub retryable: bool,
    /// Number of retries performed before this error became terminal
    pub retry_count: u32,
    /// When the error was classified
    pub timestamp: DateTime<Utc>,
    /// Where the failing lookup originated
    pub context: ErrorContext,
}

/// Source position that triggered a lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorContext {
    /// File containing the queried symbol
    pub path: Option<PathBuf>,
    /// 1-indexed line of the queried symbol
    pub line: Option<u32>,
    /// Literal text of the queried symbol
    pub symbol: Option<String>,
}

impl ErrorContext {
    /// Capture the context of a symbol occurrence.
    #[must_use]
    pub fn from_node(node: &SymbolNode) -> Self {
        Self {
            path: Some(node.path().to_path_buf()),
            line: Some(node.line()),
            symbol: Some(node.text().to_string()),
        }
    }
}

/// Categorization of Lookup Service failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceErrorKind {
    // === Service problems (analogous to HTTP 5xx) ===
    /// The service could not be reached or exited
    ServiceUnavailable,

    /// The service did not answer within the per-call timeout
    ServiceTimeout,

    // === Input problems (analogous to HTTP 4xx) ===
    /// The queried file does not exist
    FileNotFound,

    /// The service rejected the request as invalid
    MalformedRequest,

    // === Control flow ===
    /// The lookup was cancelled or its deadline passed
    Cancelled,

    /// Anything the classifier could not place
    Unknown,
}

impl ReferenceErrorKind {
    /// Returns `true` if failures of this kind are expected to be transient.
    ///
    /// This is the retryability table; it depends on nothing but the kind.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::ServiceUnavailable | Self::ServiceTimeout)
    }

    /// Returns `true` if this is an input problem (4xx-style).
    #[must_use]
    pub fn is_input_error(self) -> bool {
        matches!(self, Self::FileNotFound | Self::MalformedRequest)
    }

    /// Returns `true` if this is a service problem (5xx-style).
    #[must_use]
    pub fn is_service_error(self) -> bool {
        matches!(self, Self::ServiceUnavailable | Self::ServiceTimeout)
    }

    /// Stable name used in logs and serialized output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ServiceUnavailable => "service unavailable",
            Self::ServiceTimeout => "service timeout",
            Self::FileNotFound => "file not found",
            Self::MalformedRequest => "malformed request",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ReferenceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ReferenceError {
    /// Create a classified error.
    ///
    /// `retries_enabled = false` forces `retryable` off regardless of kind.
    #[must_use]
    pub fn new(
        kind: ReferenceErrorKind,
        message: impl Into<String>,
        context: ErrorContext,
        retries_enabled: bool,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: retries_enabled && kind.is_retryable(),
            retry_count: 0,
            timestamp: Utc::now(),
            context,
        }
    }

    /// Create the error returned when a lookup is cancelled mid-flight.
    #[must_use]
    pub fn cancelled(context: ErrorContext, retry_count: u32) -> Self {
        Self::new(
            ReferenceErrorKind::Cancelled,
            "lookup cancelled before completion",
            context,
            false,
        )
        .with_retry_count(retry_count)
    }

    /// Create the error returned when no Lookup Service is attached.
    #[must_use]
    pub fn no_service(context: ErrorContext) -> Self {
        Self::new(
            ReferenceErrorKind::ServiceUnavailable,
            "no lookup service configured",
            context,
            false,
        )
    }

    /// Set the cumulative retry count.
    #[must_use]
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Whether the fallback resolver should be tried instead of surfacing
    /// this error.
    ///
    /// Only service-side trouble triggers fallback. A missing file or a bad
    /// request would fail the same way without the service.
    #[must_use]
    pub fn should_use_fallback(&self) -> bool {
        match self.kind {
            ReferenceErrorKind::ServiceUnavailable
            | ReferenceErrorKind::ServiceTimeout
            | ReferenceErrorKind::Cancelled => true,
            ReferenceErrorKind::FileNotFound
            | ReferenceErrorKind::MalformedRequest
            | ReferenceErrorKind::Unknown => false,
        }
    }
}

impl fmt::Display for ReferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)?;

        if let Some(path) = &self.context.path {
            write!(f, " at {}", path.display())?;
            if let Some(line) = self.context.line {
                write!(f, ":{line}")?;
            }
        }

        if let Some(symbol) = &self.context.symbol {
            write!(f, " (symbol `{symbol}`)")?;
        }

        if self.retry_count > 0 {
            write!(f, " after {} retries", self.retry_count)?;
        }

        Ok(())
    }
}

impl std::error::Error for ReferenceError {}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn context() -> ErrorContext {
        ErrorContext {
            path: Some(PathBuf::from("src/auth.rs")),
            line: Some(12),
            symbol: Some("authenticate".to_string()),
        }
    }

    #[rstest]
    #[case::unavailable(ReferenceErrorKind::ServiceUnavailable, true)]
    #[case::timeout(ReferenceErrorKind::ServiceTimeout, true)]
    #[case::file_not_found(ReferenceErrorKind::FileNotFound, false)]
    #[case::malformed(ReferenceErrorKind::MalformedRequest, false)]
    #[case::cancelled(ReferenceErrorKind::Cancelled, false)]
    #[case::unknown(ReferenceErrorKind::Unknown, false)]
    fn retryability_is_fixed_by_kind(#[case] kind: ReferenceErrorKind, #[case] expected: bool) {
        assert_eq!(kind.is_retryable(), expected);
        assert_eq!(
            ReferenceError::new(kind, "boom", context(), true).retryable,
            expected
        );
    }

    #[test]
    fn disabled_retries_clear_retryable_flag() {
        let error = ReferenceError::new(
            ReferenceErrorKind::ServiceTimeout,
            "slow",
            context(),
            false,
        );
        assert!(!error.retryable);
    }

    #[test]
    fn kind_categorization() {
        assert!(ReferenceErrorKind::FileNotFound.is_input_error());
        assert!(ReferenceErrorKind::MalformedRequest.is_input_error());
        assert!(!ReferenceErrorKind::FileNotFound.is_service_error());

        assert!(ReferenceErrorKind::ServiceTimeout.is_service_error());
        assert!(ReferenceErrorKind::ServiceUnavailable.is_service_error());
        assert!(!ReferenceErrorKind::ServiceTimeout.is_input_error());

        assert!(!ReferenceErrorKind::Unknown.is_input_error());
        assert!(!ReferenceErrorKind::Unknown.is_service_error());
    }

    #[test]
    fn display_includes_kind_location_and_retries() {
        let error = ReferenceError::new(
            ReferenceErrorKind::ServiceTimeout,
            "references request timed out",
            context(),
            true,
        )
        .with_retry_count(3);

        let display = error.to_string();
        assert!(display.contains("[service timeout]"));
        assert!(display.contains("src/auth.rs:12"));
        assert!(display.contains("authenticate"));
        assert!(display.contains("after 3 retries"));
    }

    #[test]
    fn fallback_only_for_service_side_failures() {
        let make = |kind| ReferenceError::new(kind, "x", ErrorContext::default(), true);

        assert!(make(ReferenceErrorKind::ServiceUnavailable).should_use_fallback());
        assert!(make(ReferenceErrorKind::ServiceTimeout).should_use_fallback());
        assert!(make(ReferenceErrorKind::Cancelled).should_use_fallback());
        assert!(!make(ReferenceErrorKind::FileNotFound).should_use_fallback());
        assert!(!make(ReferenceErrorKind::MalformedRequest).should_use_fallback());
        assert!(!make(ReferenceErrorKind::Unknown).should_use_fallback());
    }

    #[test]
    fn cancelled_error_keeps_retry_count() {
        let error = ReferenceError::cancelled(context(), 2);
        assert_eq!(error.kind, ReferenceErrorKind::Cancelled);
        assert_eq!(error.retry_count, 2);
        assert!(!error.retryable);
    }
}
