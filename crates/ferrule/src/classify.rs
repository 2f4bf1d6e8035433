//! Classification of raw Lookup Service failures.
//!
//! The classifier walks the error's `source()` chain looking for types it
//! understands (transport errors, I/O errors, elapsed timers). Only when no
//! typed error is found does it fall back to matching the message text.
//!
//! | Evidence                                  | Kind                 |
//! |-------------------------------------------|----------------------|
//! | `tokio::time::error::Elapsed`             | `ServiceTimeout`     |
//! | server gone, pipe broken, not initialized | `ServiceUnavailable` |
//! | content modified / request cancelled      | `ServiceUnavailable` |
//! | invalid params / parse error              | `MalformedRequest`   |
//! | `io::ErrorKind::NotFound`, bad path       | `FileNotFound`       |
//! | anything else                             | `Unknown`            |

use std::io;

use crate::error::{ErrorContext, ReferenceError, ReferenceErrorKind};
use crate::lsp::{LspError, codes};

/// Message fragments that mean the service did not answer in time.
const TIMEOUT_HINTS: &[&str] = &["timed out", "timeout", "deadline exceeded"];

/// Message fragments that mean the service is down or unreachable.
const UNAVAILABLE_HINTS: &[&str] = &[
    "unavailable",
    "connection refused",
    "connection reset",
    "broken pipe",
    "not running",
    "exited",
    "not initialized",
];

/// Message fragments that mean the queried file is missing.
const FILE_NOT_FOUND_HINTS: &[&str] = &["file not found", "no such file"];

/// Message fragments that mean the request itself was rejected.
const MALFORMED_HINTS: &[&str] = &["invalid", "malformed", "bad request", "syntax error"];

/// Turn an opaque failure into a [`ReferenceError`].
///
/// `retries_enabled = false` marks every result non-retryable.
#[must_use]
pub fn classify(
    raw: &(dyn std::error::Error + 'static),
    context: &ErrorContext,
    retries_enabled: bool,
) -> ReferenceError {
    let kind = typed_kind(raw).unwrap_or_else(|| kind_from_message(&raw.to_string()));
    ReferenceError::new(kind, raw.to_string(), context.clone(), retries_enabled)
}

/// Kind from the first recognizable error in the chain.
fn typed_kind(raw: &(dyn std::error::Error + 'static)) -> Option<ReferenceErrorKind> {
    let mut current = Some(raw);
    while let Some(error) = current {
        if let Some(reference) = error.downcast_ref::<ReferenceError>() {
            return Some(reference.kind);
        }
        if error.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
            return Some(ReferenceErrorKind::ServiceTimeout);
        }
        if let Some(lsp) = error.downcast_ref::<LspError>() {
            return Some(lsp_kind(lsp));
        }
        if let Some(source) = error.downcast_ref::<io::Error>()
            && let Some(kind) = io_kind(source.kind())
        {
            return Some(kind);
        }
        current = error.source();
    }
    None
}

fn lsp_kind(error: &LspError) -> ReferenceErrorKind {
    match error {
        LspError::SpawnFailed { .. }
        | LspError::NotFound { .. }
        | LspError::ServerExited
        | LspError::InitializeFailed(_)
        | LspError::Disconnected(_) => ReferenceErrorKind::ServiceUnavailable,
        // Pipe trouble with a live client means the server went away
        LspError::Io(source) => {
            io_kind(source.kind()).unwrap_or(ReferenceErrorKind::ServiceUnavailable)
        }
        // Paths are canonicalized before use, so this is almost always a missing file
        LspError::InvalidPath(_) => ReferenceErrorKind::FileNotFound,
        LspError::Serialize(_) => ReferenceErrorKind::MalformedRequest,
        LspError::ServerError { code, .. } => server_code_kind(*code),
        LspError::Deserialize(_) | LspError::InvalidHeader(_) | LspError::IdMismatch { .. } => {
            ReferenceErrorKind::Unknown
        }
    }
}

fn server_code_kind(code: i64) -> ReferenceErrorKind {
    match code {
        codes::PARSE_ERROR
        | codes::INVALID_REQUEST
        | codes::INVALID_PARAMS
        | codes::METHOD_NOT_FOUND => ReferenceErrorKind::MalformedRequest,
        codes::SERVER_NOT_INITIALIZED
        | codes::CONTENT_MODIFIED
        | codes::SERVER_CANCELLED
        | codes::REQUEST_CANCELLED => ReferenceErrorKind::ServiceUnavailable,
        _ => ReferenceErrorKind::Unknown,
    }
}

fn io_kind(kind: io::ErrorKind) -> Option<ReferenceErrorKind> {
    match kind {
        io::ErrorKind::NotFound => Some(ReferenceErrorKind::FileNotFound),
        io::ErrorKind::TimedOut => Some(ReferenceErrorKind::ServiceTimeout),
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => Some(ReferenceErrorKind::ServiceUnavailable),
        io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => {
            Some(ReferenceErrorKind::MalformedRequest)
        }
        _ => None,
    }
}

/// Last resort: guess from the message text.
fn kind_from_message(message: &str) -> ReferenceErrorKind {
    let lower = message.to_lowercase();
    let matches = |hints: &[&str]| hints.iter().any(|hint| lower.contains(hint));

    // File-not-found is checked before the generic "not ..." unavailable
    // fragments so "file not found" never reads as an outage.
    if matches(TIMEOUT_HINTS) {
        ReferenceErrorKind::ServiceTimeout
    } else if matches(FILE_NOT_FOUND_HINTS) {
        ReferenceErrorKind::FileNotFound
    } else if matches(UNAVAILABLE_HINTS) {
        ReferenceErrorKind::ServiceUnavailable
    } else if matches(MALFORMED_HINTS) {
        ReferenceErrorKind::MalformedRequest
    } else {
        ReferenceErrorKind::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::path::PathBuf;

    fn context() -> ErrorContext {
        ErrorContext {
            path: Some(PathBuf::from("src/lib.rs")),
            line: Some(40),
            symbol: Some("parse".to_string()),
        }
    }

    fn kind_of(error: &(dyn std::error::Error + 'static)) -> ReferenceErrorKind {
        classify(error, &context(), true).kind
    }

    #[derive(Debug, thiserror::Error)]
    #[error("lookup failed")]
    struct Wrapper(#[source] io::Error);

    // ========================================================================
    // Typed errors
    // ========================================================================

    #[rstest]
    #[case::not_found(io::ErrorKind::NotFound, ReferenceErrorKind::FileNotFound)]
    #[case::timed_out(io::ErrorKind::TimedOut, ReferenceErrorKind::ServiceTimeout)]
    #[case::refused(io::ErrorKind::ConnectionRefused, ReferenceErrorKind::ServiceUnavailable)]
    #[case::broken_pipe(io::ErrorKind::BrokenPipe, ReferenceErrorKind::ServiceUnavailable)]
    #[case::invalid_input(io::ErrorKind::InvalidInput, ReferenceErrorKind::MalformedRequest)]
    fn io_errors_map_by_kind(#[case] io_kind: io::ErrorKind, #[case] expected: ReferenceErrorKind) {
        let error = io::Error::new(io_kind, "boom");
        assert_eq!(kind_of(&error), expected);
    }

    #[rstest]
    #[case::exited(LspError::ServerExited, ReferenceErrorKind::ServiceUnavailable)]
    #[case::missing(LspError::not_found("rust-analyzer", "install it"), ReferenceErrorKind::ServiceUnavailable)]
    #[case::bad_path(LspError::InvalidPath("x".into()), ReferenceErrorKind::FileNotFound)]
    #[case::invalid_params(LspError::server_error(-32602, "bad params"), ReferenceErrorKind::MalformedRequest)]
    #[case::content_modified(LspError::server_error(-32801, "content modified"), ReferenceErrorKind::ServiceUnavailable)]
    #[case::internal(LspError::server_error(-32603, "internal"), ReferenceErrorKind::Unknown)]
    #[case::id_mismatch(LspError::IdMismatch { expected: 1, actual: 2 }, ReferenceErrorKind::Unknown)]
    fn transport_errors_map_by_variant(#[case] error: LspError, #[case] expected: ReferenceErrorKind) {
        assert_eq!(kind_of(&error), expected);
    }

    #[test]
    fn wrapped_pipe_error_is_unavailable() {
        let error = LspError::Io(io::Error::other("write failed"));
        assert_eq!(kind_of(&error), ReferenceErrorKind::ServiceUnavailable);
    }

    #[test]
    fn source_chain_is_searched() {
        let error = Wrapper(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert_eq!(kind_of(&error), ReferenceErrorKind::ServiceTimeout);
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_timer_is_timeout() {
        let elapsed = tokio::time::timeout(
            std::time::Duration::from_millis(1),
            std::future::pending::<()>(),
        )
        .await
        .expect_err("should time out");
        assert_eq!(kind_of(&elapsed), ReferenceErrorKind::ServiceTimeout);
    }

    // ========================================================================
    // Message heuristics
    // ========================================================================

    #[rstest]
    #[case::timeout("request timeout after 10s", ReferenceErrorKind::ServiceTimeout)]
    #[case::timed_out("operation Timed Out", ReferenceErrorKind::ServiceTimeout)]
    #[case::unavailable("service unavailable", ReferenceErrorKind::ServiceUnavailable)]
    #[case::file("file not found: src/gone.rs", ReferenceErrorKind::FileNotFound)]
    #[case::malformed("invalid position", ReferenceErrorKind::MalformedRequest)]
    #[case::unknown("something odd happened", ReferenceErrorKind::Unknown)]
    fn opaque_errors_use_message_hints(#[case] message: &str, #[case] expected: ReferenceErrorKind) {
        let error: Box<dyn std::error::Error + Send + Sync> = message.into();
        assert_eq!(kind_of(error.as_ref()), expected);
    }

    #[test]
    fn context_and_message_are_copied() {
        let error: Box<dyn std::error::Error + Send + Sync> = "service unavailable".into();
        let classified = classify(error.as_ref(), &context(), true);

        assert_eq!(classified.message, "service unavailable");
        assert_eq!(classified.context, context());
        assert!(classified.retryable);
        assert_eq!(classified.retry_count, 0);
    }

    #[test]
    fn disabled_retries_make_everything_terminal() {
        let error = io::Error::new(io::ErrorKind::TimedOut, "slow");
        let classified = classify(&error, &context(), false);

        assert_eq!(classified.kind, ReferenceErrorKind::ServiceTimeout);
        assert!(!classified.retryable);
    }

    #[test]
    fn already_classified_error_keeps_kind() {
        let inner = ReferenceError::new(
            ReferenceErrorKind::FileNotFound,
            "gone",
            ErrorContext::default(),
            true,
        );
        assert_eq!(kind_of(&inner), ReferenceErrorKind::FileNotFound);
    }
}
