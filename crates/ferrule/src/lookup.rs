//! The Lookup Service seam.
//!
//! A Lookup Service is the slow, precise backend (normally a language
//! server) that answers "find references" and "go to definition". The core
//! never assumes anything about how it fails: errors come back as opaque
//! boxed values and are classified afterwards.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::syntax::{Location, SymbolNode};

/// Opaque native error returned by a Lookup Service.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// What a lookup asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupKind {
    /// Every use of the symbol
    References,
    /// Where the symbol is declared
    Definition,
}

impl LookupKind {
    /// Stable lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::References => "references",
            Self::Definition => "definition",
        }
    }
}

impl fmt::Display for LookupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Semantic symbol resolver.
///
/// Implementations must be shareable across tasks; the batch coordinator
/// issues several calls concurrently.
#[async_trait]
pub trait LookupService: Send + Sync {
    /// Find every reference to the symbol at `node`.
    async fn find_references(&self, node: &SymbolNode) -> Result<Vec<Location>, BoxError>;

    /// Find the definition(s) of the symbol at `node`.
    async fn goto_definition(&self, node: &SymbolNode) -> Result<Vec<Location>, BoxError>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "lookup-service"
    }
}

/// Dispatch a lookup by kind.
pub(crate) async fn lookup(
    service: &dyn LookupService,
    kind: LookupKind,
    node: &SymbolNode,
) -> Result<Vec<Location>, BoxError> {
    match kind {
        LookupKind::References => service.find_references(node).await,
        LookupKind::Definition => service.goto_definition(node).await,
    }
}

/// Scripted service used by unit tests across modules.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// One scripted reply.
    #[derive(Debug, Clone)]
    pub(crate) enum Reply {
        Ok(Vec<Location>),
        Err(&'static str),
        Io(std::io::ErrorKind),
        Hang,
    }

    /// Replays scripted replies in order, repeating the last one forever.
    pub(crate) struct ScriptedService {
        replies: Mutex<Vec<Reply>>,
        calls: AtomicU32,
    }

    impl ScriptedService {
        pub(crate) fn new(replies: Vec<Reply>) -> Self {
            Self {
                replies: Mutex::new(replies),
                calls: AtomicU32::new(0),
            }
        }

        pub(crate) fn always(reply: Reply) -> Self {
            Self::new(vec![reply])
        }

        pub(crate) fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        async fn next(&self) -> Result<Vec<Location>, BoxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = {
                let mut replies = self.replies.lock().expect("script lock");
                if replies.len() > 1 {
                    replies.remove(0)
                } else {
                    replies.first().cloned().expect("script should not be empty")
                }
            };

            match reply {
                Reply::Ok(locations) => Ok(locations),
                Reply::Err(message) => Err(message.into()),
                Reply::Io(kind) => Err(Box::new(std::io::Error::new(kind, "scripted io failure"))),
                Reply::Hang => {
                    std::future::pending::<()>().await;
                    unreachable!("pending never resolves")
                }
            }
        }
    }

    #[async_trait]
    impl LookupService for ScriptedService {
        async fn find_references(&self, _node: &SymbolNode) -> Result<Vec<Location>, BoxError> {
            self.next().await
        }

        async fn goto_definition(&self, _node: &SymbolNode) -> Result<Vec<Location>, BoxError> {
            self.next().await
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }
}
