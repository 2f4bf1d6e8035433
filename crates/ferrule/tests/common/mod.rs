//! Shared fixtures for ferrule integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ferrule::{BoxError, Location, LookupService, Project, ResolverConfig, SymbolNode};
use tempfile::TempDir;

/// `auth.rs` declares `authenticate`; `handler.rs` uses it twice.
pub const AUTH_WORKSPACE: &[(&str, &str)] = &[
    (
        "src/auth.rs",
        "pub fn authenticate(token: &str) -> bool {\n    !token.is_empty()\n}\n",
    ),
    (
        "src/handler.rs",
        "use crate::auth::authenticate;\n\npub fn handle(token: &str) -> bool {\n    authenticate(token)\n}\n",
    ),
];

/// Create a temporary workspace with the given files.
pub fn workspace_with_files(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    for (path, content) in files {
        let full_path = dir.path().join(path);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).expect("failed to create parent dirs");
        }
        fs::write(&full_path, content).expect("failed to write file");
    }
    dir
}

/// Open a project over a fresh workspace.
pub fn project_with_files(files: &[(&str, &str)], config: ResolverConfig) -> (TempDir, Project) {
    let dir = workspace_with_files(files);
    let project = Project::open(dir.path(), config).expect("failed to open project");
    (dir, project)
}

/// Identifier at a position, panicking with the position if absent.
pub fn node(project: &Project, path: &str, line: u32, column: u32) -> SymbolNode {
    project
        .node_at(Path::new(path), line, column)
        .unwrap_or_else(|| panic!("no identifier at {path}:{line}:{column}"))
}

/// `file:line:col` with the file name only, for compact assertions.
pub fn short(location: &Location) -> String {
    let name = location
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{name}:{}:{}", location.line, location.column)
}

/// One scripted Lookup Service reply.
#[derive(Debug, Clone)]
pub enum Script {
    /// Succeed with these locations
    Found(Vec<Location>),
    /// Fail with an opaque error carrying this message
    Fail(&'static str),
    /// Succeed with these locations after a delay
    Slow(Duration, Vec<Location>),
    /// Never answer
    Hang,
}

/// Lookup Service that replays a script, repeating the last reply forever.
pub struct ScriptedLookup {
    script: Mutex<Vec<Script>>,
    calls: AtomicU32,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Decrements the in-flight count even when the call is dropped mid-way.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedLookup {
    pub fn new(script: Vec<Script>) -> Self {
        assert!(!script.is_empty(), "script needs at least one reply");
        Self {
            script: Mutex::new(script),
            calls: AtomicU32::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn always(reply: Script) -> Self {
        Self::new(vec![reply])
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most calls that were running at the same moment.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn next(&self) -> Result<Vec<Location>, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        let reply = {
            let mut script = self.script.lock().expect("script lock");
            if script.len() > 1 {
                script.remove(0)
            } else {
                script[0].clone()
            }
        };

        match reply {
            Script::Found(locations) => Ok(locations),
            Script::Fail(message) => Err(message.into()),
            Script::Slow(delay, locations) => {
                tokio::time::sleep(delay).await;
                Ok(locations)
            }
            Script::Hang => {
                std::future::pending::<()>().await;
                unreachable!("pending never resolves")
            }
        }
    }
}

#[async_trait]
impl LookupService for ScriptedLookup {
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
