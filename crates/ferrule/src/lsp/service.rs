//! [`LookupService`] backed by a language server.
//!
//! The client speaks blocking JSON-RPC, so it lives on one dedicated worker
//! thread and lookups reach it over a channel:
//!
//! ```text
//! run() ──job──▶ worker thread ──▶ LspClient (didOpen / didChange, request)
//!   ▲                  │
//!   └── oneshot reply ◀┘
//! ```
//!
//! A caller that stops waiting (timeout, cancellation) leaves its job in the
//! queue and the worker skips it. While one request has been running longer
//! than the stall limit, new lookups fail at once with
//! [`LspError::Disconnected`] instead of queueing behind a server that has
//! stopped answering.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, mpsc as std_mpsc};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lsp_types::{Position, Uri};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use super::Result;
use super::error::LspError;
use super::provider::LspProvider;
use super::transport::{LspClient, PositionEncoding, uri_to_path};
use crate::lookup::{BoxError, LookupKind, LookupService};
use crate::syntax::{Location, SourceFile, SymbolNode};

/// Default time one request may run before the server counts as stalled.
const DEFAULT_STALL_AFTER: Duration = Duration::from_secs(10);

/// How long [`LspLookupService::shutdown`] waits for the worker.
const SHUTDOWN_WAIT: Duration = Duration::from_secs(5);

/// What the worker thread drives; [`LspClient`] outside tests.
trait Backend: Send + 'static {
    fn position_encoding(&self) -> PositionEncoding;

    fn lookup(
        &mut self,
        kind: LookupKind,
        file: &Arc<SourceFile>,
        position: Position,
    ) -> Result<Vec<lsp_types::Location>>;

    /// Content this backend last sent to the server for `uri`.
    fn synced(&self, uri: &Uri) -> Option<Arc<SourceFile>>;

    fn shutdown(&mut self) -> Result<()>;
}

impl Backend for LspClient {
    fn position_encoding(&self) -> PositionEncoding {
        LspClient::position_encoding(self)
    }

    fn lookup(
        &mut self,
        kind: LookupKind,
        file: &Arc<SourceFile>,
        position: Position,
    ) -> Result<Vec<lsp_types::Location>> {
        self.sync_document(file)?;
        match kind {
            LookupKind::References => self.find_references(file.path(), position),
            LookupKind::Definition => self.goto_definition(file.path(), position),
        }
    }

    fn synced(&self, uri: &Uri) -> Option<Arc<SourceFile>> {
        LspClient::synced(self, uri).cloned()
    }

    fn shutdown(&mut self) -> Result<()> {
        LspClient::shutdown(self)
    }
}

struct Job {
    kind: LookupKind,
    file: Arc<SourceFile>,
    line: u32,
    column: u32,
    reply: oneshot::Sender<Result<Vec<Location>>>,
}

enum Command {
    Lookup(Job),
    Shutdown(std_mpsc::Sender<Result<()>>),
}

/// Start time of the request the worker is blocked on, if any.
type BusySince = Arc<Mutex<Option<Instant>>>;

/// Lookup Service that forwards to a running language server.
#[derive(Clone)]
pub struct LspLookupService {
    commands: mpsc::UnboundedSender<Command>,
    busy_since: BusySince,
    stall_after: Duration,
    name: String,
}

impl LspLookupService {
    /// Spawn the server and complete the handshake (blocking).
    pub fn start(provider: &dyn LspProvider, workspace: &Path) -> Result<Self> {
        let client = LspClient::start(provider, workspace)?;
        Self::with_backend(client, provider.command())
    }

    /// Spawn the server on the blocking pool.
    pub async fn spawn<P>(provider: P, workspace: PathBuf) -> Result<Self>
    where
        P: LspProvider + 'static,
    {
        tokio::task::spawn_blocking(move || Self::start(&provider, &workspace))
            .await
            .map_err(|e| LspError::Disconnected(format!("startup worker failed: {e}")))?
    }

    fn with_backend<B: Backend>(backend: B, name: &str) -> Result<Self> {
        let (commands, queue) = mpsc::unbounded_channel();
        let busy_since = BusySince::default();
        let worker_busy = Arc::clone(&busy_since);

        std::thread::Builder::new()
            .name("ferrule-lsp".to_string())
            .spawn(move || serve(backend, queue, &worker_busy))
            .map_err(|e| LspError::spawn_failed("ferrule-lsp worker", e))?;

        Ok(Self {
            commands,
            busy_since,
            stall_after: DEFAULT_STALL_AFTER,
            name: name.to_string(),
        })
    }

    /// Treat the server as stalled once a single request runs past `limit`.
    #[must_use]
    pub fn with_stall_timeout(mut self, limit: Duration) -> Self {
        self.stall_after = limit;
        self
    }

    /// Shut the server down cleanly.
    ///
    /// Blocks for up to a few seconds while the worker finishes its current
    /// request.
    pub fn shutdown(&self) -> Result<()> {
        let (reply, done) = std_mpsc::channel();
        self.commands
            .send(Command::Shutdown(reply))
            .map_err(|_| worker_gone())?;

        done.recv_timeout(SHUTDOWN_WAIT).unwrap_or_else(|_| {
            Err(LspError::Disconnected(
                "language server did not finish its last request".to_string(),
            ))
        })
    }

    fn stalled_for(&self) -> Option<Duration> {
        let since = (*self.busy_since.lock().unwrap_or_else(PoisonError::into_inner))?;
        let running = since.elapsed();
        (running > self.stall_after).then_some(running)
    }

    async fn run(&self, node: &SymbolNode, kind: LookupKind) -> Result<Vec<Location>> {
        if let Some(running) = self.stalled_for() {
            return Err(LspError::Disconnected(format!(
                "language server has not answered for {}ms",
                running.as_millis()
            )));
        }

        let (reply, answer) = oneshot::channel();
        self.commands
            .send(Command::Lookup(Job {
                kind,
                file: Arc::clone(node.file()),
                line: node.line(),
                column: node.column(),
                reply,
            }))
            .map_err(|_| worker_gone())?;

        let locations = answer.await.map_err(|_| worker_gone())??;

        debug!(
            kind = %kind,
            symbol = node.text(),
            results = locations.len(),
            "Language server answered"
        );

        Ok(locations)
    }
}

#[async_trait]
impl LookupService for LspLookupService {
    async fn find_references(&self, node: &SymbolNode) -> std::result::Result<Vec<Location>, BoxError> {
        Ok(self.run(node, LookupKind::References).await?)
    }

    async fn goto_definition(&self, node: &SymbolNode) -> std::result::Result<Vec<Location>, BoxError> {
        Ok(self.run(node, LookupKind::Definition).await?)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn worker_gone() -> LspError {
    LspError::Disconnected("language server worker stopped".to_string())
}

fn set_busy(busy_since: &Mutex<Option<Instant>>, value: Option<Instant>) {
    *busy_since.lock().unwrap_or_else(PoisonError::into_inner) = value;
}

/// Worker loop: one request at a time, in arrival order, until shutdown or
/// until every service handle is dropped.
fn serve<B: Backend>(
    mut backend: B,
    mut queue: mpsc::UnboundedReceiver<Command>,
    busy_since: &Mutex<Option<Instant>>,
) {
    while let Some(command) = queue.blocking_recv() {
        match command {
            Command::Lookup(job) => {
                if job.reply.is_closed() {
                    trace!(path = %job.file.path().display(), line = job.line, "Skipping abandoned lookup");
                    continue;
                }

                set_busy(busy_since, Some(Instant::now()));
                let result = answer(&mut backend, &job);
                set_busy(busy_since, None);

                // The caller may have given up while the server worked
                let _ = job.reply.send(result);
            }
            Command::Shutdown(done) => {
                let _ = done.send(backend.shutdown());
                return;
            }
        }
    }

    trace!("All service handles dropped, stopping language server worker");
}

fn answer<B: Backend>(backend: &mut B, job: &Job) -> Result<Vec<Location>> {
    let encoding = backend.position_encoding();
    let position = to_lsp_position(&job.file, job.line, job.column, encoding);
    let raw = backend.lookup(job.kind, &job.file, position)?;

    let mut from_disk: HashMap<PathBuf, Option<String>> = HashMap::new();
    let mut locations = Vec::with_capacity(raw.len());

    for location in &raw {
        let path = match uri_to_path(&location.uri) {
            Ok(path) => path,
            Err(e) => {
                debug!(uri = location.uri.as_str(), error = %e, "Skipping unusable location");
                continue;
            }
        };

        let start = location.range.start;
        let line_text = match encoding {
            PositionEncoding::Utf8 => None,
            PositionEncoding::Utf16 => {
                let row = start.line as usize;
                match backend.synced(&location.uri) {
                    Some(file) => file.content().lines().nth(row).map(str::to_owned),
                    None => from_disk
                        .entry(path.clone())
                        .or_insert_with(|| std::fs::read_to_string(&path).ok())
                        .as_deref()
                        .and_then(|content| content.lines().nth(row))
                        .map(str::to_owned),
                }
            }
        };

        if encoding == PositionEncoding::Utf16 && line_text.is_none() {
            trace!(path = %path.display(), line = start.line + 1, "No text for column conversion");
        }

        locations.push(from_lsp_position(path, start, encoding, line_text.as_deref()));
    }

    Ok(locations)
}

/// Convert a 1-indexed byte position into the server's encoding.
#[allow(clippy::cast_possible_truncation)]
fn to_lsp_position(file: &SourceFile, line: u32, column: u32, encoding: PositionEncoding) -> Position {
    let row = line.saturating_sub(1);
    let byte_column = column.saturating_sub(1);

    let character = match encoding {
        PositionEncoding::Utf8 => byte_column,
        PositionEncoding::Utf16 => file
            .content()
            .lines()
            .nth(row as usize)
            .and_then(|text| text.get(..byte_column as usize))
            .map_or(byte_column, |prefix| prefix.encode_utf16().count() as u32),
    };

    Position::new(row, character)
}

/// Convert a server position back to 1-indexed bytes; snippet text is
/// filled in by the resolver.
///
/// `line_text` is the line the position points into. Without it a UTF-16
/// column is kept as is.
fn from_lsp_position(
    path: PathBuf,
    start: Position,
    encoding: PositionEncoding,
    line_text: Option<&str>,
) -> Location {
    let column = match (encoding, line_text) {
        (PositionEncoding::Utf16, Some(text)) => utf16_to_byte(text, start.character),
        _ => start.character,
    };

    Location::new(path, start.line + 1, column + 1, String::new())
}

/// Byte offset of the UTF-16 offset `units` in `text`, clamped to its end.
#[allow(clippy::cast_possible_truncation)]
fn utf16_to_byte(text: &str, units: u32) -> u32 {
    let mut seen = 0;
    for (offset, ch) in text.char_indices() {
        if seen >= units {
            return offset as u32;
        }
        seen += ch.len_utf16() as u32;
    }
    text.len() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::SourceSet;
    use std::sync::atomic::{AtomicU32, Ordering};

    const NON_ASCII: &str = "fn f() { let s = \"é\"; let y = s; }\n";

    /// Byte column of the last `s` in [`NON_ASCII`].
    const LAST_S: u32 = 32;

    fn node_in(path: &str, content: &str, line: u32, column: u32) -> SymbolNode {
        let mut set = SourceSet::new();
        set.insert(SourceFile::parse(path, content).expect("should parse"));
        set.node_at(Path::new(path), line, column)
            .expect("should find identifier")
    }

    // ========================================================================
    // Column conversion
    // ========================================================================

    #[test]
    fn utf8_position_is_zero_based_bytes() {
        let file = SourceFile::parse("a.rs", "let é = 1;\nlet x = é;\n").expect("should parse");
        let position = to_lsp_position(&file, 2, 9, PositionEncoding::Utf8);
        assert_eq!(position, Position::new(1, 8));
    }

    #[test]
    fn utf16_position_counts_code_units() {
        // `é` is two UTF-8 bytes but one UTF-16 code unit
        let file = SourceFile::parse("a.rs", "let s = \"é\"; let y = s;\n").expect("should parse");
        let byte_column = "let s = \"é\"; let y = ".len() as u32 + 1;

        let position = to_lsp_position(&file, 1, byte_column, PositionEncoding::Utf16);
        assert_eq!(position, Position::new(0, byte_column - 2));
    }

    #[test]
    fn utf16_server_column_on_non_ascii_line_becomes_bytes() {
        let file = SourceFile::parse("a.rs", NON_ASCII).expect("should parse");
        let sent = to_lsp_position(&file, 1, LAST_S, PositionEncoding::Utf16);
        assert_eq!(sent, Position::new(0, 30));

        let line = NON_ASCII.lines().next();
        let back = from_lsp_position(PathBuf::from("a.rs"), sent, PositionEncoding::Utf16, line);
        assert_eq!((back.line, back.column), (1, LAST_S));
    }

    #[test]
    fn surrogate_pairs_count_as_two_units() {
        // `🦀` is four UTF-8 bytes and two UTF-16 code units
        let text = "let c = \"🦀\"; c";
        assert_eq!(utf16_to_byte(text, 14), 16);
        assert_eq!(&text[16..], "c");
    }

    #[test]
    fn utf16_offset_past_the_line_clamps_to_its_end() {
        assert_eq!(utf16_to_byte("abc", 10), 3);
    }

    #[test]
    fn utf8_server_column_is_used_as_is() {
        let location = from_lsp_position(
            PathBuf::from("/src/main.rs"),
            Position::new(9, 4),
            PositionEncoding::Utf8,
            Some("ignored"),
        );

        assert_eq!(location.line, 10);
        assert_eq!(location.column, 5);
        assert_eq!(location.path, PathBuf::from("/src/main.rs"));
    }

    // ========================================================================
    // Worker
    // ========================================================================

    /// Answers every lookup with the position it was asked about.
    struct Echo {
        uri: Uri,
        file: Option<Arc<SourceFile>>,
    }

    impl Backend for Echo {
        fn position_encoding(&self) -> PositionEncoding {
            PositionEncoding::Utf16
        }

        fn lookup(
            &mut self,
            _kind: LookupKind,
            _file: &Arc<SourceFile>,
            position: Position,
        ) -> Result<Vec<lsp_types::Location>> {
            Ok(vec![
                lsp_types::Location {
                    uri: self.uri.clone(),
                    range: lsp_types::Range::new(position, position),
                },
                lsp_types::Location {
                    uri: "untitled:Untitled-1".parse().expect("valid URI"),
                    range: lsp_types::Range::default(),
                },
            ])
        }

        fn synced(&self, uri: &Uri) -> Option<Arc<SourceFile>> {
            self.file
                .as_ref()
                .filter(|_| uri.as_str() == self.uri.as_str())
                .cloned()
        }

        fn shutdown(&mut self) -> Result<()> {
            Ok(())
        }
    }

    /// Blocks every lookup until released.
    struct Gate {
        release: std_mpsc::Receiver<()>,
        calls: Arc<AtomicU32>,
    }

    impl Backend for Gate {
        fn position_encoding(&self) -> PositionEncoding {
            PositionEncoding::Utf8
        }

        fn lookup(
            &mut self,
            _kind: LookupKind,
            _file: &Arc<SourceFile>,
            _position: Position,
        ) -> Result<Vec<lsp_types::Location>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _ = self.release.recv();
            Ok(Vec::new())
        }

        fn synced(&self, _uri: &Uri) -> Option<Arc<SourceFile>> {
            None
        }

        fn shutdown(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn gate() -> (std_mpsc::Sender<()>, Arc<AtomicU32>, Gate) {
        let (release, gate) = std_mpsc::channel();
        let calls = Arc::new(AtomicU32::new(0));
        let backend = Gate {
            release: gate,
            calls: Arc::clone(&calls),
        };
        (release, calls, backend)
    }

    #[tokio::test]
    async fn answers_use_byte_columns_of_synced_text() {
        let node = node_in("/src/lib.rs", NON_ASCII, 1, LAST_S);
        let backend = Echo {
            uri: "file:///src/lib.rs".parse().expect("valid URI"),
            file: Some(Arc::clone(node.file())),
        };
        let service = LspLookupService::with_backend(backend, "echo").expect("worker should start");

        let locations = service
            .run(&node, LookupKind::References)
            .await
            .expect("should answer");

        assert_eq!(locations.len(), 1, "non-file URIs are skipped");
        assert_eq!(locations[0].path, PathBuf::from("/src/lib.rs"));
        assert_eq!((locations[0].line, locations[0].column), (1, LAST_S));
    }

    #[tokio::test]
    async fn answers_for_unsent_files_read_the_disk() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = dir.path().join("lib.rs");
        std::fs::write(&path, NON_ASCII).expect("write source");
        let path = path.canonicalize().expect("canonicalize");

        let node = node_in(path.to_str().expect("utf8 path"), NON_ASCII, 1, LAST_S);
        let backend = Echo {
            uri: crate::lsp::path_to_uri(&path).expect("should convert"),
            file: None,
        };
        let service = LspLookupService::with_backend(backend, "echo").expect("worker should start");

        let locations = service
            .run(&node, LookupKind::Definition)
            .await
            .expect("should answer");

        assert_eq!(locations[0].path, path);
        assert_eq!(locations[0].column, LAST_S);
    }

    #[tokio::test]
    async fn stalled_server_fails_fast_instead_of_queueing() {
        let (release, calls, backend) = gate();
        let service = LspLookupService::with_backend(backend, "gate")
            .expect("worker should start")
            .with_stall_timeout(Duration::from_millis(20));
        let node = node_in("lib.rs", NON_ASCII, 1, LAST_S);

        let first = tokio::time::timeout(
            Duration::from_millis(100),
            service.run(&node, LookupKind::References),
        )
        .await;
        assert!(first.is_err(), "hung request should time out");

        let started = Instant::now();
        let second = service.run(&node, LookupKind::References).await;

        assert!(matches!(second, Err(LspError::Disconnected(_))), "{second:?}");
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        drop(release);
    }

    #[tokio::test]
    async fn abandoned_lookups_are_skipped() {
        let (release, calls, backend) = gate();
        let service = LspLookupService::with_backend(backend, "gate").expect("worker should start");
        let node = node_in("lib.rs", NON_ASCII, 1, LAST_S);

        for _ in 0..2 {
            let abandoned = tokio::time::timeout(
                Duration::from_millis(50),
                service.run(&node, LookupKind::Definition),
            )
            .await;
            assert!(abandoned.is_err(), "gated lookup should time out");
        }

        release.send(()).expect("worker should be waiting");
        release.send(()).expect("gate should be open");

        let answered = service
            .run(&node, LookupKind::Definition)
            .await
            .expect("a waited-for lookup is answered");

        assert!(answered.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn shutdown_stops_the_worker() {
        let (_release, _calls, backend) = gate();
        let service = LspLookupService::with_backend(backend, "gate").expect("worker should start");
        let node = node_in("lib.rs", NON_ASCII, 1, LAST_S);

        service.shutdown().expect("idle worker should shut down");

        let result = service.run(&node, LookupKind::References).await;
        assert!(matches!(result, Err(LspError::Disconnected(_))), "{result:?}");
    }
}
