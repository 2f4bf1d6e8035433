//! JSON-RPC transport for language-server communication.
//!
//! Framing lives in [`JsonRpcChannel`], which is generic over its reader and
//! writer so it can be exercised against in-memory buffers. [`LspClient`]
//! owns the spawned server process and a channel over its pipes, and keeps
//! the server's copy of each document in step with the parsed sources
//! through [`OpenDocuments`].

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Arc;

use lsp_types::{
    ClientCapabilities, DidChangeTextDocumentParams, DidOpenTextDocumentParams,
    GeneralClientCapabilities, GotoDefinitionParams, GotoDefinitionResponse, InitializeParams,
    InitializeResult, InitializedParams, Location, PartialResultParams, Position,
    PositionEncodingKind, ReferenceContext, ReferenceParams, TextDocumentContentChangeEvent,
    TextDocumentIdentifier, TextDocumentItem, TextDocumentPositionParams, Uri,
    VersionedTextDocumentIdentifier, WindowClientCapabilities, WorkDoneProgressParams,
    WorkspaceFolder,
    notification::{DidChangeTextDocument, DidOpenTextDocument, Exit, Initialized, Notification},
    request::{GotoDefinition, Initialize, References, Request, Shutdown},
};
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tracing::{debug, trace, warn};

use super::Result;
use super::error::LspError;
use super::provider::LspProvider;
use crate::syntax::SourceFile;

/// Characters escaped when a path becomes a `file://` URI.
const PATH_ESCAPES: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// How the server counts columns, negotiated during initialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionEncoding {
    /// Columns are UTF-8 byte offsets
    Utf8,
    /// Columns are UTF-16 code unit offsets (the protocol default)
    Utf16,
}

/// Content-Length framed JSON-RPC over any byte stream.
pub struct JsonRpcChannel<R, W> {
    reader: R,
    writer: W,
    request_id: i64,
}

impl<R: BufRead, W: Write> JsonRpcChannel<R, W> {
    /// Wrap a reader/writer pair.
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            request_id: 0,
        }
    }

    /// Send a request and block until its response arrives.
    ///
    /// Notifications received meanwhile are skipped; server-to-client
    /// requests are acknowledged with a null result.
    pub fn request<Q>(&mut self, params: Q::Params) -> Result<Q::Result>
    where
        Q: Request,
        Q::Params: Serialize,
        Q::Result: DeserializeOwned,
    {
        self.request_id += 1;
        let id = self.request_id;

        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": Q::METHOD,
            "params": params,
        });

        trace!(method = Q::METHOD, id, "Sending request");

        self.write_message(&request)?;
        self.read_response(id)
    }

    /// Send a notification (no response expected).
    pub fn notify<N>(&mut self, params: N::Params) -> Result<()>
    where
        N: Notification,
        N::Params: Serialize,
    {
        let notification = json!({
            "jsonrpc": "2.0",
            "method": N::METHOD,
            "params": params,
        });

        trace!(method = N::METHOD, "Sending notification");
        self.write_message(&notification)
    }

    fn write_message(&mut self, message: &Value) -> Result<()> {
        let body = serde_json::to_string(message).map_err(LspError::Serialize)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        self.writer.write_all(header.as_bytes())?;
        self.writer.write_all(body.as_bytes())?;
        self.writer.flush()?;

        Ok(())
    }

    fn read_message(&mut self) -> Result<Value> {
        let content_length = self.read_content_length()?;

        let mut body = vec![0u8; content_length];
        self.reader.read_exact(&mut body).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                LspError::ServerExited
            } else {
                LspError::Io(e)
            }
        })?;

        serde_json::from_slice(&body).map_err(LspError::Deserialize)
    }

    fn read_response<T: DeserializeOwned>(&mut self, expected_id: i64) -> Result<T> {
        loop {
            let message = self.read_message()?;

            if let Some(method) = message.get("method").and_then(Value::as_str) {
                if let Some(request_id) = message.get("id") {
                    trace!(method, "Acknowledging server request");
                    let response = json!({
                        "jsonrpc": "2.0",
                        "id": request_id,
                        "result": null,
                    });
                    self.write_message(&response)?;
                } else {
                    trace!(method, "Skipping notification");
                }
                continue;
            }

            if let Some(error) = message.get("error") {
                let code = error["code"].as_i64().unwrap_or(-1);
                let text = error["message"].as_str().unwrap_or("unknown error");
                return Err(LspError::server_error(code, text));
            }

            let actual_id = message["id"].as_i64().ok_or_else(|| {
                LspError::InvalidHeader("response missing 'id' field".to_string())
            })?;

            if actual_id != expected_id {
                return Err(LspError::IdMismatch {
                    expected: expected_id,
                    actual: actual_id,
                });
            }

            let result = message.get("result").cloned().unwrap_or(Value::Null);
            return serde_json::from_value(result).map_err(LspError::Deserialize);
        }
    }

    fn read_content_length(&mut self) -> Result<usize> {
        let mut content_length = None;

        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line)? == 0 {
                return Err(LspError::ServerExited);
            }

            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                break;
            }

            if let Some((name, value)) = line.split_once(':')
                && name.eq_ignore_ascii_case("content-length")
            {
                let parsed = value.trim().parse().map_err(|_| {
                    LspError::InvalidHeader(format!("invalid Content-Length: {}", value.trim()))
                })?;
                content_length = Some(parsed);
            }
        }

        content_length
            .ok_or_else(|| LspError::InvalidHeader("missing Content-Length header".to_string()))
    }

    #[cfg(test)]
    fn writer(&self) -> &W {
        &self.writer
    }
}

/// The server's view of each document it has been sent, keyed by URI.
#[derive(Debug, Default)]
pub struct OpenDocuments {
    documents: HashMap<String, OpenDocument>,
}

#[derive(Debug)]
struct OpenDocument {
    version: i32,
    file: Arc<SourceFile>,
}

impl OpenDocuments {
    /// Make the server hold `file`'s current content.
    ///
    /// The first sight of a URI sends `didOpen` at version 1. A later call
    /// with different content (by fingerprint) sends a full-text
    /// `didChange` with the next version. Unchanged content sends nothing.
    pub fn sync<R: BufRead, W: Write>(
        &mut self,
        channel: &mut JsonRpcChannel<R, W>,
        uri: Uri,
        language_id: &str,
        file: &Arc<SourceFile>,
    ) -> Result<()> {
        let key = uri.as_str().to_string();

        match self.documents.get_mut(&key) {
            Some(open) if open.file.fingerprint() == file.fingerprint() => {}
            Some(open) => {
                let version = open.version + 1;
                channel.notify::<DidChangeTextDocument>(DidChangeTextDocumentParams {
                    text_document: VersionedTextDocumentIdentifier::new(uri, version),
                    content_changes: vec![TextDocumentContentChangeEvent {
                        range: None,
                        range_length: None,
                        text: file.content().to_string(),
                    }],
                })?;
                open.version = version;
                open.file = Arc::clone(file);
                trace!(uri = %key, version, "Sent changed document");
            }
            None => {
                channel.notify::<DidOpenTextDocument>(DidOpenTextDocumentParams {
                    text_document: TextDocumentItem {
                        uri,
                        language_id: language_id.to_string(),
                        version: 1,
                        text: file.content().to_string(),
                    },
                })?;
                trace!(uri = %key, "Opened document");
                self.documents.insert(
                    key,
                    OpenDocument {
                        version: 1,
                        file: Arc::clone(file),
                    },
                );
            }
        }

        Ok(())
    }

    /// Content last sent for `uri`.
    #[must_use]
    pub fn get(&self, uri: &Uri) -> Option<&Arc<SourceFile>> {
        self.documents.get(uri.as_str()).map(|open| &open.file)
    }

    /// Version last sent for `uri`.
    #[must_use]
    pub fn version(&self, uri: &Uri) -> Option<i32> {
        self.documents.get(uri.as_str()).map(|open| open.version)
    }
}

/// A running language server.
pub struct LspClient {
    process: Child,
    channel: JsonRpcChannel<BufReader<ChildStdout>, ChildStdin>,
    encoding: PositionEncoding,
    language_id: String,
    documents: OpenDocuments,
}

impl LspClient {
    /// Spawn a server and perform the initialize handshake.
    ///
    /// # Errors
    ///
    /// Returns an error if the executable is missing, fails to start, or
    /// rejects the handshake.
    #[must_use = "the client holds a running process that should be shut down"]
    pub fn start(provider: &dyn LspProvider, workspace_path: &Path) -> Result<Self> {
        let command = provider.command();
        let args = provider.args();

        debug!(
            command,
            args = ?args,
            workspace = %workspace_path.display(),
            "Starting language server"
        );

        let mut process = Command::new(command)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    LspError::not_found(command, provider.install_hint())
                } else {
                    LspError::spawn_failed(command, e)
                }
            })?;

        let (Some(stdin), Some(stdout)) = (process.stdin.take(), process.stdout.take()) else {
            let _ = process.kill();
            return Err(LspError::InitializeFailed(
                "server pipes were not captured".to_string(),
            ));
        };

        let mut client = Self {
            process,
            channel: JsonRpcChannel::new(BufReader::new(stdout), stdin),
            encoding: PositionEncoding::Utf16,
            language_id: provider.language_id().to_string(),
            documents: OpenDocuments::default(),
        };

        client.initialize(workspace_path, provider.initialize_options())?;

        Ok(client)
    }

    #[allow(deprecated)] // root_uri is deprecated but still widely honoured
    fn initialize(&mut self, workspace_path: &Path, init_options: Option<Value>) -> Result<()> {
        let workspace_uri = path_to_uri(workspace_path)?;
        let workspace_name = workspace_path
            .file_name()
            .map_or_else(|| "workspace".to_string(), |n| n.to_string_lossy().into_owned());

        let capabilities = ClientCapabilities {
            general: Some(GeneralClientCapabilities {
                position_encodings: Some(vec![
                    PositionEncodingKind::UTF8,
                    PositionEncodingKind::UTF16,
                ]),
                ..Default::default()
            }),
            window: Some(WindowClientCapabilities {
                work_done_progress: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };

        let params = InitializeParams {
            root_uri: Some(workspace_uri.clone()),
            workspace_folders: Some(vec![WorkspaceFolder {
                uri: workspace_uri,
                name: workspace_name,
            }]),
            capabilities,
            initialization_options: init_options,
            ..Default::default()
        };

        let result: InitializeResult = self
            .channel
            .request::<Initialize>(params)
            .map_err(|e| LspError::InitializeFailed(e.to_string()))?;

        self.encoding = negotiated_encoding(&result);
        self.channel.notify::<Initialized>(InitializedParams {})?;

        debug!(encoding = ?self.encoding, "Initialize handshake complete");
        Ok(())
    }

    /// Column encoding agreed with the server.
    #[must_use]
    pub fn position_encoding(&self) -> PositionEncoding {
        self.encoding
    }

    /// Open `file` on the server, or resend it if its content changed.
    pub fn sync_document(&mut self, file: &Arc<SourceFile>) -> Result<()> {
        let uri = path_to_uri(file.path())?;
        self.documents
            .sync(&mut self.channel, uri, &self.language_id, file)
    }

    /// Content the server holds for `uri`, if this client sent it.
    #[must_use]
    pub fn synced(&self, uri: &Uri) -> Option<&Arc<SourceFile>> {
        self.documents.get(uri)
    }

    /// Every reference to the symbol at `position`, declaration excluded.
    pub fn find_references(&mut self, file: &Path, position: Position) -> Result<Vec<Location>> {
        let params = reference_params(path_to_uri(file)?, position);
        let response = self.channel.request::<References>(params)?;
        Ok(response.unwrap_or_default())
    }

    /// Every definition site of the symbol at `position`.
    pub fn goto_definition(&mut self, file: &Path, position: Position) -> Result<Vec<Location>> {
        let params = GotoDefinitionParams {
            text_document_position_params: TextDocumentPositionParams {
                text_document: TextDocumentIdentifier::new(path_to_uri(file)?),
                position,
            },
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        };

        let response = self.channel.request::<GotoDefinition>(params)?;
        Ok(response.map(definition_locations).unwrap_or_default())
    }

    /// Send shutdown and exit, then wait for the process.
    pub fn shutdown(&mut self) -> Result<()> {
        debug!("Shutting down language server");

        self.channel.request::<Shutdown>(())?;
        self.channel.notify::<Exit>(())?;

        match self.process.wait() {
            Ok(status) if !status.success() => {
                warn!(exit_code = ?status.code(), "Language server exited with non-zero status");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to wait for language server exit"),
        }

        Ok(())
    }
}

impl Drop for LspClient {
    fn drop(&mut self) {
        if let Err(e) = self.channel.notify::<Exit>(()) {
            trace!(error = %e, "Exit notification failed during cleanup");
        }

        if let Err(e) = self.process.kill()
            && e.kind() != std::io::ErrorKind::InvalidInput
        {
            warn!(error = %e, "Failed to kill language server during cleanup");
        }

        let _ = self.process.wait();
    }
}

fn negotiated_encoding(result: &InitializeResult) -> PositionEncoding {
    match &result.capabilities.position_encoding {
        Some(kind) if *kind == PositionEncodingKind::UTF8 => PositionEncoding::Utf8,
        _ => PositionEncoding::Utf16,
    }
}

fn reference_params(uri: Uri, position: Position) -> ReferenceParams {
    ReferenceParams {
        text_document_position: TextDocumentPositionParams {
            text_document: TextDocumentIdentifier::new(uri),
            position,
        },
        context: ReferenceContext {
            include_declaration: false,
        },
        work_done_progress_params: WorkDoneProgressParams::default(),
        partial_result_params: PartialResultParams::default(),
    }
}

fn definition_locations(response: GotoDefinitionResponse) -> Vec<Location> {
    match response {
        GotoDefinitionResponse::Scalar(location) => vec![location],
        GotoDefinitionResponse::Array(locations) => locations,
        GotoDefinitionResponse::Link(links) => links
            .into_iter()
            .map(|link| Location {
                uri: link.target_uri,
                range: link.target_selection_range,
            })
            .collect(),
    }
}

/// Convert a filesystem path to a percent-encoded `file://` URI.
pub fn path_to_uri(path: &Path) -> Result<Uri> {
    let absolute = path.canonicalize().map_err(|e| {
        LspError::InvalidPath(format!("cannot canonicalize '{}': {e}", path.display()))
    })?;

    let path_str = absolute.to_str().ok_or_else(|| {
        LspError::InvalidPath(format!("path contains invalid UTF-8: {}", path.display()))
    })?;

    #[cfg(windows)]
    let path_str = format!("/{}", path_str.replace('\\', "/"));

    let uri_string = format!("file://{}", utf8_percent_encode(&path_str, PATH_ESCAPES));

    uri_string
        .parse()
        .map_err(|e| LspError::InvalidPath(format!("invalid URI '{uri_string}': {e}")))
}

/// Convert a `file://` URI back into a filesystem path.
pub fn uri_to_path(uri: &Uri) -> Result<PathBuf> {
    let raw = uri.as_str();
    let encoded = raw
        .strip_prefix("file://")
        .ok_or_else(|| LspError::InvalidPath(format!("not a file URI: {raw}")))?;

    let decoded = percent_decode_str(encoded)
        .decode_utf8()
        .map_err(|e| LspError::InvalidPath(format!("invalid UTF-8 in URI '{raw}': {e}")))?;

    #[cfg(windows)]
    let decoded = decoded.trim_start_matches('/').replace('/', "\\");

    #[cfg(not(windows))]
    let decoded = decoded.into_owned();

    Ok(PathBuf::from(decoded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn frame(message: &Value) -> String {
        let body = serde_json::to_string(message).expect("serialize");
        format!("Content-Length: {}\r\n\r\n{}", body.len(), body)
    }

    fn memory_channel(input: &str) -> JsonRpcChannel<Cursor<Vec<u8>>, Vec<u8>> {
        JsonRpcChannel::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
    }

    fn parse_uri(s: &str) -> Uri {
        s.parse().expect("valid URI")
    }

    fn sample_params() -> ReferenceParams {
        reference_params(parse_uri("file:///src/lib.rs"), Position::new(3, 4))
    }

    // ========================================================================
    // Framing
    // ========================================================================

    #[test]
    fn request_writes_framed_message_and_reads_result() {
        let input = frame(&json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": [{
                "uri": "file:///src/main.rs",
                "range": {"start": {"line": 2, "character": 8}, "end": {"line": 2, "character": 12}},
            }],
        }));
        let mut channel = memory_channel(&input);

        let locations = channel
            .request::<References>(sample_params())
            .expect("should read response")
            .expect("should contain locations");

        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].range.start, Position::new(2, 8));

        let written = String::from_utf8(channel.writer().clone()).expect("utf8");
        assert!(written.starts_with("Content-Length: "));
        assert!(written.contains("\"method\":\"textDocument/references\""));
        assert!(written.contains("\"includeDeclaration\":false"));
    }

    #[test]
    fn notifications_are_skipped_and_server_requests_acknowledged() {
        let input = [
            frame(&json!({"jsonrpc": "2.0", "method": "$/progress", "params": {}})),
            frame(&json!({"jsonrpc": "2.0", "id": 99, "method": "window/workDoneProgress/create", "params": {}})),
            frame(&json!({"jsonrpc": "2.0", "id": 1, "result": null})),
        ]
        .concat();
        let mut channel = memory_channel(&input);

        channel
            .request::<Shutdown>(())
            .expect("should reach the response");

        let written = String::from_utf8(channel.writer().clone()).expect("utf8");
        assert!(written.contains("\"id\":99"));
        assert!(written.contains("\"result\":null"));
    }

    #[test]
    fn error_response_becomes_server_error() {
        let input = frame(&json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32801, "message": "content modified"},
        }));
        let mut channel = memory_channel(&input);

        let err = channel
            .request::<Shutdown>(())
            .expect_err("should surface error");
        assert!(matches!(err, LspError::ServerError { code: -32801, .. }));
    }

    #[test]
    fn mismatched_id_is_rejected() {
        let input = frame(&json!({"jsonrpc": "2.0", "id": 7, "result": null}));
        let mut channel = memory_channel(&input);

        let err = channel
            .request::<Shutdown>(())
            .expect_err("should reject mismatched id");
        assert!(matches!(
            err,
            LspError::IdMismatch {
                expected: 1,
                actual: 7
            }
        ));
    }

    #[test]
    fn closed_stream_means_server_exited() {
        let mut channel = memory_channel("");
        let err = channel
            .request::<Shutdown>(())
            .expect_err("should detect EOF");
        assert!(matches!(err, LspError::ServerExited));
    }

    #[test]
    fn missing_content_length_is_invalid_header() {
        let mut channel = memory_channel("Content-Type: application/json\r\n\r\n{}");
        let err = channel
            .request::<Shutdown>(())
            .expect_err("should reject header");
        assert!(matches!(err, LspError::InvalidHeader(_)));
    }

    #[test]
    fn header_name_is_case_insensitive() {
        let body = r#"{"jsonrpc":"2.0","id":1,"result":null}"#;
        let input = format!("content-length: {}\r\n\r\n{body}", body.len());
        let mut channel = memory_channel(&input);

        channel
            .request::<Shutdown>(())
            .expect("should accept lowercase header");
    }

    // ========================================================================
    // Responses
    // ========================================================================

    #[test]
    fn definition_links_use_selection_range() {
        use lsp_types::{LocationLink, Range};

        let selection = Range::new(Position::new(4, 7), Position::new(4, 11));
        let link = LocationLink {
            origin_selection_range: None,
            target_uri: parse_uri("file:///target.rs"),
            target_range: Range::default(),
            target_selection_range: selection,
        };

        let locations = definition_locations(GotoDefinitionResponse::Link(vec![link]));
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].range, selection);
    }

    #[test]
    fn definition_array_keeps_every_location() {
        let location = Location {
            uri: parse_uri("file:///a.rs"),
            range: lsp_types::Range::default(),
        };
        let locations =
            definition_locations(GotoDefinitionResponse::Array(vec![location.clone(), location]));
        assert_eq!(locations.len(), 2);
    }

    // ========================================================================
    // Document sync
    // ========================================================================

    fn source(text: &str) -> Arc<SourceFile> {
        Arc::new(SourceFile::parse("handler.rs", text).expect("should parse"))
    }

    fn notifications(channel: &JsonRpcChannel<Cursor<Vec<u8>>, Vec<u8>>) -> String {
        String::from_utf8(channel.writer().clone()).expect("utf8")
    }

    #[test]
    fn first_sync_opens_at_version_one() {
        let mut channel = memory_channel("");
        let mut documents = OpenDocuments::default();
        let uri = parse_uri("file:///src/handler.rs");

        documents
            .sync(&mut channel, uri.clone(), "rust", &source("fn handle() {}\n"))
            .expect("should open");

        let written = notifications(&channel);
        assert!(written.contains("\"method\":\"textDocument/didOpen\""));
        assert!(written.contains("\"version\":1"));
        assert!(written.contains("fn handle() {}"));
        assert_eq!(documents.version(&uri), Some(1));
    }

    #[test]
    fn unchanged_content_is_not_resent() {
        let mut channel = memory_channel("");
        let mut documents = OpenDocuments::default();
        let uri = parse_uri("file:///src/handler.rs");

        documents
            .sync(&mut channel, uri.clone(), "rust", &source("fn handle() {}\n"))
            .expect("should open");
        let after_open = channel.writer().len();

        // A reparse of identical text is a different Arc with the same fingerprint
        documents
            .sync(&mut channel, uri.clone(), "rust", &source("fn handle() {}\n"))
            .expect("should be a no-op");

        assert_eq!(channel.writer().len(), after_open);
        assert_eq!(documents.version(&uri), Some(1));
    }

    #[test]
    fn edited_content_sends_full_change_with_next_version() {
        let mut channel = memory_channel("");
        let mut documents = OpenDocuments::default();
        let uri = parse_uri("file:///src/handler.rs");

        documents
            .sync(&mut channel, uri.clone(), "rust", &source("fn handle() {}\n"))
            .expect("should open");
        let after_open = channel.writer().len();

        let edited = source("fn handle() {}\nfn retry() { handle() }\n");
        documents
            .sync(&mut channel, uri.clone(), "rust", &edited)
            .expect("should change");

        let change = String::from_utf8(channel.writer()[after_open..].to_vec()).expect("utf8");
        assert!(change.contains("\"method\":\"textDocument/didChange\""));
        assert!(change.contains("\"version\":2"));
        assert!(change.contains("fn retry() { handle() }"));
        assert_eq!(documents.version(&uri), Some(2));
        assert_eq!(
            documents.get(&uri).map(|file| file.fingerprint()),
            Some(edited.fingerprint())
        );
    }

    // ========================================================================
    // URIs
    // ========================================================================

    #[test]
    fn path_with_spaces_round_trips_through_uri() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let nested = dir.path().join("my project");
        std::fs::create_dir_all(&nested).expect("create dir");

        let uri = path_to_uri(&nested).expect("should convert");
        assert!(uri.as_str().starts_with("file://"));
        assert!(uri.as_str().contains("my%20project"));

        let back = uri_to_path(&uri).expect("should convert back");
        assert_eq!(back, nested.canonicalize().expect("canonicalize"));
    }

    #[test]
    fn non_file_uri_is_rejected() {
        let uri = parse_uri("https://example.com/a.rs");
        assert!(matches!(uri_to_path(&uri), Err(LspError::InvalidPath(_))));
    }

    #[test]
    fn missing_path_cannot_become_uri() {
        let result = path_to_uri(Path::new("/nonexistent/path/that/does/not/exist"));
        assert!(matches!(result, Err(LspError::InvalidPath(_))));
    }
}
