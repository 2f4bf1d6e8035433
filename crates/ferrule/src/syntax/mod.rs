//! AST node provider: parsed source files and symbol handles.
//!
//! Sources are parsed once with tree-sitter (Rust grammar) and shared through
//! `Arc`, so a [`SourceSet`] snapshot is cheap to take and can be handed to
//! the fallback resolver while the project keeps accepting edits.
//!
//! ## Fingerprints
//!
//! Every [`SourceFile`] carries an `xxh3` hash of its content. Cache keys and
//! cache entries record these hashes so that a result computed against an
//! old version of a file is never served for a newer one.

// Tree-sitter returns usize for positions, but we store u32 for compactness.
// This is safe for practical source files (no file has 4 billion lines).
#![allow(clippy::cast_possible_truncation)]

mod node;

pub use node::{Location, SymbolNode};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{Error, Result};

/// Node kinds that name something in the Rust grammar.
pub(crate) const IDENTIFIER_KINDS: &[&str] = &[
    "identifier",
    "type_identifier",
    "field_identifier",
    "shorthand_field_identifier",
];

/// Compute the content fingerprint used by cache keys.
#[must_use]
pub fn fingerprint(content: &str) -> u64 {
    xxh3_64(content.as_bytes())
}

/// A parsed source file.
pub struct SourceFile {
    path: PathBuf,
    content: String,
    tree: tree_sitter::Tree,
    fingerprint: u64,
}

impl std::fmt::Debug for SourceFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceFile")
            .field("path", &self.path)
            .field("len", &self.content.len())
            .field("fingerprint", &format_args!("{:016x}", self.fingerprint))
            .finish_non_exhaustive()
    }
}

impl SourceFile {
    /// Parse `content` as Rust source.
    ///
    /// Syntax errors do not fail the parse; tree-sitter produces error nodes
    /// and the rest of the file stays usable.
    pub fn parse(path: impl Into<PathBuf>, content: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let content = content.into();

        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&tree_sitter_rust::LANGUAGE.into())
            .map_err(|e| Error::Parser(e.to_string()))?;

        let tree = parser
            .parse(&content, None)
            .ok_or_else(|| Error::Parser(format!("failed to parse {}", path.display())))?;

        if tree.root_node().has_error() {
            debug!(file = %path.display(), "Source contains syntax errors");
        }

        Ok(Self {
            fingerprint: fingerprint(&content),
            path,
            content,
            tree,
        })
    }

    /// Read and parse a file from disk.
    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(path, content)
    }

    /// Path the file was registered under.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Full source text.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Content fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub(crate) fn tree(&self) -> &tree_sitter::Tree {
        &self.tree
    }
}

/// Immutable-by-snapshot collection of parsed files keyed by path.
///
/// Cloning is O(1); edits copy the underlying map only while a snapshot is
/// still alive.
#[derive(Debug, Clone, Default)]
pub struct SourceSet {
    files: Arc<BTreeMap<PathBuf, Arc<SourceFile>>>,
}

impl SourceSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Discover and parse every `.rs` file under `root`.
    ///
    /// Conventions match the usual workspace layout:
    /// - Excludes hidden directories (starting with `.`)
    /// - Excludes build directories (`target/`, `node_modules/`, `vendor/`, ...)
    ///
    /// Files that fail to read are logged and skipped.
    pub fn load_dir(root: &Path) -> Result<Self> {
        let root = root.canonicalize().map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("workspace root not found: {}", root.display()),
            ))
        })?;

        let mut paths = Vec::new();
        walk_dir(&root, &mut paths);

        let parsed: Vec<SourceFile> = paths
            .par_iter()
            .filter_map(|path| match SourceFile::read(path) {
                Ok(file) => Some(file),
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "Failed to load source, skipping");
                    None
                }
            })
            .collect();

        debug!(
            root = %root.display(),
            discovered = paths.len(),
            loaded = parsed.len(),
            "Loaded source set"
        );

        let mut set = Self::new();
        for file in parsed {
            set.insert(file);
        }
        Ok(set)
    }

    /// Add or replace a file, returning the previous version.
    pub fn insert(&mut self, file: SourceFile) -> Option<Arc<SourceFile>> {
        Arc::make_mut(&mut self.files).insert(file.path.clone(), Arc::new(file))
    }

    /// Remove a file, returning it if it was present.
    pub fn remove(&mut self, path: &Path) -> Option<Arc<SourceFile>> {
        Arc::make_mut(&mut self.files).remove(path)
    }

    /// Look up a file by path.
    #[must_use]
    pub fn get(&self, path: &Path) -> Option<&Arc<SourceFile>> {
        self.files.get(path)
    }

    /// Current fingerprint of a file, if loaded.
    #[must_use]
    pub fn fingerprint_of(&self, path: &Path) -> Option<u64> {
        self.files.get(path).map(|f| f.fingerprint)
    }

    /// Iterate files in path order.
    pub fn files(&self) -> impl Iterator<Item = &Arc<SourceFile>> {
        self.files.values()
    }

    /// Number of loaded files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether no files are loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Find the identifier at a 1-indexed position.
    ///
    /// Columns count bytes within the line. Returns `None` when the position
    /// is outside the file or does not land on an identifier.
    #[must_use]
    pub fn node_at(&self, path: &Path, line: u32, column: u32) -> Option<SymbolNode> {
        let file = self.files.get(path)?;
        SymbolNode::at_position(file, line, column)
    }

    /// Every identifier occurrence in a file, in source order.
    #[must_use]
    pub fn identifiers_in(&self, path: &Path) -> Vec<SymbolNode> {
        let Some(file) = self.files.get(path) else {
            return Vec::new();
        };

        let mut found = Vec::new();
        visit_identifiers(file, |node| {
            found.push(SymbolNode::from_syntax(file, node));
        });
        found
    }
}

/// Depth-first walk over every identifier node in a file.
pub(crate) fn visit_identifiers<F>(file: &SourceFile, mut visit: F)
where
    F: FnMut(tree_sitter::Node<'_>),
{
    let mut cursor = file.tree.walk();
    loop {
        let node = cursor.node();
        if IDENTIFIER_KINDS.contains(&node.kind()) {
            visit(node);
        }

        if cursor.goto_first_child() {
            continue;
        }

        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return;
            }
        }
    }
}

/// Recursively collect `.rs` files, skipping unreadable directories.
fn walk_dir(dir: &Path, files: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            warn!(
                directory = %dir.display(),
                error = %e,
                "Cannot read directory, skipping"
            );
            return;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(
                    directory = %dir.display(),
                    error = %e,
                    "Failed to read directory entry, skipping"
                );
                continue;
            }
        };

        let path = entry.path();

        if let Some(name) = path.file_name().and_then(|n| n.to_str())
            && (name.starts_with('.') || is_excluded_dir(name))
        {
            continue;
        }

        if path.is_dir() {
            walk_dir(&path, files);
        } else if path.is_file() && path.extension().is_some_and(|ext| ext == "rs") {
            files.push(path);
        }
    }
}

fn is_excluded_dir(name: &str) -> bool {
    matches!(
        name,
        "target" | "node_modules" | "vendor" | "build" | "dist"
    )
}
