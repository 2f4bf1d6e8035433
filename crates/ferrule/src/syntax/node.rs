//! Owned symbol handles and result locations.

use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{IDENTIFIER_KINDS, SourceFile};

/// A resolved occurrence of a symbol.
///
/// Ordered by path, then line, then column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location {
    /// File containing the occurrence
    pub path: PathBuf,
    /// 1-indexed line
    pub line: u32,
    /// 1-indexed column (bytes)
    pub column: u32,
    /// Literal text at the location
    pub text: String,
}

impl Location {
    /// Create a location.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, line: u32, column: u32, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            line,
            column,
            text: text.into(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.path.display(), self.line, self.column)
    }
}

/// Handle to a syntax node inside a shared [`SourceFile`].
///
/// Tree-sitter nodes borrow their tree, so this handle stores the file plus
/// the node's byte range and kind, and re-locates the node on demand. It is
/// `Send + Sync` and can cross `.await` points freely.
#[derive(Clone)]
pub struct SymbolNode {
    file: Arc<SourceFile>,
    kind: &'static str,
    byte_range: Range<usize>,
    line: u32,
    column: u32,
}

impl fmt::Debug for SymbolNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymbolNode")
            .field("path", &self.file.path())
            .field("kind", &self.kind)
            .field("line", &self.line)
            .field("column", &self.column)
            .field("text", &self.text())
            .finish()
    }
}

impl SymbolNode {
    pub(crate) fn from_syntax(file: &Arc<SourceFile>, node: tree_sitter::Node<'_>) -> Self {
        let start = node.start_position();
        Self {
            file: Arc::clone(file),
            kind: node.kind(),
            byte_range: node.byte_range(),
            line: start.row as u32 + 1,
            column: start.column as u32 + 1,
        }
    }

    pub(crate) fn at_position(file: &Arc<SourceFile>, line: u32, column: u32) -> Option<Self> {
        if line == 0 || column == 0 {
            return None;
        }

        let point = tree_sitter::Point::new((line - 1) as usize, (column - 1) as usize);
        let node = file
            .tree()
            .root_node()
            .named_descendant_for_point_range(point, point)?;

        IDENTIFIER_KINDS
            .contains(&node.kind())
            .then(|| Self::from_syntax(file, node))
    }

    /// File containing the node.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// 1-indexed line of the node start.
    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }

    /// 1-indexed column of the node start.
    #[must_use]
    pub fn column(&self) -> u32 {
        self.column
    }

    /// Grammar kind, e.g. `identifier`.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Literal source text of the node.
    ///
    /// Empty if the byte range does not fall on UTF-8 boundaries.
    #[must_use]
    pub fn text(&self) -> &str {
        self.file
            .content()
            .get(self.byte_range.clone())
            .unwrap_or_default()
    }

    /// Whether the node names something (identifier-like kind).
    #[must_use]
    pub fn is_identifier(&self) -> bool {
        IDENTIFIER_KINDS.contains(&self.kind)
    }

    /// Fingerprint of the containing file's content.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        self.file.fingerprint()
    }

    /// The file the node belongs to.
    #[must_use]
    pub fn file(&self) -> &Arc<SourceFile> {
        &self.file
    }

    /// Immediate parent node.
    #[must_use]
    pub fn parent(&self) -> Option<SymbolNode> {
        self.with_syntax(|node| node.parent().map(|p| Self::from_syntax(&self.file, p)))
            .flatten()
    }

    /// Parent chain, nearest first, ending at the root.
    #[must_use]
    pub fn ancestors(&self) -> Vec<SymbolNode> {
        self.with_syntax(|node| {
            let mut chain = Vec::new();
            let mut current = node.parent();
            while let Some(parent) = current {
                chain.push(Self::from_syntax(&self.file, parent));
                current = parent.parent();
            }
            chain
        })
        .unwrap_or_default()
    }

    /// Location of this occurrence.
    #[must_use]
    pub fn to_location(&self) -> Location {
        Location::new(self.path(), self.line, self.column, self.text())
    }

    /// Run `f` against the live tree-sitter node.
    pub(crate) fn with_syntax<R>(&self, f: impl FnOnce(tree_sitter::Node<'_>) -> R) -> Option<R> {
        self.locate().map(f)
    }

    /// Descend from the root to the node with the stored range and kind.
    fn locate(&self) -> Option<tree_sitter::Node<'_>> {
        let mut node = self.file.tree().root_node();
        loop {
            if node.byte_range() == self.byte_range && node.kind() == self.kind {
                return Some(node);
            }

            let mut cursor = node.walk();
            let next = node.children(&mut cursor).find(|child| {
                child.start_byte() <= self.byte_range.start
                    && self.byte_range.end <= child.end_byte()
            });
            node = next?;
        }
    }
}
