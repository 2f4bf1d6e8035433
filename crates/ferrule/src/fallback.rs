//! Service-free heuristic resolution.
//!
//! When the Lookup Service is down, the fallback scans already-parsed files
//! for identifiers with the same text as the target and keeps the ones whose
//! syntactic position makes them a plausible reference (or definition).
//!
//! ## Plausibility
//!
//! | Parent construct                                  | Verdict                  |
//! |---------------------------------------------------|--------------------------|
//! | declaration, node in its name/pattern slot        | definition               |
//! | declaration, node elsewhere (a type, a value)     | reference                |
//! | expression, call, path, type, `use` specifier     | reference                |
//! | destructuring pattern                             | neither (ambiguous)      |
//! | anything else                                     | neither                  |
//!
//! Scope is ignored: two unrelated `parse` functions look identical here.

use rayon::prelude::*;
use tracing::debug;

use crate::lookup::LookupKind;
use crate::syntax::{Location, SourceSet, SymbolNode, visit_identifiers};

/// Declarations whose `name` field introduces a symbol.
const NAMED_DECLARATIONS: &[&str] = &[
    "function_item",
    "function_signature_item",
    "struct_item",
    "enum_item",
    "union_item",
    "trait_item",
    "type_item",
    "const_item",
    "static_item",
    "mod_item",
    "macro_definition",
    "enum_variant",
    "field_declaration",
    "associated_type",
    "type_parameter",
    "const_parameter",
];

/// Declarations whose `pattern` field binds a symbol.
const PATTERN_DECLARATIONS: &[&str] = &["let_declaration", "parameter", "for_expression"];

/// Destructuring shapes where an identifier may bind or match.
const AMBIGUOUS_PATTERNS: &[&str] = &[
    "tuple_pattern",
    "tuple_struct_pattern",
    "struct_pattern",
    "slice_pattern",
    "or_pattern",
    "field_pattern",
    "ref_pattern",
    "mut_pattern",
    "captured_pattern",
    "match_pattern",
];

/// Parents that use a symbol without declaring it.
const REFERENCE_CONTEXTS: &[&str] = &[
    // calls and operators
    "call_expression",
    "arguments",
    "binary_expression",
    "unary_expression",
    "assignment_expression",
    "compound_assignment_expr",
    "reference_expression",
    "index_expression",
    "range_expression",
    "type_cast_expression",
    "try_expression",
    "await_expression",
    "parenthesized_expression",
    "tuple_expression",
    "array_expression",
    "return_expression",
    "field_expression",
    "expression_statement",
    "block",
    "if_expression",
    "while_expression",
    "match_expression",
    "closure_expression",
    "macro_invocation",
    "token_tree",
    // paths
    "scoped_identifier",
    "scoped_type_identifier",
    // struct literals
    "struct_expression",
    "field_initializer",
    "shorthand_field_initializer",
    // types
    "generic_type",
    "type_arguments",
    "reference_type",
    "pointer_type",
    "array_type",
    "tuple_type",
    "abstract_type",
    "dynamic_type",
    "bounded_type",
    "trait_bounds",
    "impl_item",
    // imports
    "use_declaration",
    "use_list",
    "scoped_use_list",
    "use_wildcard",
];

/// Syntactic role of an identifier occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Definition,
    Reference,
    Ambiguous,
}

fn role(node: tree_sitter::Node<'_>) -> Role {
    let Some(parent) = node.parent() else {
        return Role::Ambiguous;
    };
    let kind = parent.kind();

    if AMBIGUOUS_PATTERNS.contains(&kind) {
        return Role::Ambiguous;
    }

    if NAMED_DECLARATIONS.contains(&kind) {
        return slot_role(parent, node, "name");
    }

    if PATTERN_DECLARATIONS.contains(&kind) {
        return slot_role(parent, node, "pattern");
    }

    match kind {
        "closure_parameters" => Role::Definition,
        "use_as_clause" => slot_role(parent, node, "alias"),
        _ if REFERENCE_CONTEXTS.contains(&kind) => Role::Reference,
        _ => Role::Ambiguous,
    }
}

/// Definition if `node` fills `field` of `parent`, otherwise a reference
/// (a type annotation, an initializer, a return type).
fn slot_role(parent: tree_sitter::Node<'_>, node: tree_sitter::Node<'_>, field: &str) -> Role {
    match parent.child_by_field_name(field) {
        Some(slot) if slot.id() == node.id() => Role::Definition,
        _ => Role::Reference,
    }
}

/// Whether `node` looks like the declaration of its name.
#[must_use]
pub fn is_likely_definition(node: &SymbolNode) -> bool {
    node.with_syntax(role) == Some(Role::Definition)
}

/// Whether `node` looks like a use of its name.
#[must_use]
pub fn is_likely_reference(node: &SymbolNode) -> bool {
    node.with_syntax(role) == Some(Role::Reference)
}

/// Heuristic resolver over a snapshot of the project's sources.
pub struct FallbackResolver<'a> {
    sources: &'a SourceSet,
    max_results: usize,
}

impl<'a> FallbackResolver<'a> {
    /// Scan `sources`, returning at most `max_results` locations per query.
    #[must_use]
    pub fn new(sources: &'a SourceSet, max_results: usize) -> Self {
        Self {
            sources,
            max_results,
        }
    }

    /// Plausible references to the target's name, excluding the target.
    #[must_use]
    pub fn resolve_references(&self, target: &SymbolNode) -> Vec<Location> {
        self.scan(target, Role::Reference)
    }

    /// Plausible definitions of the target's name.
    #[must_use]
    pub fn resolve_definition(&self, target: &SymbolNode) -> Vec<Location> {
        self.scan(target, Role::Definition)
    }

    /// Dispatch by lookup kind.
    #[must_use]
    pub fn resolve(&self, target: &SymbolNode, kind: LookupKind) -> Vec<Location> {
        match kind {
            LookupKind::References => self.resolve_references(target),
            LookupKind::Definition => self.resolve_definition(target),
        }
    }

    fn scan(&self, target: &SymbolNode, wanted: Role) -> Vec<Location> {
        let name = target.text();
        if name.is_empty() || self.max_results == 0 {
            return Vec::new();
        }

        let files: Vec<_> = self
            .sources
            .files()
            .filter(|file| file.content().contains(name))
            .collect();

        let per_file: Vec<Vec<Location>> = files
            .par_iter()
            .map(|file| {
                let mut found = Vec::new();
                visit_identifiers(file, |node| {
                    if node.utf8_text(file.content().as_bytes()).ok() != Some(name) {
                        return;
                    }
                    let symbol = SymbolNode::from_syntax(file, node);
                    let is_target = symbol.path() == target.path()
                        && symbol.line() == target.line()
                        && symbol.column() == target.column();
                    if !is_target && role(node) == wanted {
                        found.push(symbol.to_location());
                    }
                });
                found
            })
            .collect();

        let mut locations: Vec<Location> = per_file.into_iter().flatten().collect();
        locations.sort();
        locations.truncate(self.max_results);

        debug!(
            symbol = name,
            role = ?wanted,
            files_scanned = files.len(),
            matches = locations.len(),
            "Fallback scan complete"
        );

        locations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::SourceFile;
    use rstest::rstest;
    use std::path::Path;

    const LIB: &str = "\
pub struct Config {
    pub retries: u32,
}

pub fn load(path: &str) -> Config {
    let config = Config { retries: 3 };
    let (left, right) = split(path);
    config
}

fn split(path: &str) -> (&str, &str) {
    path.split_at(1)
}
";

    const MAIN: &str = "\
use crate::lib::{load, Config};

fn main() {
    let config: Config = load(\"x\");
    println!(\"{}\", config.retries);
}
";

    fn sources() -> SourceSet {
        let mut set = SourceSet::new();
        set.insert(SourceFile::parse("lib.rs", LIB).expect("should parse"));
        set.insert(SourceFile::parse("main.rs", MAIN).expect("should parse"));
        set
    }

    fn node(set: &SourceSet, path: &str, line: u32, column: u32) -> SymbolNode {
        set.node_at(Path::new(path), line, column)
            .unwrap_or_else(|| panic!("no identifier at {path}:{line}:{column}"))
    }

    // ========================================================================
    // Predicates
    // ========================================================================

    #[rstest]
    #[case::struct_name("lib.rs", 1, 12, true, false)]
    #[case::field_name("lib.rs", 2, 9, true, false)]
    #[case::fn_name("lib.rs", 5, 8, true, false)]
    #[case::parameter("lib.rs", 5, 13, true, false)]
    #[case::return_type("lib.rs", 5, 28, false, true)]
    #[case::let_binding("lib.rs", 6, 9, true, false)]
    #[case::struct_literal("lib.rs", 6, 18, false, true)]
    #[case::tuple_destructure("lib.rs", 7, 10, false, false)]
    #[case::call_argument("lib.rs", 7, 31, false, true)]
    #[case::tail_expression("lib.rs", 8, 5, false, true)]
    #[case::use_specifier("main.rs", 1, 18, false, true)]
    #[case::type_annotation("main.rs", 4, 17, false, true)]
    #[case::call_target("main.rs", 4, 26, false, true)]
    fn classifies_by_syntactic_position(
        #[case] path: &str,
        #[case] line: u32,
        #[case] column: u32,
        #[case] definition: bool,
        #[case] reference: bool,
    ) {
        let set = sources();
        let target = node(&set, path, line, column);

        assert_eq!(is_likely_definition(&target), definition, "{target:?}");
        assert_eq!(is_likely_reference(&target), reference, "{target:?}");
    }

    // ========================================================================
    // Scans
    // ========================================================================

    #[test]
    fn references_span_files_and_skip_definitions() {
        let set = sources();
        let target = node(&set, "lib.rs", 1, 12);

        let found = FallbackResolver::new(&set, 100).resolve_references(&target);

        let positions: Vec<String> = found.iter().map(ToString::to_string).collect();
        assert_eq!(
            positions,
            vec!["lib.rs:5:28", "lib.rs:6:18", "main.rs:1:24", "main.rs:4:17"]
        );
        assert!(found.iter().all(|l| l.text == "Config"));
    }

    #[test]
    fn definition_scan_finds_declaration() {
        let set = sources();
        let target = node(&set, "main.rs", 4, 26);

        let found = FallbackResolver::new(&set, 100).resolve_definition(&target);

        assert_eq!(found, vec![Location::new("lib.rs", 5, 8, "load")]);
    }

    #[test]
    fn results_are_capped() {
        let set = sources();
        let target = node(&set, "lib.rs", 1, 12);

        let found = FallbackResolver::new(&set, 2).resolve(&target, LookupKind::References);

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].to_string(), "lib.rs:5:28");
    }

    #[test]
    fn unknown_name_yields_nothing() {
        let mut set = sources();
        set.insert(SourceFile::parse("other.rs", "fn lonely() {}").expect("should parse"));
        let target = node(&set, "other.rs", 1, 4);

        assert!(FallbackResolver::new(&set, 100).resolve_references(&target).is_empty());
    }
}
