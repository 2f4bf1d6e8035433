//! Common display utilities for CLI commands.

use std::path::Path;

use colored::Colorize;
use ferrule::{CacheStats, Location, LookupKind, Metrics, Resolution, ResolutionSource};

/// Path relative to the current directory when possible.
pub fn display_path(path: &Path) -> String {
    std::env::current_dir()
        .ok()
        .and_then(|cwd| path.strip_prefix(cwd).ok().map(Path::to_path_buf))
        .unwrap_or_else(|| path.to_path_buf())
        .display()
        .to_string()
}

fn source_label(source: ResolutionSource) -> colored::ColoredString {
    match source {
        ResolutionSource::Cache => "cache".dimmed(),
        ResolutionSource::LookupService => "language server".green(),
        ResolutionSource::Fallback => "syntax fallback".yellow(),
    }
}

fn noun(kind: LookupKind, count: usize) -> &'static str {
    match (kind, count) {
        (LookupKind::References, 1) => "reference",
        (LookupKind::References, _) => "references",
        (LookupKind::Definition, 1) => "definition",
        (LookupKind::Definition, _) => "definitions",
    }
}

/// One location per line: `path:line:col  snippet`.
pub fn print_locations(locations: &[Location], indent: &str) {
    for location in locations {
        println!(
            "{indent}{} {}:{}:{}  {}",
            "•".dimmed(),
            display_path(&location.path),
            location.line,
            location.column,
            location.text.cyan()
        );
    }
}

/// Header plus locations for a single lookup.
pub fn print_resolution(symbol: &str, kind: LookupKind, resolution: &Resolution) {
    let count = resolution.locations.len();

    if count == 0 {
        println!(
            "No {} found for `{}` ({})",
            noun(kind, 0),
            symbol.cyan(),
            source_label(resolution.source)
        );
        return;
    }

    println!(
        "Found {} {} for `{}` ({})",
        count.to_string().green().bold(),
        noun(kind, count),
        symbol.cyan(),
        source_label(resolution.source)
    );
    println!();
    print_locations(&resolution.locations, "  ");

    if resolution.source == ResolutionSource::Fallback {
        println!();
        println!(
            "{}: fallback results match by name only and may include unrelated symbols.",
            "hint".dimmed()
        );
    }
}

/// Metrics and cache counters.
pub fn print_stats(metrics: &Metrics, cache: &CacheStats, json: bool) {
    if json {
        let value = serde_json::json!({ "metrics": metrics, "cache": cache });
        println!("{value}");
        return;
    }

    println!();
    println!("{}", "Lookup Statistics".cyan().bold());
    println!("  {}: {metrics}", "Metrics".white().bold());
    println!(
        "  {}: {} entries (max {}), {} expired, {} stale, {} evicted",
        "Cache".white().bold(),
        cache.entries.to_string().green(),
        cache.max_entries,
        cache.expired,
        cache.stale,
        cache.evicted
    );
}
