//! `ferrule batch` command implementation.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use colored::Colorize;
use ferrule::{BatchOptions, CacheKey, Error, Location, LookupKind, SymbolNode};
use serde::Serialize;

use super::Context;
use super::display::{display_path, print_locations};

/// One resolved identifier, for JSON output.
#[derive(Serialize)]
struct Entry<'a> {
    symbol: &'a str,
    line: u32,
    column: u32,
    locations: &'a [Location],
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Resolve every identifier in `file`.
pub async fn run(
    context: &Context,
    file: &Path,
    kind: LookupKind,
    concurrency: Option<usize>,
    timeout: Option<Duration>,
) -> Result<(), Error> {
    let session = context.open().await?;
    let path = context.source_path(file);

    let targets = session.project.identifiers_in(&path);
    if targets.is_empty() && session.project.sources().get(&path).is_none() {
        session.finish(context);
        return Err(Error::NoResolvableTargets(format!(
            "{} is not a parsed source in the workspace",
            file.display()
        )));
    }

    let mut options = BatchOptions::from_config(&context.config.batch);
    if let Some(concurrency) = concurrency {
        options = options.with_concurrency(concurrency);
    }
    if let Some(timeout) = timeout {
        options = options.with_deadline(Some(timeout));
    }

    let outcome = match session
        .project
        .resolve_batch_with(&targets, kind, &options)
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            session.finish(context);
            return Err(e);
        }
    };

    // Unique keys in source order
    let mut nodes: HashMap<CacheKey, &SymbolNode> = HashMap::new();
    for node in &targets {
        nodes.entry(CacheKey::for_node(node, kind)).or_insert(node);
    }
    let mut keys: Vec<&CacheKey> = outcome.results.keys().collect();
    keys.sort();

    if context.json {
        let entries: Vec<Entry<'_>> = keys
            .iter()
            .filter_map(|key| {
                let node = nodes.get(*key)?;
                Some(Entry {
                    symbol: node.text(),
                    line: key.line(),
                    column: key.column(),
                    locations: &outcome.results[*key],
                    error: outcome.failures.get(*key).map(ToString::to_string),
                })
            })
            .collect();
        let json = serde_json::to_string_pretty(&entries).map_err(std::io::Error::from)?;
        println!("{json}");
    } else {
        println!(
            "Resolved {} identifiers in {}: {} from cache, {} from the language server, {} from the syntax fallback, {} failed",
            outcome.len().to_string().green().bold(),
            display_path(&path),
            outcome.cache_hits,
            outcome.resolved,
            outcome.fallbacks,
            outcome.failures.len().to_string().red()
        );
        if outcome.deadline_exceeded {
            println!(
                "  {}: batch deadline passed; remaining lookups used the fallback",
                "Warning".yellow().bold()
            );
        }
        println!();

        for key in keys {
            let Some(node) = nodes.get(key) else { continue };
            println!(
                "{}:{} `{}`",
                key.line(),
                key.column(),
                node.text().white().bold()
            );
            if let Some(error) = outcome.failures.get(key) {
                println!("  {} {error}", "✗".red());
            } else {
                print_locations(&outcome.results[key], "  ");
            }
        }
    }

    session.finish(context);
    Ok(())
}
