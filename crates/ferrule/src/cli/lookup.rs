//! `ferrule refs` and `ferrule def` command implementation.

use std::path::Path;

use ferrule::{Cancellation, Error, ErrorContext, LookupKind, ReferenceError, ReferenceErrorKind};

use super::Context;
use super::display::print_resolution;

/// Resolve the identifier at `file:line:column`.
pub async fn run(
    context: &Context,
    file: &Path,
    line: u32,
    column: u32,
    kind: LookupKind,
) -> Result<(), Error> {
    let session = context.open().await?;
    let path = context.source_path(file);

    let Some(node) = session.project.node_at(&path, line, column) else {
        session.finish(context);
        return Err(ReferenceError::new(
            ReferenceErrorKind::MalformedRequest,
            "no identifier at this position",
            ErrorContext {
                path: Some(path),
                line: Some(line),
                symbol: None,
            },
            false,
        )
        .into());
    };

    tracing::debug!(symbol = node.text(), kind = %kind, "Resolving");

    let resolution = match session
        .project
        .resolve(&node, kind, &Cancellation::none())
        .await
    {
        Ok(resolution) => resolution,
        Err(e) => {
            session.finish(context);
            return Err(e.into());
        }
    };

    if context.json {
        let json = serde_json::to_string_pretty(&resolution).map_err(std::io::Error::from)?;
        println!("{json}");
    } else {
        print_resolution(node.text(), kind, &resolution);
    }

    session.finish(context);
    Ok(())
}
