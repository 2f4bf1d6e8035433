//! CLI command implementations.

mod display;

pub mod batch;
pub mod config;
pub mod lookup;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use colored::Colorize;
use ferrule::lsp::{LspError, LspLookupService, RustAnalyzerProvider};
use ferrule::{Project, ResolverConfig};

/// Settings shared by every command.
pub struct Context {
    /// Workspace root as given
    pub workspace: PathBuf,
    /// Where the config was (or would be) loaded from
    pub config_path: PathBuf,
    /// Effective configuration
    pub config: ResolverConfig,
    /// Skip the language server
    pub no_lsp: bool,
    /// Print metrics afterwards
    pub stats: bool,
    /// Emit JSON instead of text
    pub json: bool,
}

/// A loaded project and the language server behind it, if one started.
pub struct Session {
    /// The parsed workspace
    pub project: Project,
    server: Option<LspLookupService>,
}

impl Context {
    /// Parse the workspace and start rust-analyzer unless `--no-lsp`.
    ///
    /// A server that cannot be started is reported and the session runs
    /// fallback-only.
    pub async fn open(&self) -> ferrule::Result<Session> {
        let project = Project::open(&self.workspace, self.config.clone())?;

        if self.no_lsp {
            tracing::debug!("Language server disabled, fallback only");
            return Ok(Session {
                project,
                server: None,
            });
        }

        match LspLookupService::spawn(RustAnalyzerProvider::default(), project.root().to_path_buf())
            .await
        {
            Ok(server) => {
                let server = server.with_stall_timeout(self.config.lookup.timeout);
                let project = project.with_lookup_service(Arc::new(server.clone()));
                Ok(Session {
                    project,
                    server: Some(server),
                })
            }
            Err(e @ (LspError::NotFound { .. } | LspError::SpawnFailed { .. })) => {
                eprintln!(
                    "{}: {e}; answering from the syntax scan only",
                    "warning".yellow().bold()
                );
                Ok(Session {
                    project,
                    server: None,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Canonical form of a user-supplied path, matching how sources are keyed.
    pub fn source_path(&self, path: &Path) -> PathBuf {
        path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
    }
}

impl Session {
    /// Print stats if asked, then stop the language server.
    pub fn finish(self, context: &Context) {
        if context.stats {
            display::print_stats(&self.project.metrics(), &self.project.cache_stats(), context.json);
        }

        if let Some(server) = self.server
            && let Err(e) = server.shutdown()
        {
            tracing::debug!(error = %e, "Language server did not shut down cleanly");
        }
    }
}
