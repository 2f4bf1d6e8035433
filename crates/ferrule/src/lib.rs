//! # Ferrule: Resilient Reference Resolution
//!
//! Ferrule answers "where is this symbol used?" and "where is it defined?"
//! for Rust sources. Answers come from a pluggable Lookup Service (normally
//! a language server), and the path there is made robust with a cache,
//! classified retries and a syntax-only fallback.
//!
//! ## Pipeline
//!
//! ```text
//! SymbolNode ─▶ ResolutionCache ─hit─────────────────────────────▶ locations
//!                     │miss
//!                     ▼
//!               run_with_retry ─▶ LookupService ─ok─▶ cache.put ─▶ locations
//!                     │terminal error (unavailable / timeout / cancelled)
//!                     ▼
//!               FallbackResolver (tree-sitter scan) ─▶ cache.put ─▶ locations
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use ferrule::{Project, ResolverConfig};
//! use std::path::Path;
//!
//! # async fn run() -> ferrule::Result<()> {
//! let project = Project::open(Path::new("."), ResolverConfig::default())?;
//! let node = project
//!     .node_at(Path::new("src/lib.rs"), 12, 8)
//!     .expect("identifier at position");
//!
//! // No Lookup Service attached, so this is answered by the fallback
//! let references = project.find_references(&node).await?;
//! println!("{} references", references.len());
//! # Ok(())
//! # }
//! ```

mod batch;
mod cache;
mod classify;
pub mod config;
mod error;
mod fallback;
mod lookup;
pub mod lsp;
mod metrics;
mod resolver;
mod retry;
mod syntax;

pub use batch::{BatchOptions, BatchOutcome, resolve_batch};
pub use cache::{CacheEntry, CacheKey, CacheStats, ResolutionCache};
pub use classify::classify;
pub use config::ResolverConfig;
pub use error::{Error, ErrorContext, ReferenceError, ReferenceErrorKind, Result};
pub use fallback::{FallbackResolver, is_likely_definition, is_likely_reference};
pub use lookup::{BoxError, LookupKind, LookupService};
pub use metrics::{Metrics, MetricsCollector};
pub use resolver::{Resolution, ResolutionSource, Resolver};
pub use retry::{CancelHandle, Cancellation, RetryConfig, RetryOutcome, run_with_retry};
pub use syntax::{Location, SourceFile, SourceSet, SymbolNode, fingerprint};

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info};

/// A set of Rust sources plus the machinery to resolve symbols in them.
///
/// Owns one [`ResolutionCache`] and one [`MetricsCollector`]. Editing the
/// source set through [`Project::update_source`] or
/// [`Project::remove_source`] clears the cache.
pub struct Project {
    root: PathBuf,
    config: ResolverConfig,
    sources: RwLock<SourceSet>,
    cache: ResolutionCache,
    metrics: MetricsCollector,
    service: Option<Arc<dyn LookupService>>,
}

impl Project {
    /// Build a project over already-parsed sources.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `config` fails validation.
    pub fn new(root: impl Into<PathBuf>, sources: SourceSet, config: ResolverConfig) -> Result<Self> {
        config.validate()?;

        let cache = ResolutionCache::new(config.cache.max_entries, config.cache.ttl);

        Ok(Self {
            root: root.into(),
            config,
            sources: RwLock::new(sources),
            cache,
            metrics: MetricsCollector::new(),
            service: None,
        })
    }

    /// Load and parse every `.rs` file under `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if `root` cannot be read or `config` is invalid.
    pub fn open(root: &Path, config: ResolverConfig) -> Result<Self> {
        let sources = SourceSet::load_dir(root)?;
        let root = root.canonicalize()?;
        info!(root = %root.display(), files = sources.len(), "Opened project");
        Self::new(root, sources, config)
    }

    /// Attach the Lookup Service. Without one, every lookup is a fallback.
    #[must_use]
    pub fn with_lookup_service(mut self, service: Arc<dyn LookupService>) -> Self {
        self.service = Some(service);
        self
    }

    /// Workspace root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Whether a Lookup Service is attached.
    #[must_use]
    pub fn has_lookup_service(&self) -> bool {
        self.service.is_some()
    }

    // === Sources ===

    /// Snapshot of the current source set.
    #[must_use]
    pub fn sources(&self) -> SourceSet {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Add or replace a file, then clear the cache.
    pub fn update_source(&self, file: SourceFile) {
        let path = file.path().to_path_buf();
        let replaced = self
            .sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(file)
            .is_some();
        self.cache.clear();
        debug!(path = %path.display(), replaced, "Source updated, cache cleared");
    }

    /// Drop a file, clearing the cache if it was present.
    pub fn remove_source(&self, path: &Path) -> bool {
        let path = self.source_path(path);
        let removed = self
            .sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&path)
            .is_some();
        if removed {
            self.cache.clear();
            debug!(path = %path.display(), "Source removed, cache cleared");
        }
        removed
    }

    /// The identifier at a 1-based position.
    ///
    /// Relative paths are tried as given first, then under the root.
    #[must_use]
    pub fn node_at(&self, path: &Path, line: u32, column: u32) -> Option<SymbolNode> {
        let path = self.source_path(path);
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .node_at(&path, line, column)
    }

    /// Every identifier in a file, in source order.
    #[must_use]
    pub fn identifiers_in(&self, path: &Path) -> Vec<SymbolNode> {
        let path = self.source_path(path);
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .identifiers_in(&path)
    }

    fn source_path(&self, path: &Path) -> PathBuf {
        let sources = self.sources.read().unwrap_or_else(PoisonError::into_inner);
        if path.is_absolute() || sources.get(path).is_some() {
            return path.to_path_buf();
        }
        let joined = self.root.join(path);
        if sources.get(&joined).is_some() {
            return joined;
        }
        // Fall back to the canonical form load_dir stores
        joined.canonicalize().unwrap_or(joined)
    }

    // === Resolution ===

    /// A resolver over a snapshot of the current sources.
    #[must_use]
    pub fn resolver(&self) -> Resolver<'_> {
        Resolver::new(
            &self.cache,
            self.sources(),
            self.service.as_deref(),
            &self.config,
        )
    }

    /// Resolve one symbol, counting it in the metrics when enabled.
    ///
    /// # Errors
    ///
    /// Returns the terminal classified error when the fallback is disabled
    /// or does not apply.
    pub async fn resolve(
        &self,
        node: &SymbolNode,
        kind: LookupKind,
        cancel: &Cancellation,
    ) -> std::result::Result<Resolution, ReferenceError> {
        let resolver = self.resolver();
        if self.config.metrics.enabled {
            self.metrics
                .resolve_with_metrics(&resolver, node, kind, cancel)
                .await
        } else {
            resolver.resolve(node, kind, cancel).await
        }
    }

    /// References to `node`.
    ///
    /// # Errors
    ///
    /// See [`Project::resolve`].
    pub async fn find_references(
        &self,
        node: &SymbolNode,
    ) -> std::result::Result<Vec<Location>, ReferenceError> {
        self.resolve(node, LookupKind::References, &Cancellation::none())
            .await
            .map(|resolution| resolution.locations)
    }

    /// Definition(s) of `node`.
    ///
    /// # Errors
    ///
    /// See [`Project::resolve`].
    pub async fn goto_definition(
        &self,
        node: &SymbolNode,
    ) -> std::result::Result<Vec<Location>, ReferenceError> {
        self.resolve(node, LookupKind::Definition, &Cancellation::none())
            .await
            .map(|resolution| resolution.locations)
    }

    /// Resolve many symbols with the configured concurrency and deadline.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoResolvableTargets`] if none of `targets` can be
    /// attempted.
    pub async fn resolve_batch(&self, targets: &[SymbolNode], kind: LookupKind) -> Result<BatchOutcome> {
        let options = BatchOptions::from_config(&self.config.batch);
        self.resolve_batch_with(targets, kind, &options).await
    }

    /// Resolve many symbols with explicit options.
    ///
    /// # Errors
    ///
    /// See [`Project::resolve_batch`].
    pub async fn resolve_batch_with(
        &self,
        targets: &[SymbolNode],
        kind: LookupKind,
        options: &BatchOptions,
    ) -> Result<BatchOutcome> {
        let metrics = self.config.metrics.enabled.then_some(&self.metrics);
        resolve_batch(&self.resolver(), targets, kind, options, metrics).await
    }

    // === Cache and metrics ===

    /// Cache counters.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop every cached result.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Drop expired cache entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.cache.purge_expired()
    }

    /// Snapshot of the lookup counters.
    #[must_use]
    pub fn metrics(&self) -> Metrics {
        self.metrics.snapshot()
    }

    /// Zero the lookup counters; the cache is untouched.
    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("root", &self.root)
            .field("files", &self.sources().len())
            .field("cache_entries", &self.cache.len())
            .field("lookup_service", &self.service.as_ref().map(|s| s.name().to_string()))
            .finish_non_exhaustive()
    }
}
