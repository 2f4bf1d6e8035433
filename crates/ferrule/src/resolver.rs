//! The single-lookup pipeline.
//!
//! ```text
//! cache ──hit──────────────────────────────────────────────▶ Resolution(Cache)
//!   │miss
//!   ▼
//! retry loop ─▶ Lookup Service (per-call timeout) ──ok──▶ cache.put ─▶ Resolution(LookupService)
//!   │terminal error
//!   ├─ fallback enabled and service-side failure ─▶ scan ─▶ cache.put ─▶ Resolution(Fallback)
//!   └─ otherwise ─────────────────────────────────────────▶ ReferenceError
//! ```
//!
//! Each stage runs strictly after the previous one.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::cache::{CacheKey, ResolutionCache};
use crate::config::ResolverConfig;
use crate::error::{ErrorContext, ReferenceError};
use crate::fallback::FallbackResolver;
use crate::lookup::{BoxError, LookupKind, LookupService, lookup};
use crate::retry::{Cancellation, run_with_retry};
use crate::syntax::{Location, SourceSet, SymbolNode};

/// Where a result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    /// Served from the resolution cache
    Cache,
    /// Answered by the Lookup Service
    LookupService,
    /// Produced by the heuristic scan
    Fallback,
}

/// A successful lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    /// Locations in path, line, column order
    pub locations: Vec<Location>,
    /// Which stage produced them
    pub source: ResolutionSource,
    /// Lookup Service invocations spent on this lookup
    pub lookup_calls: u32,
}

/// Outcome plus its cost, for metrics.
#[derive(Debug)]
pub(crate) struct Attempt {
    pub(crate) outcome: Result<Resolution, ReferenceError>,
    pub(crate) lookup_calls: u32,
}

/// Borrowed view of a project's resolution machinery.
///
/// Holds a snapshot of the source set, so edits made while a lookup is in
/// flight do not affect it.
pub struct Resolver<'p> {
    cache: &'p ResolutionCache,
    sources: SourceSet,
    service: Option<&'p dyn LookupService>,
    config: &'p ResolverConfig,
}

impl<'p> Resolver<'p> {
    /// Assemble a resolver.
    #[must_use]
    pub fn new(
        cache: &'p ResolutionCache,
        sources: SourceSet,
        service: Option<&'p dyn LookupService>,
        config: &'p ResolverConfig,
    ) -> Self {
        Self {
            cache,
            sources,
            service,
            config,
        }
    }

    /// The source snapshot this resolver works against.
    #[must_use]
    pub fn sources(&self) -> &SourceSet {
        &self.sources
    }

    /// Resolve one symbol through cache, service and fallback.
    ///
    /// # Errors
    ///
    /// Returns the terminal classified error when the service fails and the
    /// fallback is disabled or not applicable to the failure.
    pub async fn resolve(
        &self,
        node: &SymbolNode,
        kind: LookupKind,
        cancel: &Cancellation,
    ) -> Result<Resolution, ReferenceError> {
        self.attempt(node, kind, cancel).await.outcome
    }

    /// A live, current cache entry for `key`.
    #[must_use]
    pub fn cached(&self, key: &CacheKey) -> Option<Vec<Location>> {
        if !self.config.cache.enabled {
            return None;
        }

        let sources = &self.sources;
        let entry = self
            .cache
            .get_current(key, |path, fingerprint| {
                sources.fingerprint_of(path) == Some(fingerprint)
            })?;

        debug!(key = %key, "Cache hit");
        Some(entry.locations().to_vec())
    }

    pub(crate) async fn attempt(
        &self,
        node: &SymbolNode,
        kind: LookupKind,
        cancel: &Cancellation,
    ) -> Attempt {
        let key = CacheKey::for_node(node, kind);

        if let Some(locations) = self.cached(&key) {
            return Attempt {
                outcome: Ok(Resolution {
                    locations,
                    source: ResolutionSource::Cache,
                    lookup_calls: 0,
                }),
                lookup_calls: 0,
            };
        }

        self.resolve_miss(node, &key, kind, cancel).await
    }

    /// Run the service and fallback stages for a key known to be missing.
    pub(crate) async fn resolve_miss(
        &self,
        node: &SymbolNode,
        key: &CacheKey,
        kind: LookupKind,
        cancel: &Cancellation,
    ) -> Attempt {
        let context = ErrorContext::from_node(node);

        let (result, lookup_calls) = match self.service {
            None => (Err(ReferenceError::no_service(context)), 0),
            Some(service) => {
                let timeout = self.config.lookup.timeout;
                let outcome = run_with_retry(&self.config.retry, cancel, &context, move |attempt| async move {
                    trace!(attempt, service = service.name(), symbol = node.text(), "Calling lookup service");
                    match tokio::time::timeout(timeout, lookup(service, kind, node)).await {
                        Ok(result) => result,
                        Err(elapsed) => Err(Box::new(elapsed) as BoxError),
                    }
                })
                .await;
                (outcome.result, outcome.attempts)
            }
        };

        let outcome = match result {
            Ok(mut locations) => {
                self.hydrate(&mut locations);
                locations.sort();
                locations.dedup();
                self.store(key, &locations);
                Ok(Resolution {
                    locations,
                    source: ResolutionSource::LookupService,
                    lookup_calls,
                })
            }
            Err(error) if self.config.fallback.enabled && error.should_use_fallback() => {
                warn!(
                    kind = %error.kind,
                    symbol = node.text(),
                    file = %node.path().display(),
                    retries = error.retry_count,
                    "Lookup service failed, using fallback"
                );
                let locations = FallbackResolver::new(&self.sources, self.config.fallback.max_results)
                    .resolve(node, kind);
                if !locations.is_empty() {
                    self.store(key, &locations);
                }
                Ok(Resolution {
                    locations,
                    source: ResolutionSource::Fallback,
                    lookup_calls,
                })
            }
            Err(error) => {
                warn!(
                    kind = %error.kind,
                    symbol = node.text(),
                    file = %node.path().display(),
                    retries = error.retry_count,
                    "Lookup failed"
                );
                Err(error)
            }
        };

        Attempt {
            outcome,
            lookup_calls,
        }
    }

    /// Fill in snippet text the service did not provide.
    fn hydrate(&self, locations: &mut [Location]) {
        for location in locations.iter_mut().filter(|l| l.text.is_empty()) {
            if let Some(node) = self
                .sources
                .node_at(&location.path, location.line, location.column)
            {
                location.text = node.text().to_string();
            }
        }
    }

    fn store(&self, key: &CacheKey, locations: &[Location]) {
        if !self.config.cache.enabled {
            return;
        }

        let fingerprints: BTreeMap<_, _> = locations
            .iter()
            .filter_map(|l| {
                self.sources
                    .fingerprint_of(&l.path)
                    .map(|fingerprint| (l.path.clone(), fingerprint))
            })
            .collect();

        self.cache
            .put_with_fingerprints(key.clone(), locations.to_vec(), fingerprints);
    }
}
