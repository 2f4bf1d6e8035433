//! Many-target resolution with a concurrency bound and a shared deadline.
//!
//! ```text
//! targets ─▶ dedupe by key ─▶ filter unattemptable ─▶ cache pass ─▶ misses
//!                                                                    │
//!                        buffer_unordered(concurrency) ◀─────────────┘
//!                                    │
//!                    each miss: retry ▶ fallback (same as a single lookup)
//! ```
//!
//! The deadline becomes part of every miss's [`Cancellation`]. Once it
//! passes, in-flight retries abort and targets not yet started skip the
//! Lookup Service, so both end up on the fallback path.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::cache::CacheKey;
use crate::config::BatchConfig;
use crate::error::{Error, ErrorContext, ReferenceError, ReferenceErrorKind, Result};
use crate::lookup::LookupKind;
use crate::metrics::MetricsCollector;
use crate::resolver::{Attempt, Resolution, ResolutionSource, Resolver};
use crate::retry::Cancellation;
use crate::syntax::{Location, SymbolNode};

/// Knobs for one batch.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Maximum lookups in flight at once (values below 1 are treated as 1)
    pub concurrency: usize,
    /// Whole-batch time limit, measured from the call
    pub deadline: Option<Duration>,
    /// External cancellation shared with the caller
    pub cancel: Cancellation,
}

impl BatchOptions {
    /// Concurrency and deadline from the `batch:` config section.
    #[must_use]
    pub fn from_config(config: &BatchConfig) -> Self {
        Self {
            concurrency: config.size,
            deadline: config.timeout,
            cancel: Cancellation::none(),
        }
    }

    /// Replace the concurrency bound.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Replace the deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Attach a caller-controlled cancellation.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::from_config(&BatchConfig::default())
    }
}

/// Results keyed by the unique input keys.
///
/// Every unique key appears in `results`; keys that failed map to an empty
/// list and have a matching entry in `failures`.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Locations per key
    pub results: HashMap<CacheKey, Vec<Location>>,
    /// Terminal errors per key
    pub failures: HashMap<CacheKey, ReferenceError>,
    /// Keys served from the cache without a lookup
    pub cache_hits: usize,
    /// Keys answered by the Lookup Service
    pub resolved: usize,
    /// Keys answered by the fallback
    pub fallbacks: usize,
    /// Whether the deadline passed before the batch finished
    pub deadline_exceeded: bool,
}

impl BatchOutcome {
    /// Number of unique keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether the batch had no targets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    fn absorb(&mut self, key: CacheKey, outcome: std::result::Result<Resolution, ReferenceError>) {
        match outcome {
            Ok(resolution) => {
                match resolution.source {
                    ResolutionSource::Cache => self.cache_hits += 1,
                    ResolutionSource::LookupService => self.resolved += 1,
                    ResolutionSource::Fallback => self.fallbacks += 1,
                }
                self.results.insert(key, resolution.locations);
            }
            Err(error) => {
                self.results.insert(key.clone(), Vec::new());
                self.failures.insert(key, error);
            }
        }
    }
}

/// Resolve every target, isolating per-target failures.
///
/// # Errors
///
/// Returns [`Error::NoResolvableTargets`] when targets were given but none
/// of them can be attempted (their files are not part of the resolver's
/// sources, or they are not identifiers).
pub async fn resolve_batch(
    resolver: &Resolver<'_>,
    targets: &[SymbolNode],
    kind: LookupKind,
    options: &BatchOptions,
    metrics: Option<&MetricsCollector>,
) -> Result<BatchOutcome> {
    let mut outcome = BatchOutcome::default();
    if targets.is_empty() {
        return Ok(outcome);
    }

    let started = Instant::now();
    let deadline = options.deadline.map(|limit| started + limit);
    let cancel = match deadline {
        Some(deadline) => options.cancel.clone().with_deadline(deadline),
        None => options.cancel.clone(),
    };

    // Dedupe, keeping the first node for each key
    let mut unique: Vec<(CacheKey, &SymbolNode)> = Vec::new();
    let mut seen = HashSet::new();
    for node in targets {
        let key = CacheKey::for_node(node, kind);
        if seen.insert(key.clone()) {
            unique.push((key, node));
        }
    }

    let (attemptable, rejected): (Vec<_>, Vec<_>) = unique
        .into_iter()
        .partition(|(_, node)| rejection(resolver, node).is_none());

    if attemptable.is_empty() {
        return Err(Error::NoResolvableTargets(format!(
            "none of the {} target(s) belong to the loaded sources",
            rejected.len()
        )));
    }

    for (key, node) in rejected {
        let error = rejection(resolver, node).unwrap_or(ReferenceErrorKind::Unknown);
        debug!(key = %key, kind = %error, "Skipping unattemptable target");
        outcome.absorb(
            key,
            Err(ReferenceError::new(
                error,
                format!("cannot resolve `{}`", node.text()),
                ErrorContext::from_node(node),
                false,
            )),
        );
    }

    // Cache pass
    let mut misses = Vec::new();
    for (key, node) in attemptable {
        let began = Instant::now();
        match resolver.cached(&key) {
            Some(locations) => {
                let attempt = Attempt {
                    outcome: Ok(Resolution {
                        locations,
                        source: ResolutionSource::Cache,
                        lookup_calls: 0,
                    }),
                    lookup_calls: 0,
                };
                if let Some(metrics) = metrics {
                    metrics.record(&attempt, began.elapsed());
                }
                outcome.absorb(key, attempt.outcome);
            }
            None => misses.push((key, node)),
        }
    }

    debug!(
        targets = targets.len(),
        unique = outcome.len() + misses.len(),
        cache_hits = outcome.cache_hits,
        misses = misses.len(),
        "Batch cache pass complete"
    );

    let cancel = &cancel;
    let finished: Vec<(CacheKey, Attempt, Duration)> = stream::iter(misses)
        .map(move |(key, node)| async move {
            let began = Instant::now();
            let attempt = resolver.resolve_miss(node, &key, kind, cancel).await;
            (key, attempt, began.elapsed())
        })
        .buffer_unordered(options.concurrency.max(1))
        .collect()
        .await;

    for (key, attempt, elapsed) in finished {
        if let Some(metrics) = metrics {
            metrics.record(&attempt, elapsed);
        }
        outcome.absorb(key, attempt.outcome);
    }

    outcome.deadline_exceeded = deadline.is_some_and(|d| Instant::now() >= d);

    info!(
        keys = outcome.len(),
        cache_hits = outcome.cache_hits,
        resolved = outcome.resolved,
        fallbacks = outcome.fallbacks,
        failures = outcome.failures.len(),
        deadline_exceeded = outcome.deadline_exceeded,
        elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        "Batch complete"
    );

    Ok(outcome)
}

/// Why `node` cannot be attempted, if it cannot.
fn rejection(resolver: &Resolver<'_>, node: &SymbolNode) -> Option<ReferenceErrorKind> {
    if resolver.sources().get(node.path()).is_none() {
        Some(ReferenceErrorKind::FileNotFound)
    } else if !node.is_identifier() || node.text().is_empty() {
        Some(ReferenceErrorKind::MalformedRequest)
    } else {
        None
    }
}
