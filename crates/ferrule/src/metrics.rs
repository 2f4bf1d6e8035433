//! Lookup counters.

use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::error::ReferenceError;
use crate::lookup::LookupKind;
use crate::resolver::{Attempt, Resolution, ResolutionSource, Resolver};
use crate::retry::Cancellation;
use crate::syntax::SymbolNode;

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Metrics {
    /// Lookups observed
    pub total_queries: u64,
    /// Lookups served from the cache
    pub cache_hits: u64,
    /// Lookups that went past the cache
    pub cache_misses: u64,
    /// Lookup Service invocations, retries included
    pub lookup_calls: u64,
    /// Lookups answered by the heuristic fallback
    pub fallback_resolutions: u64,
    /// Lookups that ended in an error
    pub failed_queries: u64,
    /// Wall time spent across all lookups
    pub total_duration: Duration,
}

impl Metrics {
    /// Mean time per lookup, zero when nothing was recorded.
    #[must_use]
    pub fn average_latency(&self) -> Duration {
        match u32::try_from(self.total_queries) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.total_duration / n,
            #[allow(clippy::cast_precision_loss)]
            Err(_) => self
                .total_duration
                .div_f64(self.total_queries as f64),
        }
    }

    /// Percentage of lookups served from the cache.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        if self.total_queries == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.total_queries as f64 * 100.0
        }
    }
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} queries, {} hits ({:.1}%), {} misses, {} lookup calls, {} fallbacks, {} failed, avg {:?}",
            self.total_queries,
            self.cache_hits,
            self.hit_rate(),
            self.cache_misses,
            self.lookup_calls,
            self.fallback_resolutions,
            self.failed_queries,
            self.average_latency(),
        )
    }
}

/// Thread-safe accumulator behind one lock.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    state: Mutex<Metrics>,
}

impl MetricsCollector {
    /// Start from zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve through `resolver` and count the outcome.
    ///
    /// # Errors
    ///
    /// Returns the resolver's terminal error unchanged; it is counted as a
    /// failed query first.
    pub async fn resolve_with_metrics(
        &self,
        resolver: &Resolver<'_>,
        node: &SymbolNode,
        kind: LookupKind,
        cancel: &Cancellation,
    ) -> Result<Resolution, ReferenceError> {
        let started = Instant::now();
        let attempt = resolver.attempt(node, kind, cancel).await;
        self.record(&attempt, started.elapsed());
        attempt.outcome
    }

    /// Count one finished lookup.
    pub(crate) fn record(&self, attempt: &Attempt, elapsed: Duration) {
        let mut metrics = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        metrics.total_queries += 1;
        metrics.lookup_calls += u64::from(attempt.lookup_calls);
        metrics.total_duration += elapsed;

        match &attempt.outcome {
            Ok(resolution) if resolution.source == ResolutionSource::Cache => {
                metrics.cache_hits += 1;
            }
            Ok(resolution) => {
                metrics.cache_misses += 1;
                if resolution.source == ResolutionSource::Fallback {
                    metrics.fallback_resolutions += 1;
                }
            }
            Err(_) => {
                metrics.cache_misses += 1;
                metrics.failed_queries += 1;
            }
        }
    }

    /// Consistent copy of every counter.
    #[must_use]
    pub fn snapshot(&self) -> Metrics {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Zero every counter.
    pub fn reset(&self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = Metrics::default();
    }
}
