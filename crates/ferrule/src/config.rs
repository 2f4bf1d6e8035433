//! Resolver configuration.
//!
//! Loaded from a YAML file (`ferrule.yaml` by default). Every section and
//! every field is optional; missing values take the defaults below.
//!
//! ```yaml
//! cache:
//!   enabled: true
//!   max_entries: 1000
//!   ttl: 10m
//! retry:
//!   enabled: true
//!   max_retries: 3
//!   base_delay: 100ms
//!   max_delay: 5s
//!   backoff_factor: 2.0
//! fallback:
//!   enabled: true
//!   max_results: 100
//! metrics:
//!   enabled: true
//! batch:
//!   size: 50
//!   timeout: 30s     # `off` or `null` for no deadline
//! lookup:
//!   timeout: 10s
//! logging:
//!   level: info
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use crate::error::{Error, Result};
use crate::retry::RetryConfig;

/// Default config file name, looked up in the workspace root.
pub const CONFIG_FILE_NAME: &str = "ferrule.yaml";

/// Log levels accepted by `logging.level`.
pub const LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Resolution cache
    pub cache: CacheConfig,
    /// Retry schedule for Lookup Service calls
    pub retry: RetryConfig,
    /// Heuristic fallback
    pub fallback: FallbackConfig,
    /// Metrics collection
    pub metrics: MetricsConfig,
    /// Batch resolution
    pub batch: BatchConfig,
    /// Lookup Service calls
    pub lookup: LookupConfig,
    /// Log output
    pub logging: LoggingConfig,
}

/// `cache:` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// When false, every lookup is a miss and nothing is stored
    pub enabled: bool,
    /// Capacity before LRU eviction
    pub max_entries: usize,
    /// Entry lifetime
    #[serde(with = "duration")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1000,
            ttl: Duration::from_secs(600),
        }
    }
}

/// `fallback:` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// When false, terminal service errors are surfaced
    pub enabled: bool,
    /// Cap on locations returned by one scan
    pub max_results: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_results: 100,
        }
    }
}

/// `metrics:` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// When false, lookups are not counted
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// `batch:` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum concurrent lookups within one batch
    pub size: usize,
    /// Whole-batch deadline; `None` lets a batch run until every target is done
    #[serde(with = "duration::optional")]
    pub timeout: Option<Duration>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: 50,
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// `lookup:` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    /// Bound on a single Lookup Service call
    #[serde(with = "duration")]
    pub timeout: Duration,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }
}

/// `logging:` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter level when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl ResolverConfig {
    /// Parse and validate YAML text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigFormat`] for malformed YAML and
    /// [`Error::Config`] for values that fail validation.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`; a missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, parsed or
    /// validated.
    pub async fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path).await {
            Ok(content) => {
                debug!(path = %path.display(), "Loading config");
                Self::from_yaml_str(&content)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write as YAML to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Check value ranges.
    ///
    /// Durations are only checked for enabled sections.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.cache.enabled {
            if self.cache.max_entries == 0 {
                return Err(invalid("cache.max_entries must be greater than 0"));
            }
            if self.cache.ttl.is_zero() {
                return Err(invalid("cache.ttl must be positive"));
            }
        }

        if self.retry.enabled {
            if self.retry.base_delay.is_zero() {
                return Err(invalid("retry.base_delay must be positive"));
            }
            if self.retry.max_delay.is_zero() {
                return Err(invalid("retry.max_delay must be positive"));
            }
            if self.retry.max_delay < self.retry.base_delay {
                return Err(invalid("retry.max_delay must not be less than retry.base_delay"));
            }
            let factor = self.retry.backoff_factor;
            if factor.is_nan() || factor.is_infinite() || factor < 1.0 {
                return Err(invalid("retry.backoff_factor must be a finite number >= 1.0"));
            }
        }

        if self.fallback.enabled && self.fallback.max_results == 0 {
            return Err(invalid("fallback.max_results must be greater than 0"));
        }

        if self.batch.size == 0 {
            return Err(invalid("batch.size must be greater than 0"));
        }
        if self.batch.timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(invalid("batch.timeout must be positive"));
        }
        if self.lookup.timeout.is_zero() {
            return Err(invalid("lookup.timeout must be positive"));
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::Config(format!(
                "logging.level must be one of {}, got '{}'",
                LOG_LEVELS.join(", "),
                self.logging.level
            )));
        }

        Ok(())
    }
}

fn invalid(message: &str) -> Error {
    Error::Config(message.to_string())
}

/// Human-readable durations: `250ms`, `5s`, `10m`, `1h`.
///
/// Accepted units are `ns`, `us`, `ms`, `s`, `m` and `h`; a bare integer is
/// read as seconds. Serialization uses the largest unit that represents the
/// value exactly.
pub mod duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de};

    const UNITS: &[(&str, u128)] = &[
        ("h", 3_600_000_000_000),
        ("m", 60_000_000_000),
        ("s", 1_000_000_000),
        ("ms", 1_000_000),
        ("us", 1_000),
        ("ns", 1),
    ];

    /// Parse a duration string.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem for unknown units, missing
    /// digits or overflow.
    pub fn parse(text: &str) -> Result<Duration, String> {
        let text = text.trim();
        let split = text
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(text.len());
        let (digits, unit) = text.split_at(split);

        if digits.is_empty() {
            return Err(format!("invalid duration '{text}': expected a number"));
        }

        let value: u64 = digits
            .parse()
            .map_err(|_| format!("invalid duration '{text}': number too large"))?;

        let unit = if unit.is_empty() { "s" } else { unit.trim() };
        let Some(&(_, nanos)) = UNITS.iter().find(|(name, _)| *name == unit) else {
            return Err(format!(
                "invalid duration '{text}': unknown unit '{unit}' (use ns, us, ms, s, m or h)"
            ));
        };

        let total = u128::from(value) * nanos;
        let secs = u64::try_from(total / 1_000_000_000)
            .map_err(|_| format!("invalid duration '{text}': out of range"))?;
        #[allow(clippy::cast_possible_truncation)]
        let subsec = (total % 1_000_000_000) as u32;
        Ok(Duration::new(secs, subsec))
    }

    /// Render with the largest exact unit.
    #[must_use]
    pub fn format(value: Duration) -> String {
        let nanos = value.as_nanos();
        if nanos == 0 {
            return "0s".to_string();
        }
        UNITS
            .iter()
            .find(|(_, unit)| nanos % unit == 0)
            .map_or_else(|| format!("{nanos}ns"), |(name, unit)| format!("{}{name}", nanos / unit))
    }

    /// Serde serializer for `#[serde(with = "...")]`.
    ///
    /// # Errors
    ///
    /// Propagates serializer failures.
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(*value))
    }

    /// Serde deserializer for `#[serde(with = "...")]`.
    ///
    /// # Errors
    ///
    /// Fails on strings [`parse`] rejects.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Seconds(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => parse(&text).map_err(de::Error::custom),
        }
    }

    /// Like the parent module, for durations that can be switched off with
    /// `off`, `none` or a YAML null.
    pub mod optional {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer, de};

        use super::{format, parse};

        const OFF: &[&str] = &["off", "none"];

        /// Serde serializer for `#[serde(with = "...")]`.
        ///
        /// # Errors
        ///
        /// Propagates serializer failures.
        #[allow(clippy::ref_option)]
        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(value) => serializer.serialize_str(&format(*value)),
                None => serializer.serialize_none(),
            }
        }

        /// Serde deserializer for `#[serde(with = "...")]`.
        ///
        /// # Errors
        ///
        /// Fails on strings that are neither a duration nor an off marker.
        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            #[derive(Deserialize)]
            #[serde(untagged)]
            enum Raw {
                Seconds(u64),
                Text(String),
            }

            match Option::<Raw>::deserialize(deserializer)? {
                None => Ok(None),
                Some(Raw::Seconds(secs)) => Ok(Some(Duration::from_secs(secs))),
                Some(Raw::Text(text)) if OFF.contains(&text.trim().to_lowercase().as_str()) => {
                    Ok(None)
                }
                Some(Raw::Text(text)) => parse(&text).map(Some).map_err(de::Error::custom),
            }
        }
    }
}
