//! Configuration types

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// DEFAULTS
// ============================================================================

pub const DEFAULT_CAPACITY: usize = 10_000;
pub const DEFAULT_SHARDS: usize = 16;
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_LEASE_TTL_MS: u64 = 10_000;
pub const DEFAULT_MAX_FLUSH_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 100;
pub const DEFAULT_MAX_RETRY_BACKOFF_MS: u64 = 10_000;
pub const DEFAULT_HYBRID_WINDOW_PERCENT: u8 = 1;
pub const DEFAULT_EVENT_CAPACITY: usize = 1_024;
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5_000;

// ============================================================================
// POLICY SELECTORS
// ============================================================================

/// Error parsing a policy selector from a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyParseError {
    pub kind: &'static str,
    pub input: String,
}

impl fmt::Display for PolicyParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} '{}'", self.kind, self.input)
    }
}

impl std::error::Error for PolicyParseError {}

/// Replacement strategy applied when the store is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicyKind {
    #[default]
    Lru,
    Lfu,
    Fifo,
    /// Recency window in front of a frequency-ranked main region.
    Hybrid,
}

impl fmt::Display for EvictionPolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Lru => "lru",
            Self::Lfu => "lfu",
            Self::Fifo => "fifo",
            Self::Hybrid => "hybrid",
        };
        f.write_str(s)
    }
}

impl FromStr for EvictionPolicyKind {
    type Err = PolicyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lru" => Ok(Self::Lru),
            "lfu" => Ok(Self::Lfu),
            "fifo" => Ok(Self::Fifo),
            "hybrid" | "tinylfu" => Ok(Self::Hybrid),
            _ => Err(PolicyParseError {
                kind: "eviction policy",
                input: s.to_string(),
            }),
        }
    }
}

/// How cache writes propagate to the backing store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WritePolicyKind {
    #[default]
    Through,
    Around,
    Behind,
    Back,
}

impl fmt::Display for WritePolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Through => "through",
            Self::Around => "around",
            Self::Behind => "behind",
            Self::Back => "back",
        };
        f.write_str(s)
    }
}

impl FromStr for WritePolicyKind {
    type Err = PolicyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "through" | "write-through" => Ok(Self::Through),
            "around" | "write-around" => Ok(Self::Around),
            "behind" | "write-behind" => Ok(Self::Behind),
            "back" | "write-back" => Ok(Self::Back),
            _ => Err(PolicyParseError {
                kind: "write policy",
                input: s.to_string(),
            }),
        }
    }
}

/// How an entry's expiry instant is computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtlMode {
    /// Expiry measured from write time.
    Fixed,
    /// Expiry pushed forward on every access.
    Sliding,
    #[default]
    None,
}

impl fmt::Display for TtlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Fixed => "fixed",
            Self::Sliding => "sliding",
            Self::None => "none",
        };
        f.write_str(s)
    }
}

impl FromStr for TtlMode {
    type Err = PolicyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" | "after-write" => Ok(Self::Fixed),
            "sliding" | "after-access" => Ok(Self::Sliding),
            "none" | "off" => Ok(Self::None),
            _ => Err(PolicyParseError {
                kind: "ttl mode",
                input: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// SERDE HELPERS
// ============================================================================

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

mod opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

// ============================================================================
// CACHE CONFIG
// ============================================================================

/// Cache engine configuration. Validated once, at build time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of resident entries.
    pub capacity: usize,
    pub eviction: EvictionPolicyKind,
    pub write_policy: WritePolicyKind,
    pub ttl_mode: TtlMode,
    /// Lifetime applied to entries inserted without an explicit TTL.
    #[serde(with = "opt_millis")]
    pub default_ttl: Option<Duration>,
    /// Write-behind flush period.
    #[serde(with = "millis")]
    pub flush_interval: Duration,
    /// Age after which reads serve the value and trigger a background refresh.
    #[serde(with = "opt_millis")]
    pub stale_after: Option<Duration>,
    #[serde(with = "millis")]
    pub lease_ttl: Duration,
    /// Period of the eager expiry sweep.
    #[serde(with = "millis")]
    pub sweep_interval: Duration,
    /// Lock stripes in the entry store.
    pub shards: usize,
    /// Store write attempts before a pending write is dead-lettered.
    pub max_flush_attempts: u32,
    #[serde(with = "millis")]
    pub retry_backoff: Duration,
    #[serde(with = "millis")]
    pub max_retry_backoff: Duration,
    /// Share of capacity given to the hybrid policy's admission window.
    pub hybrid_window_percent: u8,
    /// Buffer of the event broadcast channel.
    pub event_capacity: usize,
    /// Drain deadline used when the cache is dropped without `shutdown`.
    #[serde(with = "millis")]
    pub shutdown_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            eviction: EvictionPolicyKind::default(),
            write_policy: WritePolicyKind::default(),
            ttl_mode: TtlMode::default(),
            default_ttl: None,
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
            stale_after: None,
            lease_ttl: Duration::from_millis(DEFAULT_LEASE_TTL_MS),
            sweep_interval: Duration::from_millis(DEFAULT_SWEEP_INTERVAL_MS),
            shards: DEFAULT_SHARDS,
            max_flush_attempts: DEFAULT_MAX_FLUSH_ATTEMPTS,
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            max_retry_backoff: Duration::from_millis(DEFAULT_MAX_RETRY_BACKOFF_MS),
            hybrid_window_percent: DEFAULT_HYBRID_WINDOW_PERCENT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            shutdown_timeout: Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS),
        }
    }
}

impl CacheConfig {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_eviction(mut self, eviction: EvictionPolicyKind) -> Self {
        self.eviction = eviction;
        self
    }

    pub fn with_write_policy(mut self, write_policy: WritePolicyKind) -> Self {
        self.write_policy = write_policy;
        self
    }

    /// Set TTL mode and default lifetime together.
    pub fn with_ttl(mut self, mode: TtlMode, ttl: Duration) -> Self {
        self.ttl_mode = mode;
        self.default_ttl = Some(ttl);
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = Some(stale_after);
        self
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    pub fn with_max_flush_attempts(mut self, attempts: u32) -> Self {
        self.max_flush_attempts = attempts;
        self
    }

    pub fn with_retry_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.retry_backoff = initial;
        self.max_retry_backoff = max;
        self
    }

    pub fn with_hybrid_window_percent(mut self, percent: u8) -> Self {
        self.hybrid_window_percent = percent;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Lifetime to apply to a new entry, honouring a per-put override.
    pub fn effective_ttl(&self, requested: Option<Duration>) -> Option<Duration> {
        match self.ttl_mode {
            TtlMode::None => requested,
            TtlMode::Fixed | TtlMode::Sliding => requested.or(self.default_ttl),
        }
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - capacity > 0 and shards > 0
    /// - fixed/sliding TTL modes carry a positive default TTL
    /// - stale_after is positive and shorter than the default TTL
    /// - write-behind has a positive flush interval
    /// - lease TTL > 0, at least one flush attempt, sane backoff bounds
    /// - hybrid window percent in 1..=50
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(invalid("capacity", self.capacity, "capacity must be greater than 0"));
        }

        if self.shards == 0 {
            return Err(invalid("shards", self.shards, "shards must be greater than 0"));
        }

        match (self.ttl_mode, self.default_ttl) {
            (TtlMode::Fixed | TtlMode::Sliding, None) => {
                return Err(ConfigError::MissingRequired {
                    field: "default_ttl".to_string(),
                });
            }
            (TtlMode::Fixed | TtlMode::Sliding, Some(ttl)) if ttl.is_zero() => {
                return Err(invalid("default_ttl", "0ms", "default_ttl must be positive"));
            }
            _ => {}
        }

        if let Some(stale) = self.stale_after {
            if stale.is_zero() {
                return Err(invalid("stale_after", "0ms", "stale_after must be positive"));
            }
            if let Some(ttl) = self.default_ttl {
                if stale >= ttl {
                    return Err(ConfigError::IncompatibleOptions {
                        option_a: format!("stale_after={}ms", stale.as_millis()),
                        option_b: format!("default_ttl={}ms", ttl.as_millis()),
                    });
                }
            }
        }

        if self.write_policy == WritePolicyKind::Behind && self.flush_interval.is_zero() {
            return Err(invalid(
                "flush_interval",
                "0ms",
                "write-behind requires a positive flush interval",
            ));
        }

        if self.lease_ttl.is_zero() {
            return Err(invalid("lease_ttl", "0ms", "lease_ttl must be positive"));
        }

        if self.sweep_interval.is_zero() {
            return Err(invalid("sweep_interval", "0ms", "sweep_interval must be positive"));
        }

        if self.max_flush_attempts == 0 {
            return Err(invalid(
                "max_flush_attempts",
                self.max_flush_attempts,
                "at least one attempt is required",
            ));
        }

        if self.retry_backoff.is_zero() || self.retry_backoff > self.max_retry_backoff {
            return Err(invalid(
                "retry_backoff",
                format!("{}ms", self.retry_backoff.as_millis()),
                "retry_backoff must be positive and no larger than max_retry_backoff",
            ));
        }

        if !(1..=50).contains(&self.hybrid_window_percent) {
            return Err(invalid(
                "hybrid_window_percent",
                self.hybrid_window_percent,
                "must be between 1 and 50",
            ));
        }

        if self.event_capacity == 0 {
            return Err(invalid(
                "event_capacity",
                self.event_capacity,
                "event_capacity must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Create a CacheConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHET_CAPACITY`: Maximum resident entries (default: 10000)
    /// - `CACHET_EVICTION`: lru | lfu | fifo | hybrid (default: lru)
    /// - `CACHET_WRITE_POLICY`: through | around | behind | back (default: through)
    /// - `CACHET_TTL_MODE`: fixed | sliding | none (default: none)
    /// - `CACHET_TTL_MS`: Default entry lifetime
    /// - `CACHET_FLUSH_INTERVAL_MS`: Write-behind flush period (default: 1000)
    /// - `CACHET_STALE_AFTER_MS`: Stale-while-revalidate threshold
    /// - `CACHET_LEASE_TTL_MS`: Distributed lease lifetime (default: 10000)
    /// - `CACHET_SWEEP_INTERVAL_MS`: Expiry sweep period (default: 1000)
    ///
    /// Unset variables keep their defaults; unparsable ones are errors.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, "CACHET_CAPACITY")? {
            config.capacity = v;
        }
        if let Some(v) = parse_var(&lookup, "CACHET_EVICTION")? {
            config.eviction = v;
        }
        if let Some(v) = parse_var(&lookup, "CACHET_WRITE_POLICY")? {
            config.write_policy = v;
        }
        if let Some(v) = parse_var(&lookup, "CACHET_TTL_MODE")? {
            config.ttl_mode = v;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "CACHET_TTL_MS")? {
            config.default_ttl = Some(Duration::from_millis(ms));
        }
        if let Some(ms) = parse_var(&lookup, "CACHET_FLUSH_INTERVAL_MS")? {
            config.flush_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "CACHET_STALE_AFTER_MS")? {
            config.stale_after = Some(Duration::from_millis(ms));
        }
        if let Some(ms) = parse_var(&lookup, "CACHET_LEASE_TTL_MS")? {
            config.lease_ttl = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, "CACHET_SWEEP_INTERVAL_MS")? {
            config.sweep_interval = Duration::from_millis(ms);
        }

        Ok(config)
    }

    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        toml::from_str(input).map_err(|e| ConfigError::InvalidValue {
            field: "toml".to_string(),
            value: input.lines().next().unwrap_or_default().to_string(),
            reason: e.message().to_string(),
        })
    }
}

fn invalid(field: &str, value: impl fmt::Display, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| invalid(name, &raw, &e.to_string())),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(CacheConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = CacheConfig::new(0).validate();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { field, .. }) if field == "capacity"
        ));
    }

    #[test]
    fn test_fixed_ttl_requires_default_ttl() {
        let mut config = CacheConfig::new(10);
        config.ttl_mode = TtlMode::Fixed;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired { field }) if field == "default_ttl"
        ));
    }

    #[test]
    fn test_stale_after_must_be_shorter_than_ttl() {
        let config = CacheConfig::new(10)
            .with_ttl(TtlMode::Fixed, Duration::from_secs(5))
            .with_stale_after(Duration::from_secs(5));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::IncompatibleOptions { .. })
        ));

        let ok = CacheConfig::new(10)
            .with_ttl(TtlMode::Fixed, Duration::from_secs(5))
            .with_stale_after(Duration::from_secs(2));
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_backoff_bounds_checked() {
        let config = CacheConfig::new(10)
            .with_retry_backoff(Duration::from_secs(5), Duration::from_secs(1));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "retry_backoff"
        ));
    }

    #[test]
    fn test_hybrid_window_range() {
        let config = CacheConfig::new(10).with_hybrid_window_percent(0);
        assert!(config.validate().is_err());
        let config = CacheConfig::new(10).with_hybrid_window_percent(51);
        assert!(config.validate().is_err());
        let config = CacheConfig::new(10).with_hybrid_window_percent(20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_effective_ttl() {
        let none = CacheConfig::new(10);
        assert_eq!(none.effective_ttl(None), None);
        assert_eq!(
            none.effective_ttl(Some(Duration::from_secs(1))),
            Some(Duration::from_secs(1))
        );

        let fixed = CacheConfig::new(10).with_ttl(TtlMode::Fixed, Duration::from_secs(9));
        assert_eq!(fixed.effective_ttl(None), Some(Duration::from_secs(9)));
        assert_eq!(
            fixed.effective_ttl(Some(Duration::from_secs(2))),
            Some(Duration::from_secs(2))
        );
    }

    #[test]
    fn test_policy_selectors_parse() {
        assert_eq!("LRU".parse::<EvictionPolicyKind>(), Ok(EvictionPolicyKind::Lru));
        assert_eq!("hybrid".parse::<EvictionPolicyKind>(), Ok(EvictionPolicyKind::Hybrid));
        assert_eq!("write_behind".parse::<WritePolicyKind>(), Ok(WritePolicyKind::Behind));
        assert_eq!("sliding".parse::<TtlMode>(), Ok(TtlMode::Sliding));

        let err = "arc".parse::<EvictionPolicyKind>().unwrap_err();
        assert!(err.to_string().contains("arc"));
    }

    #[test]
    fn test_config_from_env_defaults() {
        let config = CacheConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, CacheConfig::default());
    }

    #[test]
    fn test_config_from_env_overrides() {
        let config = CacheConfig::from_lookup(lookup(&[
            ("CACHET_CAPACITY", "3"),
            ("CACHET_EVICTION", "lfu"),
            ("CACHET_WRITE_POLICY", "behind"),
            ("CACHET_TTL_MODE", "fixed"),
            ("CACHET_TTL_MS", "60000"),
            ("CACHET_FLUSH_INTERVAL_MS", "2000"),
            ("CACHET_STALE_AFTER_MS", "30000"),
        ]))
        .unwrap();

        assert_eq!(config.capacity, 3);
        assert_eq!(config.eviction, EvictionPolicyKind::Lfu);
        assert_eq!(config.write_policy, WritePolicyKind::Behind);
        assert_eq!(config.ttl_mode, TtlMode::Fixed);
        assert_eq!(config.default_ttl, Some(Duration::from_secs(60)));
        assert_eq!(config.flush_interval, Duration::from_secs(2));
        assert_eq!(config.stale_after, Some(Duration::from_secs(30)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_env_rejects_garbage() {
        let result = CacheConfig::from_lookup(lookup(&[("CACHET_CAPACITY", "lots")]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { field, .. }) if field == "CACHET_CAPACITY"
        ));

        let result = CacheConfig::from_lookup(lookup(&[("CACHET_EVICTION", "random")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let config = CacheConfig::from_toml_str(
            r#"
            capacity = 500
            eviction = "fifo"
            write_policy = "back"
            ttl_mode = "sliding"
            default_ttl = 30000
            "#,
        )
        .unwrap();
        assert_eq!(config.capacity, 500);
        assert_eq!(config.eviction, EvictionPolicyKind::Fifo);
        assert_eq!(config.write_policy, WritePolicyKind::Back);
        assert_eq!(config.default_ttl, Some(Duration::from_secs(30)));
        assert_eq!(config.shards, DEFAULT_SHARDS);
    }

    #[test]
    fn test_config_serde_json_roundtrip_uses_millis() {
        let config = CacheConfig::new(5).with_flush_interval(Duration::from_millis(1500));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["flush_interval"], 1500);
        let back: CacheConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }

    proptest! {
        /// Any capacity/shard pair of positive values passes validation.
        #[test]
        fn prop_positive_capacity_valid(capacity in 1usize..1_000_000, shards in 1usize..256) {
            let config = CacheConfig::new(capacity).with_shards(shards);
            prop_assert!(config.validate().is_ok());
        }

        /// stale_after at or beyond the TTL is always rejected.
        #[test]
        fn prop_stale_after_not_shorter_rejected(ttl_ms in 1u64..100_000, extra in 0u64..1_000) {
            let config = CacheConfig::new(10)
                .with_ttl(TtlMode::Fixed, Duration::from_millis(ttl_ms))
                .with_stale_after(Duration::from_millis(ttl_ms + extra));
            prop_assert!(config.validate().is_err());
        }
    }
}
