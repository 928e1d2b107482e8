//! Configuration loading and validation.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, Result, ValidationError};

/// Main configuration for the sinkhole DNS proxy.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Address the proxy listens on (UDP, and TCP when enabled).
    #[serde(
        default = "default_listen",
        deserialize_with = "deserialize_socket_addr"
    )]
    pub listen: SocketAddr,

    /// Upstream DNS resolver address (e.g., "1.1.1.1:53").
    #[serde(deserialize_with = "deserialize_socket_addr")]
    pub upstream_resolver: SocketAddr,

    /// Resolver tried once when the primary fails.
    #[serde(default, deserialize_with = "deserialize_optional_socket_addr")]
    pub secondary_resolver: Option<SocketAddr>,

    /// Path to the tree-ensemble model file.
    pub model_path: PathBuf,

    /// Scores at or above this value are blocked.
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Lifetime of a cached verdict, in seconds.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,

    /// Maximum number of cached verdicts.
    #[serde(default = "default_cache_size")]
    pub cache_size: u64,

    /// TTL of the null-address record in blocked answers, in seconds.
    #[serde(default = "default_blocked_ttl")]
    pub blocked_ttl_seconds: u32,

    /// How long to wait for an upstream answer, in milliseconds.
    #[serde(default = "default_forward_timeout")]
    pub forward_timeout_ms: u64,

    /// Number of UDP sockets used to talk to upstream resolvers.
    #[serde(default = "default_upstream_sockets")]
    pub upstream_sockets: usize,

    /// Maximum number of UDP queries processed at the same time.
    #[serde(default = "default_max_concurrent_queries")]
    pub max_concurrent_queries: usize,

    /// Also serve DNS over TCP on the listen address.
    #[serde(default = "default_tcp")]
    pub tcp: bool,

    /// Answer sent to clients when every upstream attempt failed.
    #[serde(default)]
    pub on_upstream_failure: UpstreamFailurePolicy,

    /// How blocked AAAA queries are answered.
    #[serde(default)]
    pub blocked_aaaa: AaaaPolicy,

    /// Domains that are always forwarded, bypassing the model.
    /// Supports exact matches ("example.com") and wildcards ("*.example.com").
    #[serde(default)]
    pub allowlist: Vec<String>,

    /// Domains that are always blocked, bypassing the model.
    #[serde(default)]
    pub blocklist: Vec<String>,

    /// Audit trail settings.
    #[serde(default)]
    pub audit: AuditConfig,

    /// Prometheus exporter settings.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Response synthesized when forwarding fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamFailurePolicy {
    /// Answer SERVFAIL so the client may try another resolver.
    #[default]
    Servfail,
    /// Answer REFUSED.
    Refused,
}

/// Answer shape for blocked AAAA queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AaaaPolicy {
    /// One AAAA record pointing at `::`.
    #[default]
    NullAddress,
    /// NOERROR with an empty answer section.
    NoData,
}

/// Audit log settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditConfig {
    /// File the per-query audit lines are appended to.
    pub log_path: Option<PathBuf>,
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(
        default = "default_metrics_listen",
        deserialize_with = "deserialize_socket_addr"
    )]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 53))
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9100))
}

const fn default_threshold() -> f64 {
    0.5
}

const fn default_cache_ttl() -> u64 {
    300
}

const fn default_cache_size() -> u64 {
    10_000
}

const fn default_blocked_ttl() -> u32 {
    300
}

const fn default_forward_timeout() -> u64 {
    3000
}

const fn default_upstream_sockets() -> usize {
    4
}

const fn default_max_concurrent_queries() -> usize {
    1024
}

const fn default_tcp() -> bool {
    true
}

fn deserialize_socket_addr<'de, D>(deserializer: D) -> std::result::Result<SocketAddr, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

fn deserialize_optional_socket_addr<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<SocketAddr>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = Option::<String>::deserialize(deserializer)?;
    s.map(|s| s.parse().map_err(serde::de::Error::custom))
        .transpose()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate().map_err(ConfigError::Validation)?;
        Ok(config)
    }

    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub const fn forward_timeout(&self) -> Duration {
        Duration::from_millis(self.forward_timeout_ms)
    }

    fn validate(&self) -> std::result::Result<(), ValidationError> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ValidationError::ThresholdOutOfRange(self.threshold));
        }
        if self.cache_ttl_seconds == 0 {
            return Err(ValidationError::ZeroCacheTtl);
        }
        if self.cache_size == 0 {
            return Err(ValidationError::ZeroCacheSize);
        }
        if self.forward_timeout_ms == 0 {
            return Err(ValidationError::ZeroForwardTimeout);
        }
        if self.upstream_sockets == 0 {
            return Err(ValidationError::ZeroUpstreamSockets);
        }
        if self.max_concurrent_queries == 0 {
            return Err(ValidationError::ZeroConcurrency);
        }
        if self.secondary_resolver == Some(self.upstream_resolver) {
            return Err(ValidationError::DuplicateResolver);
        }
        // Both resolvers are reached through the same pool of sockets.
        if let Some(secondary) = self.secondary_resolver
            && secondary.is_ipv6() != self.upstream_resolver.is_ipv6()
        {
            return Err(ValidationError::MixedResolverFamilies);
        }

        for pattern in self.allowlist.iter().chain(&self.blocklist) {
            if pattern.is_empty() {
                return Err(ValidationError::EmptyPattern);
            }
            // A wildcard is "*." followed by a domain.
            if pattern.starts_with('*') && (!pattern.starts_with("*.") || pattern.len() <= 2) {
                return Err(ValidationError::InvalidWildcardPattern {
                    pattern: pattern.clone(),
                });
            }
        }

        Ok(())
    }
}
