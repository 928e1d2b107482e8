//! Error types for the sinkhole DNS proxy.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Main error type for sinkhole operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("malformed DNS message: {0}")]
    Decode(#[from] DecodeError),

    #[error("upstream forwarding failed: {0}")]
    Forward(#[from] ForwardError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("metrics error: {0}")]
    Metrics(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[source] io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
}

/// Validation errors for configuration values.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("threshold must be within [0, 1], got {0}")]
    ThresholdOutOfRange(f64),

    #[error("cache_ttl_seconds must be greater than 0")]
    ZeroCacheTtl,

    #[error("cache_size must be greater than 0")]
    ZeroCacheSize,

    #[error("forward_timeout_ms must be greater than 0")]
    ZeroForwardTimeout,

    #[error("upstream_sockets must be greater than 0")]
    ZeroUpstreamSockets,

    #[error("max_concurrent_queries must be greater than 0")]
    ZeroConcurrency,

    #[error("secondary_resolver must differ from upstream_resolver")]
    DuplicateResolver,

    #[error("secondary_resolver must use the same address family as upstream_resolver")]
    MixedResolverFamilies,

    #[error("domain pattern cannot be empty")]
    EmptyPattern,

    #[error("invalid wildcard pattern: {pattern:?}")]
    InvalidWildcardPattern { pattern: String },
}

/// Errors raised while loading or evaluating the scoring model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to read model file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid model JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported model format {format:?} version {version}")]
    UnsupportedFormat { format: String, version: u32 },

    #[error("model declares no features")]
    NoFeatures,

    #[error("duplicate feature name {0:?}")]
    DuplicateFeature(String),

    #[error("model contains no trees")]
    NoTrees,

    #[error("tree {tree} has no nodes")]
    EmptyTree { tree: usize },

    #[error("tree {tree} node {node}: feature index {feature} out of range")]
    FeatureOutOfRange {
        tree: usize,
        node: usize,
        feature: usize,
    },

    #[error("tree {tree} node {node}: invalid child index {child}")]
    InvalidChild {
        tree: usize,
        node: usize,
        child: usize,
    },

    #[error("tree {tree} node {node}: value is not finite")]
    NonFinite { tree: usize, node: usize },

    #[error("base_margin is not finite")]
    NonFiniteMargin,

    #[error("feature vector has {actual} values, model expects {expected}")]
    FeatureMismatch { expected: usize, actual: usize },
}

/// Reasons an inbound packet is rejected. Rejected packets are never answered.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("packet shorter than the 12 byte header ({0} bytes)")]
    TooShort(usize),

    #[error("message is a response, not a query")]
    NotAQuery,

    #[error("unsupported opcode {0}")]
    UnsupportedOpCode(String),

    #[error("message carries no question")]
    NoQuestion,

    #[error("{0}")]
    Malformed(String),
}

/// Upstream forwarding failures.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("upstream did not answer within {0:?}")]
    Timeout(std::time::Duration),

    #[error("upstream transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("no free upstream transaction id")]
    Busy,

    #[error("upstream reader stopped")]
    Closed,
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;
