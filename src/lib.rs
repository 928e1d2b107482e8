//! Sinkhole - a classifying DNS proxy.
//!
//! Sinkhole answers DNS queries for a host or network segment. Each queried
//! domain is scored by a tree-ensemble model over lexical features; domains
//! scoring at or above a threshold get a null address, the rest are forwarded
//! to a real resolver and the answer is relayed untouched.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`config`]: Configuration loading and validation
//! - [`dns`]: Wire codec, static rules and upstream forwarding
//! - [`features`]: Domain to feature vector extraction
//! - [`model`]: Tree-ensemble scoring and the model file format
//! - [`cache`]: Verdict caching with TTL support
//! - [`server`]: Per-query orchestration and the UDP/TCP listeners
//! - [`stats`]: Counters and the audit trail
//! - [`error`]: Error types
//!
//! # Testing
//!
//! Every collaborator of the handler sits behind a trait, so the decision
//! flow can be tested without network access:
//!
//! ```rust
//! use sinkhole::dns::{DomainRules, RuleMatch};
//! use sinkhole::verdict::Verdict;
//!
//! let rules = DomainRules::new(["github.com"], ["*.ads.com"]);
//! assert_eq!(rules.check("tracking.ads.com"), Some(RuleMatch::Deny));
//! assert!(Verdict::scored("tracking.ads.com", 0.9, 0.5).is_blocked());
//! ```

pub mod cache;
pub mod config;
pub mod dns;
pub mod error;
pub mod features;
pub mod metrics;
pub mod model;
pub mod server;
pub mod stats;
pub mod verdict;

pub use config::Config;
pub use error::{Error, Result};
