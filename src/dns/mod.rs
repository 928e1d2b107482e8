//! DNS-related modules.

pub mod codec;
pub mod forwarder;
pub mod rules;

pub use codec::Query;
pub use forwarder::{Forwarder, UdpForwarder};
pub use rules::{DomainRules, RuleMatch};
