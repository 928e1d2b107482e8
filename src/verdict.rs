//! The block/allow decision reached for a domain.

use std::fmt;
use std::time::SystemTime;

/// Where a verdict came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerdictSource {
    /// Served from the decision cache.
    Cache,
    /// Computed by the scoring engine.
    Model,
    /// Scoring failed; the query was let through unscored.
    Passthrough,
    /// Matched a static allow or deny pattern.
    Rule,
}

impl VerdictSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Model => "model",
            Self::Passthrough => "passthrough",
            Self::Rule => "rule",
        }
    }
}

impl fmt::Display for VerdictSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    domain: String,
    score: f64,
    blocked: bool,
    timestamp: SystemTime,
    source: VerdictSource,
}

impl Verdict {
    /// A model verdict; blocked when `score >= threshold`.
    pub fn scored(domain: impl Into<String>, score: f64, threshold: f64) -> Self {
        Self {
            domain: domain.into(),
            score,
            blocked: score >= threshold,
            timestamp: SystemTime::now(),
            source: VerdictSource::Model,
        }
    }

    /// A static rule verdict, scored 1 when denied and 0 when allowed.
    pub fn rule(domain: impl Into<String>, blocked: bool) -> Self {
        Self {
            domain: domain.into(),
            score: if blocked { 1.0 } else { 0.0 },
            blocked,
            timestamp: SystemTime::now(),
            source: VerdictSource::Rule,
        }
    }

    /// An unscored allow, used when classification could not run.
    pub fn passthrough(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            score: 0.0,
            blocked: false,
            timestamp: SystemTime::now(),
            source: VerdictSource::Passthrough,
        }
    }

    /// The same decision, reported as served from the cache.
    #[must_use]
    pub fn from_cache(&self) -> Self {
        Self {
            source: VerdictSource::Cache,
            ..self.clone()
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub const fn score(&self) -> f64 {
        self.score
    }

    pub const fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// When the decision was first reached.
    pub const fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub const fn source(&self) -> VerdictSource {
        self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_block_at_or_above_threshold() {
        assert!(Verdict::scored("a.example", 0.5, 0.5).is_blocked());
        assert!(Verdict::scored("a.example", 0.994, 0.5).is_blocked());
        assert!(!Verdict::scored("a.example", 0.499, 0.5).is_blocked());
        assert!(!Verdict::scored("a.example", 1.0, 1.01).is_blocked());
    }

    #[test]
    fn should_keep_decision_when_served_from_cache() {
        let verdict = Verdict::scored("ads.example", 0.9, 0.5);
        let cached = verdict.from_cache();

        assert_eq!(cached.source(), VerdictSource::Cache);
        assert_eq!(cached.domain(), "ads.example");
        assert!(cached.is_blocked());
        assert_eq!(cached.timestamp(), verdict.timestamp());
    }

    #[test]
    fn should_score_rules_and_passthrough() {
        assert!((Verdict::rule("x", true).score() - 1.0).abs() < f64::EPSILON);
        assert!(!Verdict::rule("x", false).is_blocked());

        let passthrough = Verdict::passthrough("x");
        assert!(!passthrough.is_blocked());
        assert_eq!(passthrough.source().to_string(), "passthrough");
    }
}
