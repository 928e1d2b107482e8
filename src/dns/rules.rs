//! Static allow/deny rules consulted before the model.
//!
//! Supports exact domain matches and wildcard patterns (*.example.com).
//! Patterns are normalized once at construction so lookups only slice strings.

use std::collections::HashSet;

/// Outcome of matching a domain against the rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleMatch {
    /// Always forwarded.
    Allow,
    /// Always blocked.
    Deny,
}

/// A compiled set of domain patterns.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    /// Exact domain matches (stored lowercase, without trailing dot).
    exact: HashSet<String>,
    /// Wildcard suffixes, kept with their leading dot (e.g., ".ads.com").
    wildcard_suffixes: Vec<String>,
}

impl PatternSet {
    /// Compile a list of patterns.
    ///
    /// Patterns can be:
    /// - Exact matches: "example.com"
    /// - Wildcard matches: "*.example.com" (matches any subdomain, not the base)
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut exact = HashSet::new();
        let mut wildcard_suffixes = Vec::new();

        for pattern in patterns {
            let pattern = pattern.as_ref().to_lowercase();
            let pattern = pattern.trim_end_matches('.');

            // Only "*." starts a wildcard, so "*ads.com" never matches "badads.com".
            if let Some(base) = pattern.strip_prefix("*.") {
                wildcard_suffixes.push(format!(".{base}"));
            } else {
                exact.insert(pattern.to_string());
            }
        }

        Self {
            exact,
            wildcard_suffixes,
        }
    }

    /// Check a normalized (lowercase, no trailing dot) domain.
    #[inline]
    pub fn matches(&self, domain: &str) -> bool {
        self.exact.contains(domain)
            || self
                .wildcard_suffixes
                .iter()
                .any(|suffix| domain.ends_with(suffix.as_str()))
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.wildcard_suffixes.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.exact.len() + self.wildcard_suffixes.len()
    }
}

/// Allow and deny lists. The allowlist wins when both match.
#[derive(Debug, Clone, Default)]
pub struct DomainRules {
    allow: PatternSet,
    deny: PatternSet,
}

impl DomainRules {
    pub fn new<A, D, S>(allow: A, deny: D) -> Self
    where
        A: IntoIterator<Item = S>,
        D: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allow: PatternSet::new(allow),
            deny: PatternSet::new(deny),
        }
    }

    /// Match a normalized domain against the rules.
    #[inline]
    pub fn check(&self, domain: &str) -> Option<RuleMatch> {
        if self.allow.matches(domain) {
            Some(RuleMatch::Allow)
        } else if self.deny.matches(domain) {
            Some(RuleMatch::Deny)
        } else {
            None
        }
    }

    pub fn allow_count(&self) -> usize {
        self.allow.len()
    }

    pub fn deny_count(&self) -> usize {
        self.deny.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_match_exact_domains() {
        let set = PatternSet::new(["google.com", "facebook.com"]);

        assert!(set.matches("google.com"));
        assert!(set.matches("facebook.com"));
        assert!(!set.matches("twitter.com"));
    }

    #[test]
    fn should_normalize_patterns() {
        let set = PatternSet::new(["Google.COM.", "*.ADS.com"]);

        assert!(set.matches("google.com"));
        assert!(set.matches("tracking.ads.com"));
    }

    #[test]
    fn should_match_wildcard_subdomains_only() {
        let set = PatternSet::new(["*.ads.com"]);

        assert!(set.matches("tracking.ads.com"));
        assert!(set.matches("a.b.c.ads.com"));
        assert!(!set.matches("ads.com"));
        assert!(!set.matches("badads.com"));
    }

    #[test]
    fn should_not_treat_star_without_dot_as_wildcard() {
        let set = PatternSet::new(["*ads.com"]);

        assert!(!set.matches("badads.com"));
        assert!(!set.matches("tracking.ads.com"));
        assert!(!set.matches("ads.com"));
    }

    #[test]
    fn should_report_pattern_count() {
        let set = PatternSet::new(["a.com", "b.com", "*.c.com"]);
        assert_eq!(set.len(), 3);
        assert!(!set.is_empty());
        assert!(PatternSet::default().is_empty());
    }

    #[test]
    fn should_prefer_allowlist_over_denylist() {
        let rules = DomainRules::new(["cdn.ads.com"], ["*.ads.com", "tracker.net"]);

        assert_eq!(rules.check("cdn.ads.com"), Some(RuleMatch::Allow));
        assert_eq!(rules.check("pixel.ads.com"), Some(RuleMatch::Deny));
        assert_eq!(rules.check("tracker.net"), Some(RuleMatch::Deny));
        assert_eq!(rules.check("github.com"), None);
        assert_eq!(rules.allow_count(), 1);
        assert_eq!(rules.deny_count(), 2);
    }

    #[test]
    fn should_match_nothing_when_empty() {
        let rules = DomainRules::default();
        assert_eq!(rules.check("google.com"), None);
    }
}
