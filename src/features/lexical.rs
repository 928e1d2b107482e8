//! Lexical features computed from the domain string alone.
//!
//! The provider is built for a model's column list: each column name maps to
//! a known feature, unknown names produce a constant 0 so a model trained
//! with extra columns still gets a vector of the right length.
#![allow(clippy::cast_precision_loss)]

use std::collections::{HashMap, HashSet};

use tracing::warn;

use super::FeatureProvider;

const AD_KEYWORDS: &[&str] = &[
    "ad", "ads", "advert", "adserver", "adsystem", "adservice", "banner", "click", "tracker",
    "track", "analytic", "analytics", "pixel", "tag", "doubleclick", "googlead", "pagead",
    "sponsor", "popup", "pop", "promo", "marketing", "affiliate", "impression", "beacon",
    "telemetry", "stats", "metric", "count", "event",
];

const TRACKER_KEYWORDS: &[&str] = &[
    "track", "analytics", "pixel", "beacon", "telemetry", "stat", "metric",
];

const CDN_KEYWORDS: &[&str] = &["cdn", "static", "media", "asset", "content", "cache"];

const SUSPICIOUS_WORDS: &[&str] = &[
    "click", "popup", "banner", "promo", "offer", "deal", "win", "prize",
];

const LEGIT_PATTERNS: &[&str] = &[
    "api", "www", "mail", "smtp", "imap", "ftp", "docs", "blog", "wiki",
];

const AD_NETWORKS: &[&str] = &[
    "doubleclick",
    "googlesyndication",
    "googleadservices",
    "adserver",
    "adsystem",
    "serving-sys",
    "criteo",
    "outbrain",
    "taboola",
    "pubmatic",
    "smartadserver",
    "rubiconproject",
    "openx",
    "yieldmanager",
];

const SUSPICIOUS_TLDS: &[&str] = &[
    "xyz", "top", "win", "bid", "gdn", "loan", "click", "online", "work", "gq", "ml", "cf", "tk",
    "ga", "buzz", "stream",
];

const NEW_GTLDS: &[&str] = &["xyz", "top", "wang", "win", "bid", "loan", "click"];

const COMMERCIAL_TLDS: &[&str] = &["com", "net", "biz"];

/// Public suffixes made of two labels that are common enough to matter.
const TWO_LABEL_SUFFIXES: &[&str] = &[
    "co.uk", "org.uk", "ac.uk", "gov.uk", "com.au", "net.au", "org.au", "co.jp", "ne.jp", "or.jp",
    "com.br", "com.cn", "com.mx", "co.in", "co.nz", "co.za", "com.tr", "com.tw", "co.kr",
];

const KEYWORD_BOUNDARIES: &[char] = &['-', '_', '.', '/'];

/// A single named lexical feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    DomainLength,
    DomainNameLength,
    SubdomainLength,
    SubdomainCount,
    PathDepth,
    DigitCount,
    DigitRatio,
    HyphenCount,
    HyphenRatio,
    UnderscoreCount,
    ConsonantRatio,
    VowelRatio,
    VowelConsonantRatio,
    Entropy,
    DomainNameEntropy,
    SubdomainEntropy,
    AdKeywordCount,
    HasAdKeyword,
    KeywordWithBoundary,
    TrackerKeywordCount,
    CdnKeywordCount,
    SuspiciousWordCount,
    LegitPatternCount,
    MatchesAdNetwork,
    TldSuspicious,
    TldLength,
    IsCommercialTld,
    TldIsCountryCode,
    TldIsNewGtld,
    HasMultipleHyphens,
    HasNumberSequence,
    StartsWithNumber,
    MaxConsonantSequence,
    MaxDigitSequence,
    NumericSegments,
    UniqueCharRatio,
    MaxCharRepetition,
    HasRepeatedBigram,
    HasRepeatedTrigram,
    SubdomainLevels,
    AvgSubdomainLength,
    SubdomainHasNumber,
    DomainNameHasNumber,
    DomainNameStartsWithAd,
    DomainNameEndsWithAd,
    AdHeuristicScore,
}

/// Column names, in the order used by [`LexicalFeatures::all`].
const NAMES: &[(&str, Feature)] = &[
    ("domain_length", Feature::DomainLength),
    ("domain_name_length", Feature::DomainNameLength),
    ("subdomain_length", Feature::SubdomainLength),
    ("subdomain_count", Feature::SubdomainCount),
    ("path_depth", Feature::PathDepth),
    ("digit_count", Feature::DigitCount),
    ("digit_ratio", Feature::DigitRatio),
    ("hyphen_count", Feature::HyphenCount),
    ("hyphen_ratio", Feature::HyphenRatio),
    ("underscore_count", Feature::UnderscoreCount),
    ("consonant_ratio", Feature::ConsonantRatio),
    ("vowel_ratio", Feature::VowelRatio),
    ("vowel_consonant_ratio", Feature::VowelConsonantRatio),
    ("entropy", Feature::Entropy),
    ("domain_name_entropy", Feature::DomainNameEntropy),
    ("subdomain_entropy", Feature::SubdomainEntropy),
    ("ad_keyword_count", Feature::AdKeywordCount),
    ("has_ad_keyword", Feature::HasAdKeyword),
    ("keyword_with_boundary", Feature::KeywordWithBoundary),
    ("tracker_keyword_count", Feature::TrackerKeywordCount),
    ("cdn_keyword_count", Feature::CdnKeywordCount),
    ("suspicious_word_count", Feature::SuspiciousWordCount),
    ("legit_pattern_count", Feature::LegitPatternCount),
    ("matches_ad_network", Feature::MatchesAdNetwork),
    ("tld_suspicious", Feature::TldSuspicious),
    ("tld_length", Feature::TldLength),
    ("is_commercial_tld", Feature::IsCommercialTld),
    ("tld_is_country_code", Feature::TldIsCountryCode),
    ("tld_is_new_gtld", Feature::TldIsNewGtld),
    ("has_multiple_hyphens", Feature::HasMultipleHyphens),
    ("has_number_sequence", Feature::HasNumberSequence),
    ("starts_with_number", Feature::StartsWithNumber),
    ("max_consonant_sequence", Feature::MaxConsonantSequence),
    ("max_digit_sequence", Feature::MaxDigitSequence),
    ("numeric_segments", Feature::NumericSegments),
    ("unique_char_ratio", Feature::UniqueCharRatio),
    ("max_char_repetition", Feature::MaxCharRepetition),
    ("has_repeated_bigram", Feature::HasRepeatedBigram),
    ("has_repeated_trigram", Feature::HasRepeatedTrigram),
    ("subdomain_levels", Feature::SubdomainLevels),
    ("avg_subdomain_length", Feature::AvgSubdomainLength),
    ("subdomain_has_number", Feature::SubdomainHasNumber),
    ("domain_name_has_number", Feature::DomainNameHasNumber),
    ("domain_name_starts_with_ad", Feature::DomainNameStartsWithAd),
    ("domain_name_ends_with_ad", Feature::DomainNameEndsWithAd),
    ("ad_heuristic_score", Feature::AdHeuristicScore),
];

impl Feature {
    pub fn from_name(name: &str) -> Option<Self> {
        NAMES
            .iter()
            .find_map(|&(known, feature)| (known == name).then_some(feature))
    }

    fn compute(self, d: &Parts<'_>) -> f64 {
        let full = d.full;
        match self {
            Self::DomainLength => len(full),
            Self::DomainNameLength => len(d.name),
            Self::SubdomainLength => len(d.subdomain),
            Self::SubdomainCount | Self::SubdomainLevels => d.subdomain_labels().count() as f64,
            Self::PathDepth => full.matches('.').count() as f64,
            Self::DigitCount => digit_count(full),
            Self::DigitRatio => ratio(digit_count(full), len(full)),
            Self::HyphenCount => full.matches('-').count() as f64,
            Self::HyphenRatio => ratio(full.matches('-').count() as f64, len(full)),
            Self::UnderscoreCount => full.matches('_').count() as f64,
            Self::ConsonantRatio => ratio(consonants(d.name), len(d.name)),
            Self::VowelRatio => ratio(vowels(d.name), len(d.name)),
            Self::VowelConsonantRatio => ratio(vowels(d.name), consonants(d.name)),
            Self::Entropy => entropy(full),
            Self::DomainNameEntropy => entropy(d.name),
            Self::SubdomainEntropy => entropy(d.subdomain),
            Self::AdKeywordCount => contained(full, AD_KEYWORDS),
            Self::HasAdKeyword => flag(contained(full, AD_KEYWORDS) > 0.0),
            Self::KeywordWithBoundary => flag(keyword_with_boundary(full)),
            Self::TrackerKeywordCount => contained(full, TRACKER_KEYWORDS),
            Self::CdnKeywordCount => contained(full, CDN_KEYWORDS),
            Self::SuspiciousWordCount => contained(full, SUSPICIOUS_WORDS),
            Self::LegitPatternCount => contained(full, LEGIT_PATTERNS),
            Self::MatchesAdNetwork => flag(contained(full, AD_NETWORKS) > 0.0),
            Self::TldSuspicious => flag(SUSPICIOUS_TLDS.contains(&d.tld)),
            Self::TldLength => len(d.tld),
            Self::IsCommercialTld => flag(COMMERCIAL_TLDS.contains(&d.tld)),
            Self::TldIsCountryCode => {
                flag(d.tld.len() == 2 && d.tld.chars().all(|c| c.is_ascii_alphabetic()))
            }
            Self::TldIsNewGtld => flag(NEW_GTLDS.contains(&d.tld)),
            Self::HasMultipleHyphens => flag(full.matches('-').count() >= 3),
            Self::HasNumberSequence => flag(longest_run(full, |c| c.is_ascii_digit()) >= 3),
            Self::StartsWithNumber => flag(d.name.starts_with(|c: char| c.is_ascii_digit())),
            Self::MaxConsonantSequence => longest_run(d.name, is_consonant) as f64,
            Self::MaxDigitSequence => longest_run(full, |c| c.is_ascii_digit()) as f64,
            Self::NumericSegments => full
                .split(|c: char| !c.is_ascii_digit())
                .filter(|s| !s.is_empty())
                .count() as f64,
            Self::UniqueCharRatio => {
                ratio(full.chars().collect::<HashSet<_>>().len() as f64, len(full))
            }
            Self::MaxCharRepetition => max_repetition(full) as f64,
            Self::HasRepeatedBigram => flag(has_repeated_ngram(full, 2)),
            Self::HasRepeatedTrigram => flag(has_repeated_ngram(full, 3)),
            Self::AvgSubdomainLength => {
                let labels: Vec<_> = d.subdomain_labels().collect();
                let total: usize = labels.iter().map(|l| l.chars().count()).sum();
                ratio(total as f64, labels.len() as f64)
            }
            Self::SubdomainHasNumber => flag(d.subdomain.chars().any(|c| c.is_ascii_digit())),
            Self::DomainNameHasNumber => flag(d.name.chars().any(|c| c.is_ascii_digit())),
            Self::DomainNameStartsWithAd => flag(d.name.starts_with("ad")),
            Self::DomainNameEndsWithAd => flag(d.name.ends_with("ad") || d.name.ends_with("ads")),
            Self::AdHeuristicScore => ad_heuristic(d),
        }
    }
}

/// A normalized domain split into subdomain, registrable name and suffix.
#[derive(Debug, PartialEq, Eq)]
struct Parts<'a> {
    full: &'a str,
    subdomain: &'a str,
    name: &'a str,
    tld: &'a str,
}

impl<'a> Parts<'a> {
    fn split(full: &'a str) -> Self {
        let Some(last_dot) = full.rfind('.') else {
            return Self {
                full,
                subdomain: "",
                name: full,
                tld: "",
            };
        };

        let mut suffix_start = last_dot + 1;
        if let Some(prev_dot) = full[..last_dot].rfind('.')
            && TWO_LABEL_SUFFIXES.contains(&&full[prev_dot + 1..])
        {
            suffix_start = prev_dot + 1;
        }

        let before = &full[..suffix_start - 1];
        let name_start = before.rfind('.').map_or(0, |i| i + 1);
        Self {
            full,
            subdomain: if name_start == 0 {
                ""
            } else {
                &before[..name_start - 1]
            },
            name: &before[name_start..],
            tld: &full[suffix_start..],
        }
    }

    fn subdomain_labels(&self) -> impl Iterator<Item = &'a str> {
        let subdomain = self.subdomain;
        subdomain.split('.').filter(move |_| !subdomain.is_empty())
    }
}

fn len(s: &str) -> f64 {
    s.chars().count() as f64
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

fn flag(value: bool) -> f64 {
    f64::from(u8::from(value))
}

fn digit_count(s: &str) -> f64 {
    s.chars().filter(char::is_ascii_digit).count() as f64
}

fn is_vowel(c: char) -> bool {
    matches!(c, 'a' | 'e' | 'i' | 'o' | 'u')
}

fn is_consonant(c: char) -> bool {
    c.is_ascii_lowercase() && !is_vowel(c)
}

fn vowels(s: &str) -> f64 {
    s.chars().filter(|&c| is_vowel(c)).count() as f64
}

fn consonants(s: &str) -> f64 {
    s.chars().filter(|&c| is_consonant(c)).count() as f64
}

fn contained(haystack: &str, needles: &[&str]) -> f64 {
    needles.iter().filter(|n| haystack.contains(*n)).count() as f64
}

/// Shannon entropy in bits per character.
fn entropy(s: &str) -> f64 {
    let mut counts: HashMap<char, usize> = HashMap::new();
    let mut total = 0usize;
    for c in s.chars() {
        *counts.entry(c).or_default() += 1;
        total += 1;
    }
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    counts
        .values()
        .map(|&count| {
            let p = count as f64 / total;
            -p * p.log2()
        })
        .sum()
}

fn longest_run(s: &str, pred: impl Fn(char) -> bool) -> usize {
    let mut best = 0;
    let mut current = 0;
    for c in s.chars() {
        if pred(c) {
            current += 1;
            best = best.max(current);
        } else {
            current = 0;
        }
    }
    best
}

fn max_repetition(s: &str) -> usize {
    let mut best = 0;
    let mut current = 0;
    let mut previous = None;
    for c in s.chars() {
        current = if previous == Some(c) { current + 1 } else { 1 };
        best = best.max(current);
        previous = Some(c);
    }
    best
}

fn has_repeated_ngram(s: &str, n: usize) -> bool {
    let chars: Vec<char> = s.chars().collect();
    let mut seen = HashSet::new();
    chars.windows(n).any(|window| !seen.insert(window))
}

/// An ad keyword delimited by `-_./` or the ends of the domain on both sides.
fn keyword_with_boundary(domain: &str) -> bool {
    AD_KEYWORDS.iter().any(|keyword| {
        domain.match_indices(keyword).any(|(start, _)| {
            let end = start + keyword.len();
            let before = domain[..start].chars().next_back();
            let after = domain[end..].chars().next();
            let bounded_before = before.is_none_or(|c| KEYWORD_BOUNDARIES.contains(&c));
            let bounded_after = after.is_none_or(|c| KEYWORD_BOUNDARIES.contains(&c));
            bounded_before && bounded_after && (before.is_some() || after.is_some())
        })
    })
}

fn ad_heuristic(d: &Parts<'_>) -> f64 {
    let mut score = 0.0;
    if contained(d.full, AD_KEYWORDS) > 0.0 {
        score += 3.0;
    }
    if longest_run(d.full, |c| c.is_ascii_digit()) >= 3 {
        score += 1.0;
    }
    if d.full.matches('-').count() >= 2 {
        score += 2.0;
    }
    if d.subdomain.matches('.').count() >= 2 {
        score += 1.0;
    }
    if d.name.chars().count() < 5 && d.name.chars().any(|c| c.is_ascii_digit()) {
        score += 2.0;
    }
    score
}

fn normalize(domain: &str) -> String {
    domain.trim().trim_end_matches('.').to_lowercase()
}

/// Lexical feature provider laid out in a model's column order.
#[derive(Debug, Clone)]
pub struct LexicalFeatures {
    columns: Vec<Option<Feature>>,
}

impl LexicalFeatures {
    /// Build a provider for the given column names.
    pub fn for_columns<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut unknown = Vec::new();
        let columns = names
            .into_iter()
            .map(|name| {
                let feature = Feature::from_name(name.as_ref());
                if feature.is_none() {
                    unknown.push(name.as_ref().to_string());
                }
                feature
            })
            .collect();

        if !unknown.is_empty() {
            warn!(
                columns = ?unknown,
                "model columns without a lexical feature will be filled with 0"
            );
        }

        Self { columns }
    }

    /// Every known feature, in declaration order.
    pub fn all() -> Self {
        Self {
            columns: NAMES.iter().map(|&(_, feature)| Some(feature)).collect(),
        }
    }

    /// Names of every known feature, in the order used by [`all`](Self::all).
    pub fn known_names() -> impl Iterator<Item = &'static str> {
        NAMES.iter().map(|&(name, _)| name)
    }
}

impl FeatureProvider for LexicalFeatures {
    fn feature_count(&self) -> usize {
        self.columns.len()
    }

    fn extract(&self, domain: &str) -> Vec<f64> {
        let normalized = normalize(domain);
        let parts = Parts::split(&normalized);
        self.columns
            .iter()
            .map(|column| column.map_or(0.0, |feature| feature.compute(&parts)))
            .collect()
    }
}
