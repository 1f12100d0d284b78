//! Domain taxonomy and lexical domain classification.
//!
//! Every manual is tagged with one or more domains at ingest time, and every
//! query is classified at search time so the vector search can be narrowed.
//! Classification never fails: text that matches nothing gets an empty tag
//! set, which means "search everything".

use std::{collections::HashSet, fmt, str::FromStr};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default maximum number of domains assigned to a query or document.
pub const DEFAULT_MAX_DOMAINS: usize = 3;

/// A coarse topic category from the fixed taxonomy.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Claims,
    Remits,
    Analytics,
    Patient,
    UserManagement,
    Rules,
    Print,
}

impl Domain {
    pub const ALL: [Domain; 7] = [
        Domain::Claims,
        Domain::Remits,
        Domain::Analytics,
        Domain::Patient,
        Domain::UserManagement,
        Domain::Rules,
        Domain::Print,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Domain::Claims => "claims",
            Domain::Remits => "remits",
            Domain::Analytics => "analytics",
            Domain::Patient => "patient",
            Domain::UserManagement => "user_management",
            Domain::Rules => "rules",
            Domain::Print => "print",
        }
    }

    /// One-sentence description handed to the answer generator.
    pub fn hint(self) -> &'static str {
        match self {
            Domain::Claims => {
                "This question relates to claims processing, billing, denials, or payer interactions."
            }
            Domain::Remits => {
                "This question relates to remittance advice, ERA processing, deposits, or payment reconciliation."
            }
            Domain::Analytics => {
                "This question relates to reports, dashboards, analytics, or performance metrics."
            }
            Domain::Patient => {
                "This question relates to patient estimation, responsibility, or lockbox processing."
            }
            Domain::UserManagement => {
                "This question relates to user accounts, permissions, roles, or access control."
            }
            Domain::Rules => {
                "This question relates to automation rules, Rule Wizard, or AltitudeAssist workflows."
            }
            Domain::Print => {
                "This question relates to print services, statements, or batch printing."
            }
        }
    }

    fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Domain::ALL
            .into_iter()
            .find(|d| d.as_str() == s.trim())
            .ok_or_else(|| Error::Config(format!("unknown domain tag '{s}'")))
    }
}

/// Pack a set of domains into a bitmask.
pub fn domain_mask(domains: &[Domain]) -> u32 {
    domains.iter().fold(0, |mask, d| mask | d.bit())
}

/// Unpack a bitmask into domains, in taxonomy order.
pub fn domains_from_mask(mask: u32) -> Vec<Domain> {
    Domain::ALL
        .into_iter()
        .filter(|d| mask & d.bit() != 0)
        .collect()
}

/// Combined hint sentence for a set of domains.
pub fn domain_hint(domains: &[Domain]) -> String {
    domains
        .iter()
        .map(|d| d.hint())
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone)]
struct DomainEntry {
    domain: Domain,
    keywords: Vec<String>,
    filename_patterns: Vec<String>,
}

/// The keyword and file-name pattern sets that define each domain.
#[derive(Debug, Clone)]
pub struct DomainTaxonomy {
    entries: Vec<DomainEntry>,
}

impl Default for DomainTaxonomy {
    fn default() -> Self {
        let entry = |domain, keywords: &[&str], patterns: &[&str]| DomainEntry {
            domain,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            filename_patterns: patterns.iter().map(|p| p.to_string()).collect(),
        };

        Self {
            entries: vec![
                entry(
                    Domain::Claims,
                    &["claim", "claims", "billing", "denial", "denials", "appeal", "payer"],
                    &["claim", "claims"],
                ),
                entry(
                    Domain::Remits,
                    &["remit", "remittance", "deposit", "era", "835", "payment"],
                    &["remit", "remits", "deposit"],
                ),
                entry(
                    Domain::Analytics,
                    &["analytics", "report", "dashboard", "peak", "metrics", "kpi"],
                    &["analytics", "peak"],
                ),
                entry(
                    Domain::Patient,
                    &["patient", "estimation", "estimate", "lockbox", "responsibility"],
                    &["patient", "estimation", "lockbox"],
                ),
                entry(
                    Domain::UserManagement,
                    &["user", "permission", "role", "access", "login", "password"],
                    &["user management", "user guide"],
                ),
                entry(
                    Domain::Rules,
                    &["rule", "wizard", "altitude", "assist", "automation", "workflow"],
                    &["rule", "altitude", "assist"],
                ),
                entry(
                    Domain::Print,
                    &["print", "statement", "batch", "paper"],
                    &["print", "services"],
                ),
            ],
        }
    }
}

impl DomainTaxonomy {
    /// Add keywords to a domain's keyword set.
    pub fn with_extra_keywords<I, S>(mut self, domain: Domain, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.domain == domain) {
            for keyword in keywords {
                let keyword = keyword.as_ref().trim().to_lowercase();
                if !keyword.is_empty() && !entry.keywords.contains(&keyword) {
                    entry.keywords.push(keyword);
                }
            }
        }
        self
    }

    pub fn keywords(&self, domain: Domain) -> &[String] {
        self.entries
            .iter()
            .find(|e| e.domain == domain)
            .map_or(&[], |e| e.keywords.as_slice())
    }
}

/// A domain with its keyword-density score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DomainScore {
    pub domain: Domain,
    pub score: f32,
}

/// Lexical classifier over a [`DomainTaxonomy`].
#[derive(Debug, Clone)]
pub struct DomainClassifier {
    taxonomy: DomainTaxonomy,
    threshold: f32,
    max_domains: usize,
}

impl Default for DomainClassifier {
    fn default() -> Self {
        Self::new(DomainTaxonomy::default(), 0.0, DEFAULT_MAX_DOMAINS)
    }
}

impl DomainClassifier {
    pub fn new(taxonomy: DomainTaxonomy, threshold: f32, max_domains: usize) -> Self {
        Self {
            taxonomy,
            threshold,
            max_domains,
        }
    }

    /// Score every domain whose keyword density exceeds the threshold,
    /// highest first.
    ///
    /// Density is the number of words that start with one of the domain's
    /// keywords (case-insensitive, so "claim" also counts "claims") divided
    /// by the number of words in the text. A word matched by several
    /// keywords of the same domain counts once.
    pub fn score(&self, text: &str) -> Vec<DomainScore> {
        let lower = text.to_lowercase();
        let words = lower.split_whitespace().count();
        if words == 0 {
            return Vec::new();
        }

        let mut scores: Vec<DomainScore> = self
            .taxonomy
            .entries
            .iter()
            .filter_map(|entry| {
                let hits = count_keyword_positions(&lower, &entry.keywords);
                let score = hits as f32 / words as f32;
                (hits > 0 && score > self.threshold).then_some(DomainScore {
                    domain: entry.domain,
                    score,
                })
            })
            .collect();

        // Stable sort keeps taxonomy order among equal scores.
        scores.sort_by(|a, b| b.score.total_cmp(&a.score));
        scores
    }

    /// Domains a query is asking about, best match first. Empty when
    /// nothing matches.
    ///
    /// # Examples
    ///
    /// ```
    /// use manualrag::domain::{Domain, DomainClassifier};
    ///
    /// let classifier = DomainClassifier::default();
    /// assert_eq!(
    ///     classifier.classify_query("How do I submit a claim?"),
    ///     vec![Domain::Claims]
    /// );
    /// assert!(classifier.classify_query("xyzzy frobnicate").is_empty());
    /// ```
    pub fn classify_query(&self, query: &str) -> Vec<Domain> {
        self.score(query)
            .into_iter()
            .take(self.max_domains)
            .map(|s| s.domain)
            .collect()
    }

    /// Stable digest of everything that influences document tagging: the
    /// taxonomy, the threshold and the domain cap.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for entry in &self.taxonomy.entries {
            hasher.update(entry.domain.as_str().as_bytes());
            for word in entry.keywords.iter().chain(&entry.filename_patterns) {
                hasher.update(b"\0");
                hasher.update(word.as_bytes());
            }
            hasher.update(b"\n");
        }
        hasher.update(&self.threshold.to_le_bytes());
        hasher.update(&(self.max_domains as u64).to_le_bytes());
        let hex = hasher.finalize().to_hex();
        hex.as_str()[..16].to_string()
    }

    /// Tag a document from its file name, falling back to its content.
    pub fn classify_document(&self, file_name: &str, text: &str) -> Vec<Domain> {
        let name = file_name.to_lowercase().replace(['_', '-'], " ");

        let by_name: Vec<Domain> = self
            .taxonomy
            .entries
            .iter()
            .filter(|entry| entry.filename_patterns.iter().any(|p| name.contains(p.as_str())))
            .map(|entry| entry.domain)
            .take(self.max_domains)
            .collect();

        if !by_name.is_empty() {
            return by_name;
        }

        self.classify_query(text)
    }
}

fn word_prefix_matches<'a>(
    haystack: &'a str,
    needle: &'a str,
) -> impl Iterator<Item = usize> + 'a {
    haystack
        .match_indices(needle)
        .filter(move |(idx, _)| {
            !needle.is_empty()
                && haystack[..*idx]
                    .chars()
                    .next_back()
                    .is_none_or(|c| !c.is_alphanumeric())
        })
        .map(|(idx, _)| idx)
}

/// Number of distinct positions where any of `keywords` starts a word.
fn count_keyword_positions(haystack: &str, keywords: &[String]) -> usize {
    keywords
        .iter()
        .flat_map(|kw| word_prefix_matches(haystack, kw))
        .collect::<HashSet<usize>>()
        .len()
}
