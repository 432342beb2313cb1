//! Domain matching for static host rules.
//!
//! Four rule kinds:
//! - `Full`: the domain equals the pattern
//! - `Subdomain`: the domain is the pattern or ends with `.pattern`
//! - `Keyword`: the pattern occurs anywhere in the domain
//! - `Regex`: the pattern matches the domain
//!
//! Domains are lowercased before matching. Full, subdomain and keyword
//! patterns are lowercased too; regex patterns are compiled as written and
//! stay case-sensitive, so an uppercase literal in a regex never matches.
//! [`MatcherGroup`] indexes many rules and reports every rule that matches,
//! in registration order.

use crate::base::error::{DnsError, DnsResult};
use regex::Regex;
use std::collections::HashMap;
use std::fmt;

/// How a rule pattern is compared against a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatcherKind {
    Full,
    Subdomain,
    Keyword,
    Regex,
}

impl fmt::Display for MatcherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MatcherKind::Full => "full",
            MatcherKind::Subdomain => "domain",
            MatcherKind::Keyword => "keyword",
            MatcherKind::Regex => "regexp",
        };
        f.write_str(name)
    }
}

/// A single compiled rule.
#[derive(Debug, Clone)]
pub enum DomainMatcher {
    Full(String),
    Subdomain(String),
    Keyword(String),
    Regex(Regex),
}

impl DomainMatcher {
    /// Compile `pattern` as a rule of `kind`.
    ///
    /// Fails only for regex patterns that do not compile.
    pub fn new(kind: MatcherKind, pattern: &str) -> DnsResult<Self> {
        let matcher = match kind {
            MatcherKind::Full => DomainMatcher::Full(pattern.to_lowercase()),
            MatcherKind::Subdomain => {
                let pattern = pattern.trim_start_matches('.');
                DomainMatcher::Subdomain(pattern.to_lowercase())
            }
            MatcherKind::Keyword => DomainMatcher::Keyword(pattern.to_lowercase()),
            MatcherKind::Regex => {
                let regex = Regex::new(pattern).map_err(|e| {
                    DnsError::InvalidConfig(format!("bad regexp {:?}: {}", pattern, e))
                })?;
                DomainMatcher::Regex(regex)
            }
        };
        Ok(matcher)
    }

    pub fn kind(&self) -> MatcherKind {
        match self {
            DomainMatcher::Full(_) => MatcherKind::Full,
            DomainMatcher::Subdomain(_) => MatcherKind::Subdomain,
            DomainMatcher::Keyword(_) => MatcherKind::Keyword,
            DomainMatcher::Regex(_) => MatcherKind::Regex,
        }
    }

    pub fn matches(&self, domain: &str) -> bool {
        let domain = domain.to_lowercase();
        match self {
            DomainMatcher::Full(p) => domain == *p,
            DomainMatcher::Subdomain(p) => is_subdomain_of(&domain, p),
            DomainMatcher::Keyword(p) => domain.contains(p.as_str()),
            DomainMatcher::Regex(r) => r.is_match(&domain),
        }
    }
}

fn is_subdomain_of(domain: &str, parent: &str) -> bool {
    match domain.strip_suffix(parent) {
        Some("") => true,
        Some(rest) => rest.ends_with('.'),
        None => false,
    }
}

/// An indexed set of rules, each identified by the id [`add`](Self::add)
/// returned.
///
/// Full and subdomain rules are hashed; keyword and regex rules are scanned.
#[derive(Debug, Default)]
pub struct MatcherGroup {
    full: HashMap<String, Vec<u32>>,
    subdomain: HashMap<String, Vec<u32>>,
    keyword: Vec<(String, u32)>,
    regex: Vec<(Regex, u32)>,
    count: u32,
}

impl MatcherGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule and return its id. Ids are assigned from 0 upward.
    pub fn add(&mut self, matcher: DomainMatcher) -> u32 {
        let id = self.count;
        self.count += 1;
        match matcher {
            DomainMatcher::Full(p) => self.full.entry(p).or_default().push(id),
            DomainMatcher::Subdomain(p) => self.subdomain.entry(p).or_default().push(id),
            DomainMatcher::Keyword(p) => self.keyword.push((p, id)),
            DomainMatcher::Regex(r) => self.regex.push((r, id)),
        }
        id
    }

    /// Ids of every rule matching `domain`, in registration order.
    pub fn match_ids(&self, domain: &str) -> Vec<u32> {
        let domain = domain.to_lowercase();
        let mut ids = Vec::new();

        if let Some(found) = self.full.get(&domain) {
            ids.extend_from_slice(found);
        }

        // Walk the domain and each parent: a.b.c, b.c, c
        let mut suffix = domain.as_str();
        loop {
            if let Some(found) = self.subdomain.get(suffix) {
                ids.extend_from_slice(found);
            }
            match suffix.split_once('.') {
                Some((_, parent)) if !parent.is_empty() => suffix = parent,
                _ => break,
            }
        }

        ids.extend(
            self.keyword
                .iter()
                .filter(|(p, _)| domain.contains(p.as_str()))
                .map(|(_, id)| *id),
        );
        ids.extend(
            self.regex
                .iter()
                .filter(|(r, _)| r.is_match(&domain))
                .map(|(_, id)| *id),
        );

        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub fn len(&self) -> usize {
        self.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full() {
        let m = DomainMatcher::new(MatcherKind::Full, "example.com").unwrap();
        assert!(m.matches("example.com"));
        assert!(m.matches("EXAMPLE.com"));
        assert!(!m.matches("www.example.com"));
    }

    #[test]
    fn test_subdomain() {
        let m = DomainMatcher::new(MatcherKind::Subdomain, "example.com").unwrap();
        assert!(m.matches("example.com"));
        assert!(m.matches("a.b.example.com"));
        assert!(!m.matches("notexample.com"));
        assert!(!m.matches("example.com.cn"));
    }

    #[test]
    fn test_keyword() {
        let m = DomainMatcher::new(MatcherKind::Keyword, "google").unwrap();
        assert!(m.matches("www.google.com"));
        assert!(m.matches("googleapis.com"));
        assert!(!m.matches("example.com"));
    }

    #[test]
    fn test_regex() {
        let m = DomainMatcher::new(MatcherKind::Regex, r"^ad\d+\.example\.com$").unwrap();
        assert!(m.matches("ad12.example.com"));
        assert!(!m.matches("ads.example.com"));
    }

    #[test]
    fn test_regex_is_case_sensitive() {
        let lower = DomainMatcher::new(MatcherKind::Regex, r"^cdn\.example$").unwrap();
        assert!(lower.matches("CDN.Example"));

        let upper = DomainMatcher::new(MatcherKind::Regex, r"^CDN\.example$").unwrap();
        assert!(!upper.matches("CDN.example"));
        assert!(!upper.matches("cdn.example"));
    }

    #[test]
    fn test_invalid_regex_is_config_error() {
        let err = DomainMatcher::new(MatcherKind::Regex, "(unclosed").unwrap_err();
        assert!(matches!(err, DnsError::InvalidConfig(_)));
    }

    #[test]
    fn test_group_reports_all_matches_in_order() {
        let mut group = MatcherGroup::new();
        let sub = group.add(DomainMatcher::new(MatcherKind::Subdomain, "good.com").unwrap());
        let kw = group.add(DomainMatcher::new(MatcherKind::Keyword, "goo").unwrap());
        let full = group.add(DomainMatcher::new(MatcherKind::Full, "good.com").unwrap());
        let other = group.add(DomainMatcher::new(MatcherKind::Full, "bad.com").unwrap());

        assert_eq!(group.match_ids("good.com"), vec![sub, kw, full]);
        assert_eq!(group.match_ids("www.good.com"), vec![sub, kw]);
        assert_eq!(group.match_ids("bad.com"), vec![other]);
        assert!(group.match_ids("example.org").is_empty());
        assert_eq!(group.len(), 4);
    }

    #[test]
    fn test_group_duplicate_patterns_keep_both_ids() {
        let mut group = MatcherGroup::new();
        let first = group.add(DomainMatcher::new(MatcherKind::Full, "dup.com").unwrap());
        let second = group.add(DomainMatcher::new(MatcherKind::Full, "dup.com").unwrap());
        assert_eq!(group.match_ids("dup.com"), vec![first, second]);
    }
}
