//! Static hosts table.
//!
//! Resolves domains from configured rules before any network query. Each rule
//! is a [`DomainMatcher`] with a list of target addresses; a domain may match
//! several rules and receives the union of their targets.

use crate::base::error::{DnsError, DnsResult};
use crate::dns::matcher::{DomainMatcher, MatcherGroup, MatcherKind};
use crate::dns::resolve::IpOption;
use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::{debug, warn};

/// A static hosts target: a literal IP or a domain to resolve instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HostAddress {
    Ip(IpAddr),
    Domain(String),
}

impl HostAddress {
    /// Parse an IP literal, falling back to a domain alias.
    pub fn parse(value: &str) -> Self {
        match value.parse::<IpAddr>() {
            Ok(ip) => HostAddress::Ip(ip),
            Err(_) => HostAddress::Domain(value.to_string()),
        }
    }

    pub fn as_ip(&self) -> Option<IpAddr> {
        match self {
            HostAddress::Ip(ip) => Some(*ip),
            HostAddress::Domain(_) => None,
        }
    }

    pub fn is_domain(&self) -> bool {
        matches!(self, HostAddress::Domain(_))
    }
}

impl fmt::Display for HostAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostAddress::Ip(ip) => write!(f, "{}", ip),
            HostAddress::Domain(d) => f.write_str(d),
        }
    }
}

/// One configured rule: a pattern and either IP literals or an alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostMapping {
    pub kind: MatcherKind,
    pub domain: String,
    /// IP literals, parsed when the table is built.
    pub ips: Vec<String>,
    /// Domain to resolve instead, used when `ips` is empty.
    pub proxied_domain: Option<String>,
}

impl HostMapping {
    pub fn ips(kind: MatcherKind, domain: impl Into<String>, ips: &[&str]) -> Self {
        Self {
            kind,
            domain: domain.into(),
            ips: ips.iter().map(|s| s.to_string()).collect(),
            proxied_domain: None,
        }
    }

    pub fn alias(kind: MatcherKind, domain: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind,
            domain: domain.into(),
            ips: Vec::new(),
            proxied_domain: Some(target.into()),
        }
    }
}

/// Immutable rule table built once from configuration.
#[derive(Debug, Default)]
pub struct StaticHosts {
    ips: Vec<Vec<HostAddress>>,
    matchers: MatcherGroup,
}

impl StaticHosts {
    pub fn new(mappings: &[HostMapping]) -> DnsResult<Self> {
        Self::with_legacy(&BTreeMap::new(), mappings)
    }

    /// Build a table from legacy single-address entries followed by typed
    /// mappings.
    ///
    /// Legacy entries are full-match rules and must map to an IP. Any bad
    /// pattern, bad IP literal or empty mapping fails the whole table.
    pub fn with_legacy(
        legacy: &BTreeMap<String, HostAddress>,
        mappings: &[HostMapping],
    ) -> DnsResult<Self> {
        let mut table = StaticHosts::default();

        if !legacy.is_empty() {
            warn!("simple host mapping is deprecated, use typed host rules");
        }
        for (domain, address) in legacy {
            let HostAddress::Ip(ip) = address else {
                return Err(DnsError::InvalidConfig(format!(
                    "invalid domain address in static hosts: {}",
                    address
                )));
            };
            table.push(DomainMatcher::new(MatcherKind::Full, domain)?, vec![*ip]);
        }

        for mapping in mappings {
            let matcher = DomainMatcher::new(mapping.kind, &mapping.domain)?;
            if !mapping.ips.is_empty() {
                let ips = mapping
                    .ips
                    .iter()
                    .map(|raw| {
                        raw.parse::<IpAddr>().map_err(|_| {
                            DnsError::InvalidConfig(format!(
                                "invalid IP address in static hosts: {}",
                                raw
                            ))
                        })
                    })
                    .collect::<DnsResult<Vec<_>>>()?;
                table.push(matcher, ips);
            } else if let Some(alias) = mapping.proxied_domain.as_deref().filter(|d| !d.is_empty()) {
                table.insert(matcher, vec![HostAddress::Domain(alias.to_string())]);
            } else {
                return Err(DnsError::InvalidConfig(format!(
                    "neither IP address nor proxied domain specified for domain: {}",
                    mapping.domain
                )));
            }
        }

        debug!(rules = table.matchers.len(), "static hosts built");
        Ok(table)
    }

    fn push(&mut self, matcher: DomainMatcher, ips: Vec<IpAddr>) {
        let mut addresses: Vec<HostAddress> = ips.into_iter().map(HostAddress::Ip).collect();
        // A lone IPv4 loopback also answers for IPv6.
        if addresses == [HostAddress::Ip(IpAddr::V4(Ipv4Addr::LOCALHOST))] {
            addresses.push(HostAddress::Ip(IpAddr::V6(Ipv6Addr::LOCALHOST)));
        }
        self.insert(matcher, addresses);
    }

    fn insert(&mut self, matcher: DomainMatcher, addresses: Vec<HostAddress>) {
        let id = self.matchers.add(matcher);
        debug_assert_eq!(id as usize, self.ips.len());
        self.ips.push(addresses);
    }

    /// Targets for `domain` under `option`.
    ///
    /// Returns the union of every matching rule's targets in registration
    /// order. A union that is exactly one alias is returned as is, whatever
    /// `option` says. Otherwise only IPs of enabled families are kept, and an
    /// empty result means no match.
    pub fn lookup(&self, domain: &str, option: IpOption) -> Vec<HostAddress> {
        let domain = domain.strip_suffix('.').unwrap_or(domain);
        let ids = self.matchers.match_ids(domain);
        if ids.is_empty() {
            return Vec::new();
        }

        let mut union: Vec<HostAddress> = ids
            .iter()
            .filter_map(|id| self.ips.get(*id as usize))
            .flatten()
            .cloned()
            .collect();

        if union.len() == 1 && union[0].is_domain() {
            return union;
        }

        union.retain(|addr| addr.as_ip().is_some_and(|ip| option.accepts(&ip)));
        union
    }

    pub fn len(&self) -> usize {
        self.ips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ips.is_empty()
    }
}
