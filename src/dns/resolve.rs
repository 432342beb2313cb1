//! Core resolution types and the name-server contract.
//!
//! Every backend (DoH remote, DoH local, system) implements [`NameServer`].
//! Callers pick one and ask for the addresses of a domain under an
//! [`IpOption`], optionally bounded by a deadline.

use crate::base::error::{DnsError, DnsResult};
use crate::dns::hosts::{HostAddress, StaticHosts};
use crate::dns::record::RecordType;
use std::{fmt, future::Future, net::IpAddr, pin::Pin, sync::Arc};
use tokio::time::Instant;
use tracing::debug;

/// Which address families a caller wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpOption {
    pub ipv4_enable: bool,
    pub ipv6_enable: bool,
}

impl IpOption {
    #[inline]
    pub const fn dual() -> Self {
        Self {
            ipv4_enable: true,
            ipv6_enable: true,
        }
    }

    #[inline]
    pub const fn ipv4_only() -> Self {
        Self {
            ipv4_enable: true,
            ipv6_enable: false,
        }
    }

    #[inline]
    pub const fn ipv6_only() -> Self {
        Self {
            ipv4_enable: false,
            ipv6_enable: true,
        }
    }

    /// Neither family enabled.
    pub fn is_empty(&self) -> bool {
        !self.ipv4_enable && !self.ipv6_enable
    }

    /// Record types to query, A before AAAA.
    pub fn record_types(&self) -> impl Iterator<Item = RecordType> {
        let a = self.ipv4_enable.then_some(RecordType::A);
        let aaaa = self.ipv6_enable.then_some(RecordType::Aaaa);
        a.into_iter().chain(aaaa)
    }

    pub fn accepts(&self, ip: &IpAddr) -> bool {
        match ip {
            IpAddr::V4(_) => self.ipv4_enable,
            IpAddr::V6(_) => self.ipv6_enable,
        }
    }
}

impl Default for IpOption {
    fn default() -> Self {
        Self::dual()
    }
}

/// Append the root label if `domain` does not end with one.
pub fn fqdn(domain: &str) -> String {
    if domain.ends_with('.') {
        domain.to_string()
    } else {
        format!("{}.", domain)
    }
}

/// Alias for the `Future` type returned by a name server.
pub type Querying = Pin<Box<dyn Future<Output = DnsResult<Vec<IpAddr>>> + Send>>;

/// The unified client contract.
///
/// Implementations must be thread-safe; a query never needs `&mut self`.
pub trait NameServer: Send + Sync {
    /// Stable display name, e.g. `DOH//dns.google`.
    fn name(&self) -> &str;

    /// Resolve `domain` to addresses of the families `option` enables.
    ///
    /// `deadline` bounds how long the caller waits. When it passes, the call
    /// returns [`DnsError::Cancelled`]; upstream work already dispatched keeps
    /// running and may still fill the cache.
    fn query_ip(&self, domain: &str, option: IpOption, deadline: Option<Instant>) -> Querying;
}

impl fmt::Debug for dyn NameServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NameServer")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}

impl<N: NameServer + ?Sized> NameServer for Arc<N> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn query_ip(&self, domain: &str, option: IpOption, deadline: Option<Instant>) -> Querying {
        (**self).query_ip(domain, option, deadline)
    }
}

/// Longest alias chain followed inside the static hosts table.
const MAX_ALIAS_HOPS: usize = 5;

/// Name server wrapper that answers from a [`StaticHosts`] table first.
///
/// IP overrides are returned directly. A lone alias result is chased through
/// the table and then resolved by the inner server. Anything else falls
/// through to the inner server unchanged.
pub struct HostsOverride {
    inner: Arc<dyn NameServer>,
    hosts: Arc<StaticHosts>,
}

impl HostsOverride {
    pub fn new(inner: Arc<dyn NameServer>, hosts: Arc<StaticHosts>) -> Self {
        Self { inner, hosts }
    }

    /// Number of configured host rules.
    pub fn rule_count(&self) -> usize {
        self.hosts.len()
    }

    fn resolve_static(&self, domain: &str, option: IpOption) -> DnsResult<Option<StaticAnswer>> {
        let mut target = domain.to_string();
        for _ in 0..=MAX_ALIAS_HOPS {
            let found = self.hosts.lookup(&target, option);
            match found.as_slice() {
                [] if target == domain => return Ok(None),
                [] => return Ok(Some(StaticAnswer::Alias(target))),
                [HostAddress::Domain(alias)] => {
                    debug!(domain = %target, alias = %alias, "static host alias");
                    target = alias.clone();
                }
                ips => {
                    let ips = ips.iter().filter_map(HostAddress::as_ip).collect();
                    return Ok(Some(StaticAnswer::Ips(ips)));
                }
            }
        }
        Err(DnsError::InvalidConfig(format!(
            "static host alias chain for {} is longer than {} hops",
            domain, MAX_ALIAS_HOPS
        )))
    }
}

enum StaticAnswer {
    Ips(Vec<IpAddr>),
    Alias(String),
}

impl NameServer for HostsOverride {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn query_ip(&self, domain: &str, option: IpOption, deadline: Option<Instant>) -> Querying {
        match self.resolve_static(domain, option) {
            Err(e) => Box::pin(std::future::ready(Err(e))),
            Ok(Some(StaticAnswer::Ips(ips))) => {
                debug!(domain = %domain, count = ips.len(), "static host hit");
                Box::pin(std::future::ready(Ok(ips)))
            }
            Ok(Some(StaticAnswer::Alias(alias))) => self.inner.query_ip(&alias, option, deadline),
            Ok(None) => self.inner.query_ip(domain, option, deadline),
        }
    }
}

impl fmt::Debug for HostsOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostsOverride")
            .field("inner", &self.inner.name())
            .field("rule_count", &self.hosts.len())
            .finish_non_exhaustive()
    }
}
