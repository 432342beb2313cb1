//! JSON configuration for the DNS layer.
//!
//! ```json
//! {
//!   "servers": [
//!     "https://dns.google/dns-query",
//!     { "address": "https+local://1.1.1.1/dns-query" },
//!     "localhost"
//!   ],
//!   "hosts": {
//!     "domain:corp.example": "10.0.0.1",
//!     "full:api.example": "edge.example.net",
//!     "dotless:": "10.0.0.2"
//!   },
//!   "clientIp": "203.0.113.7"
//! }
//! ```

use crate::base::error::{DnsError, DnsResult};
use crate::dns::doh::{DohNameServer, DohOptions};
use crate::dns::hosts::{HostAddress, HostMapping, StaticHosts};
use crate::dns::local::LocalNameServer;
use crate::dns::matcher::MatcherKind;
use crate::dns::resolve::{HostsOverride, NameServer};
use crate::transport::dial::Dispatcher;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use url::Url;

const LOCAL_DOH_SCHEME: &str = "https+local";

/// A name server entry: a bare address or `{ "address": ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ServerConfig {
    Address(String),
    Detailed { address: String },
}

impl ServerConfig {
    pub fn address(&self) -> &str {
        match self {
            ServerConfig::Address(address) => address,
            ServerConfig::Detailed { address } => address,
        }
    }
}

/// Top-level DNS configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DnsConfig {
    pub servers: Vec<ServerConfig>,
    /// Rule to target. Keys carry an optional kind prefix; values are IP
    /// literals or a domain alias.
    pub hosts: BTreeMap<String, String>,
    pub client_ip: Option<String>,
}

impl DnsConfig {
    pub fn from_json(json: &str) -> DnsResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| DnsError::InvalidConfig(format!("bad DNS config: {}", e)))
    }

    pub fn from_file(path: impl AsRef<Path>) -> DnsResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            DnsError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    /// The configured client IP, if any.
    pub fn client_ip(&self) -> DnsResult<Option<IpAddr>> {
        self.client_ip
            .as_deref()
            .map(|raw| {
                raw.parse::<IpAddr>().map_err(|_| {
                    DnsError::InvalidConfig(format!("clientIp is not an IP address: {}", raw))
                })
            })
            .transpose()
    }

    /// Host rules in sorted key order.
    pub fn host_mappings(&self) -> DnsResult<Vec<HostMapping>> {
        self.hosts
            .iter()
            .map(|(rule, target)| {
                let (kind, pattern) = parse_host_rule(rule)?;
                let mapping = match HostAddress::parse(target) {
                    HostAddress::Ip(ip) => HostMapping {
                        kind,
                        domain: pattern,
                        ips: vec![ip.to_string()],
                        proxied_domain: None,
                    },
                    HostAddress::Domain(alias) => HostMapping::alias(kind, pattern, alias),
                };
                Ok(mapping)
            })
            .collect()
    }

    pub fn build_hosts(&self) -> DnsResult<StaticHosts> {
        StaticHosts::new(&self.host_mappings()?)
    }

    /// Name servers in configuration order, with default options.
    pub fn build_servers(
        &self,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> DnsResult<Vec<Arc<dyn NameServer>>> {
        self.build_servers_with(dispatcher, DohOptions::default())
    }

    pub fn build_servers_with(
        &self,
        dispatcher: Arc<dyn Dispatcher>,
        options: DohOptions,
    ) -> DnsResult<Vec<Arc<dyn NameServer>>> {
        let client_ip = self.client_ip()?;
        self.servers
            .iter()
            .map(|server| {
                build_server(
                    server.address(),
                    Arc::clone(&dispatcher),
                    client_ip,
                    options.clone(),
                )
            })
            .collect()
    }

    /// Name servers that answer from the static hosts table first.
    pub fn build_resolvers(
        &self,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> DnsResult<Vec<Arc<dyn NameServer>>> {
        let hosts = Arc::new(self.build_hosts()?);
        let servers = self.build_servers(dispatcher)?;
        Ok(servers
            .into_iter()
            .map(|server| {
                Arc::new(HostsOverride::new(server, Arc::clone(&hosts))) as Arc<dyn NameServer>
            })
            .collect())
    }
}

fn build_server(
    address: &str,
    dispatcher: Arc<dyn Dispatcher>,
    client_ip: Option<IpAddr>,
    options: DohOptions,
) -> DnsResult<Arc<dyn NameServer>> {
    if address.eq_ignore_ascii_case("localhost") {
        return Ok(Arc::new(LocalNameServer::new()));
    }

    let url = Url::parse(address)
        .map_err(|e| DnsError::InvalidConfig(format!("bad name server {}: {}", address, e)))?;
    match url.scheme() {
        "https" => Ok(Arc::new(DohNameServer::new_remote(
            url, dispatcher, client_ip, options,
        )?)),
        LOCAL_DOH_SCHEME => Ok(Arc::new(DohNameServer::new_local(url, client_ip, options)?)),
        other => Err(DnsError::InvalidConfig(format!(
            "unsupported name server scheme {} in {}",
            other, address
        ))),
    }
}

/// Split a hosts key into its matcher kind and pattern.
///
/// Prefixes: `domain:`, `full:`, `keyword:`, `regexp:`, `dotless:`. A key
/// without a prefix is a full match.
pub fn parse_host_rule(rule: &str) -> DnsResult<(MatcherKind, String)> {
    if let Some(pattern) = rule.strip_prefix("domain:") {
        return Ok((MatcherKind::Subdomain, pattern.to_string()));
    }
    if let Some(pattern) = rule.strip_prefix("full:") {
        return Ok((MatcherKind::Full, pattern.to_string()));
    }
    if let Some(pattern) = rule.strip_prefix("keyword:") {
        return Ok((MatcherKind::Keyword, pattern.to_string()));
    }
    if let Some(pattern) = rule.strip_prefix("regexp:") {
        return Ok((MatcherKind::Regex, pattern.to_string()));
    }
    if let Some(substr) = rule.strip_prefix("dotless:") {
        let pattern = if substr.is_empty() {
            "^[^.]*$".to_string()
        } else if !substr.contains('.') {
            format!("^[^.]*{}[^.]*$", substr)
        } else {
            return Err(DnsError::InvalidConfig(format!(
                "substr in dotless rule should not contain a dot: {}",
                substr
            )));
        };
        return Ok((MatcherKind::Regex, pattern));
    }
    if rule.starts_with("geosite:") || rule.starts_with("ext:") {
        return Err(DnsError::InvalidConfig(format!(
            "domain lists are not supported in hosts: {}",
            rule
        )));
    }
    Ok((MatcherKind::Full, rule.to_string()))
}
