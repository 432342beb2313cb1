//! System resolver backend using getaddrinfo.
//!
//! Resolution runs on tokio's blocking pool so it does not stall the
//! runtime. Results are filtered to the requested families; there is no
//! caching here, the OS resolver does its own.

use super::resolve::{IpOption, NameServer, Querying};
use crate::base::error::DnsError;
use std::net::{IpAddr, ToSocketAddrs};
use tokio::time::Instant;

/// Pass-through to the host OS resolver, named `localhost`.
#[derive(Clone, Debug, Default)]
pub struct LocalNameServer;

impl LocalNameServer {
    pub fn new() -> Self {
        tracing::info!("created localhost DNS client");
        Self
    }
}

impl NameServer for LocalNameServer {
    fn name(&self) -> &str {
        "localhost"
    }

    fn query_ip(&self, domain: &str, option: IpOption, deadline: Option<Instant>) -> Querying {
        let domain = domain.trim_end_matches('.').to_string();
        Box::pin(async move {
            if option.is_empty() {
                return Err(DnsError::NoFamilyEnabled);
            }

            let host = domain.clone();
            let lookup = tokio::task::spawn_blocking(move || {
                tracing::debug!(host = %host, "resolving via getaddrinfo");
                (host.as_str(), 0u16)
                    .to_socket_addrs()
                    .map(|iter| iter.map(|addr| addr.ip()).collect::<Vec<_>>())
            });

            let joined = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, lookup)
                    .await
                    .map_err(|_| DnsError::Cancelled)?,
                None => lookup.await,
            };

            // Handle task join error (cancellation, panic)
            let addrs = joined
                .map_err(|e| {
                    tracing::error!(error = %e, "DNS resolution task failed");
                    DnsError::Cancelled
                })?
                .map_err(|e| {
                    tracing::debug!(domain = %domain, error = %e, "DNS resolution failed");
                    DnsError::transport("localhost", e)
                })?;

            let mut ips: Vec<IpAddr> = Vec::with_capacity(addrs.len());
            for ip in addrs {
                if option.accepts(&ip) && !ips.contains(&ip) {
                    ips.push(ip);
                }
            }

            if ips.is_empty() {
                return Err(DnsError::EmptyResponse);
            }

            tracing::debug!(domain = %domain, count = ips.len(), "DNS resolution complete");
            Ok(ips)
        })
    }
}
