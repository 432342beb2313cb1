//! # proxydns
//!
//! The DNS resolution layer of a proxy platform.
//!
//! Callers ask "give me the IPs for domain D with families F" and get a
//! deduplicated answer drawn from static overrides, a TTL-aware cache, or a
//! live upstream query.
//!
//! ## Features
//!
//! - **DNS-over-HTTPS**: RFC 8484 wire format over HTTP/1.1 or HTTP/2,
//!   tunneled through the platform dispatcher or dialed directly
//! - **Answer cache**: independent A/AAAA freshness, out-of-order protection,
//!   self-stopping eviction sweep
//! - **Request coalescing**: concurrent queries for one name share a single
//!   upstream query per record type
//! - **Static hosts**: full, subdomain, keyword and regex rules with
//!   union-of-matches semantics and domain aliases
//! - **System resolver**: getaddrinfo on the blocking pool
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use proxydns::config::DnsConfig;
//! use proxydns::dns::{IpOption, NameServer};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = DnsConfig::from_file("dns.json").unwrap();
//!     let servers = config.build_resolvers(dispatcher).unwrap();
//!     let ips = servers[0]
//!         .query_ip("example.com", IpOption::dual(), None)
//!         .await
//!         .unwrap();
//!     println!("{:?}", ips);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Error type and error context helpers
//! - [`dns`] - Name servers, cache, coalescing and static hosts
//! - [`transport`] - Dialing, TLS and the DoH HTTP client
//! - [`config`] - JSON configuration

pub mod base;
pub mod config;
pub mod dns;
pub mod transport;
