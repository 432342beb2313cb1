//! DNS error kinds.
//!
//! A single crate-wide error enum. Codes returned by [`DnsError::as_i32`]
//! follow Chromium's `net_error_list.h` numbering where a matching DNS error
//! exists there.

use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type DnsResult<T> = Result<T, DnsError>;

/// Errors produced while resolving names or building resolvers.
///
/// The enum is `Clone` because a single failed upstream attempt is reported
/// to every caller that was coalesced onto it.
#[derive(Debug, Error, Clone)]
pub enum DnsError {
    /// No cached record yet. Internal: callers of `query_ip` never see it.
    #[error("record not found")]
    NotFound,
    /// The upstream answered but gave no usable address. A non-success
    /// response code such as NXDOMAIN is reported this way too.
    #[error("empty response")]
    EmptyResponse,
    /// Dialing, TLS or HTTP exchange with the upstream failed.
    #[error("transport to {server} failed: {source}")]
    Transport {
        server: String,
        #[source]
        source: Arc<io::Error>,
    },
    /// The DoH server replied with a status other than 200.
    #[error("DoH server returned status {0}")]
    HttpStatus(u16),
    /// The upstream response could not be decoded.
    #[error("malformed DNS message: {0}")]
    Protocol(String),
    /// A DoH server was asked to resolve its own hostname.
    #[error("{0} tries to resolve itself, use an IP or a static host instead")]
    SelfQuery(String),
    /// The domain cannot be encoded as a DNS name.
    #[error("invalid domain name: {0}")]
    InvalidDomain(String),
    /// The caller's deadline elapsed before an answer was available.
    #[error("query cancelled")]
    Cancelled,
    /// Neither IPv4 nor IPv6 was requested.
    #[error("neither IPv4 nor IPv6 is enabled")]
    NoFamilyEnabled,
    /// Construction-time failure: bad pattern, bad IP literal, bad URL.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DnsError {
    /// Wrap an IO error with the upstream it happened on.
    pub fn transport(server: impl Into<String>, source: io::Error) -> Self {
        DnsError::Transport {
            server: server.into(),
            source: Arc::new(source),
        }
    }

    /// Transport-class failure of a single upstream attempt.
    pub fn is_transport(&self) -> bool {
        matches!(self, DnsError::Transport { .. } | DnsError::HttpStatus(_))
    }

    /// Protocol-class failure: a response arrived but was unusable.
    pub fn is_protocol(&self) -> bool {
        matches!(self, DnsError::Protocol(_))
    }

    pub fn as_i32(&self) -> i32 {
        match self {
            DnsError::NotFound => -804,
            DnsError::EmptyResponse => -105,
            DnsError::Transport { .. } => -104,
            DnsError::HttpStatus(_) => -320,
            DnsError::Protocol(_) => -800,
            DnsError::SelfQuery(_) => -808,
            DnsError::InvalidDomain(_) => -300,
            DnsError::Cancelled => -810,
            DnsError::NoFamilyEnabled => -11,
            DnsError::InvalidConfig(_) => -4,
        }
    }
}

impl PartialEq for DnsError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                DnsError::Transport { server: a, source: e1 },
                DnsError::Transport { server: b, source: e2 },
            ) => a == b && e1.kind() == e2.kind(),
            (DnsError::HttpStatus(a), DnsError::HttpStatus(b)) => a == b,
            (DnsError::Protocol(a), DnsError::Protocol(b)) => a == b,
            (DnsError::SelfQuery(a), DnsError::SelfQuery(b)) => a == b,
            (DnsError::InvalidDomain(a), DnsError::InvalidDomain(b)) => a == b,
            (DnsError::InvalidConfig(a), DnsError::InvalidConfig(b)) => a == b,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}
