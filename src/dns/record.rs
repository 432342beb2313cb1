//! Resolved record sets.
//!
//! An [`IpRecord`] is one record type's answer for one domain. A
//! [`DomainRecord`] pairs the A and AAAA answers, each tracked with its own
//! expiry and the start time of the query that produced it.

use hickory_proto::op::ResponseCode;
use hickory_proto::rr::RecordType as WireType;
use std::fmt;
use std::net::IpAddr;
use tokio::time::Instant;

/// Address record types the resolver asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    Aaaa,
}

impl RecordType {
    /// Subscription tag appended to a domain to form its topic.
    pub fn tag(self) -> &'static str {
        match self {
            RecordType::A => "4",
            RecordType::Aaaa => "6",
        }
    }

    /// Notifier topic for this record type of `fqdn`.
    pub fn topic(self, fqdn: &str) -> String {
        format!("{}{}", fqdn, self.tag())
    }

    pub fn wire_type(self) -> WireType {
        match self {
            RecordType::A => WireType::A,
            RecordType::Aaaa => WireType::AAAA,
        }
    }

    /// Whether `ip` belongs to the family this record type carries.
    pub fn carries(self, ip: &IpAddr) -> bool {
        match self {
            RecordType::A => ip.is_ipv4(),
            RecordType::Aaaa => ip.is_ipv6(),
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordType::A => f.write_str("A"),
            RecordType::Aaaa => f.write_str("AAAA"),
        }
    }
}

/// One record type's resolution result for one domain.
///
/// `rcode == NoError` with no addresses is a confirmed empty answer, which is
/// different from having nothing cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpRecord {
    /// Id of the DNS message that carried this answer.
    pub request_id: u16,
    pub rcode: ResponseCode,
    pub addresses: Vec<IpAddr>,
    /// Instant after which the record is stale.
    pub expire: Instant,
}

impl IpRecord {
    pub fn is_success(&self) -> bool {
        self.rcode == ResponseCode::NoError
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now > self.expire
    }
}

/// An [`IpRecord`] together with the start time of the query that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedRecord {
    pub record: IpRecord,
    pub query_start: Instant,
}

impl CachedRecord {
    /// A candidate from a query started at `candidate_start` replaces this
    /// record only if that query was dispatched no earlier than ours.
    pub fn is_superseded_by(&self, candidate_start: Instant) -> bool {
        candidate_start >= self.query_start
    }
}

/// A and AAAA answers for a single domain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainRecord {
    pub a: Option<CachedRecord>,
    pub aaaa: Option<CachedRecord>,
}

impl DomainRecord {
    pub fn get(&self, record_type: RecordType) -> Option<&CachedRecord> {
        match record_type {
            RecordType::A => self.a.as_ref(),
            RecordType::Aaaa => self.aaaa.as_ref(),
        }
    }

    pub fn slot_mut(&mut self, record_type: RecordType) -> &mut Option<CachedRecord> {
        match record_type {
            RecordType::A => &mut self.a,
            RecordType::Aaaa => &mut self.aaaa,
        }
    }

    /// Drop every record that expired before `now`.
    pub fn clear_expired(&mut self, now: Instant) {
        for slot in [&mut self.a, &mut self.aaaa] {
            if slot.as_ref().is_some_and(|c| c.record.is_expired_at(now)) {
                *slot = None;
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.a.is_none() && self.aaaa.is_none()
    }
}
