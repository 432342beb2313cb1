//! DNS wire messages for upstream queries.
//!
//! Builds one RFC 1035 query per record type, each carrying an EDNS0
//! client-subnet option when a client IP is configured, and turns upstream
//! responses back into [`IpRecord`]s.

use crate::base::error::{DnsError, DnsResult};
use crate::dns::record::{IpRecord, RecordType};
use hickory_proto::op::{Edns, Message, MessageType, OpCode, Query};
use hickory_proto::rr::rdata::opt::{ClientSubnet, EdnsOption};
use hickory_proto::rr::{Name, RData};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;
use tokio::time::Instant;

/// Lifetime given to answers without a usable TTL.
pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

/// Advertised UDP payload size in the OPT record.
pub const EDNS_PAYLOAD_SIZE: u16 = 1350;

const IPV4_SUBNET_PREFIX: u8 = 24;
const IPV6_SUBNET_PREFIX: u8 = 48;

/// One outbound query for one record type.
#[derive(Debug, Clone)]
pub struct DnsRequest {
    pub record_type: RecordType,
    pub domain: String,
    /// When the query was built; used by the cache freshness rule.
    pub start: Instant,
    pub message: Message,
}

impl DnsRequest {
    pub fn id(&self) -> u16 {
        self.message.id()
    }

    /// Encode the query as raw DNS message bytes.
    pub fn encode(&self) -> DnsResult<Vec<u8>> {
        self.message
            .to_vec()
            .map_err(|e| DnsError::InvalidDomain(format!("{}: {}", self.domain, e)))
    }
}

/// Client-subnet option announcing the network `ip` belongs to.
///
/// IPv4 addresses are announced as a /24, IPv6 as a /48.
pub fn client_subnet(ip: IpAddr) -> ClientSubnet {
    match ip {
        IpAddr::V4(v4) => {
            let masked = u32::from(v4) & (!0u32 << (32 - IPV4_SUBNET_PREFIX));
            ClientSubnet::new(IpAddr::V4(Ipv4Addr::from(masked)), IPV4_SUBNET_PREFIX, 0)
        }
        IpAddr::V6(v6) => {
            let masked = u128::from(v6) & (!0u128 << (128 - IPV6_SUBNET_PREFIX));
            ClientSubnet::new(IpAddr::V6(Ipv6Addr::from(masked)), IPV6_SUBNET_PREFIX, 0)
        }
    }
}

fn edns(client_ip: Option<IpAddr>) -> Edns {
    let mut edns = Edns::new();
    edns.set_max_payload(EDNS_PAYLOAD_SIZE);
    if let Some(ip) = client_ip {
        edns.options_mut()
            .insert(EdnsOption::Subnet(client_subnet(ip)));
    }
    edns
}

/// Build one query per entry of `types` for `domain`.
///
/// Each query takes its id from `next_id`. Fails with `InvalidDomain` if the
/// domain cannot be encoded as a DNS name.
pub fn build_requests(
    domain: &str,
    types: &[RecordType],
    mut next_id: impl FnMut() -> u16,
    client_ip: Option<IpAddr>,
) -> DnsResult<Vec<DnsRequest>> {
    let name = Name::from_ascii(domain)
        .map_err(|e| DnsError::InvalidDomain(format!("{}: {}", domain, e)))?;

    let requests = types
        .iter()
        .map(|&record_type| {
            let mut message = Message::new();
            message
                .set_id(next_id())
                .set_message_type(MessageType::Query)
                .set_op_code(OpCode::Query)
                .set_recursion_desired(true);
            message.add_query(Query::query(name.clone(), record_type.wire_type()));
            *message.extensions_mut() = Some(edns(client_ip));

            DnsRequest {
                record_type,
                domain: domain.to_string(),
                start: Instant::now(),
                message,
            }
        })
        .collect();
    Ok(requests)
}

/// Decode an upstream response into an [`IpRecord`].
///
/// Only A and AAAA answers are kept. The record expires after the smallest
/// answer TTL, where a TTL of zero or an answerless response counts as
/// [`DEFAULT_TTL`].
pub fn parse_response(payload: &[u8], expected_id: u16) -> DnsResult<IpRecord> {
    let message = Message::from_vec(payload).map_err(|e| DnsError::Protocol(e.to_string()))?;

    if message.id() != expected_id {
        return Err(DnsError::Protocol(format!(
            "response id {} does not match query id {}",
            message.id(),
            expected_id
        )));
    }

    let mut min_ttl: Option<u32> = None;
    let mut addresses = Vec::new();
    for answer in message.answers() {
        let ttl = answer.ttl();
        min_ttl = Some(min_ttl.map_or(ttl, |current| current.min(ttl)));

        match answer.data() {
            RData::A(a) => addresses.push(IpAddr::V4(a.0)),
            RData::AAAA(aaaa) => addresses.push(IpAddr::V6(aaaa.0)),
            _ => {}
        }
    }

    let ttl = match min_ttl {
        Some(0) | None => DEFAULT_TTL,
        Some(secs) => Duration::from_secs(u64::from(secs)),
    };

    Ok(IpRecord {
        request_id: message.id(),
        rcode: message.response_code(),
        addresses,
        expire: Instant::now() + ttl,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::ResponseCode;
    use hickory_proto::rr::rdata::{A, AAAA, CNAME};
    use hickory_proto::rr::{Record, RecordType as WireType};

    fn response(id: u16, answers: Vec<Record>) -> Vec<u8> {
        let mut msg = Message::new();
        msg.set_id(id)
            .set_message_type(MessageType::Response)
            .set_response_code(ResponseCode::NoError);
        for answer in answers {
            msg.add_answer(answer);
        }
        msg.to_vec().unwrap()
    }

    fn name() -> Name {
        Name::from_ascii("example.com.").unwrap()
    }

    #[test]
    fn test_build_requests_one_per_type() {
        let mut id = 100;
        let reqs = build_requests(
            "example.com.",
            &[RecordType::A, RecordType::Aaaa],
            || {
                id += 1;
                id
            },
            None,
        )
        .unwrap();

        assert_eq!(reqs.len(), 2);
        assert_eq!(reqs[0].id(), 101);
        assert_eq!(reqs[1].id(), 102);
        assert_eq!(reqs[0].message.queries()[0].query_type(), WireType::A);
        assert_eq!(reqs[1].message.queries()[0].query_type(), WireType::AAAA);
        assert!(reqs[0].message.recursion_desired());

        let edns = reqs[0].message.extensions().as_ref().unwrap();
        assert_eq!(edns.max_payload(), EDNS_PAYLOAD_SIZE);
    }

    #[test]
    fn test_client_subnet_is_masked() {
        let v4 = client_subnet("203.0.113.77".parse().unwrap());
        assert_eq!(v4, ClientSubnet::new("203.0.113.0".parse().unwrap(), 24, 0));

        let v6 = client_subnet("2001:db8:abcd:1234::1".parse().unwrap());
        assert_eq!(v6, ClientSubnet::new("2001:db8:abcd::".parse().unwrap(), 48, 0));
    }

    #[test]
    fn test_build_rejects_bad_domain() {
        let label = "a".repeat(64);
        let err = build_requests(&format!("{}.com.", label), &[RecordType::A], || 1, None)
            .unwrap_err();
        assert!(matches!(err, DnsError::InvalidDomain(_)));
    }

    #[test]
    fn test_parse_uses_min_ttl_and_skips_other_types() {
        let payload = response(
            7,
            vec![
                Record::from_rdata(name(), 30, RData::CNAME(CNAME(name()))),
                Record::from_rdata(name(), 300, RData::A(A::new(1, 2, 3, 4))),
                Record::from_rdata(name(), 120, RData::AAAA(AAAA::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1))),
            ],
        );

        let before = Instant::now();
        let record = parse_response(&payload, 7).unwrap();
        assert!(record.is_success());
        assert_eq!(
            record.addresses,
            vec![
                "1.2.3.4".parse::<IpAddr>().unwrap(),
                "2001:db8::1".parse::<IpAddr>().unwrap()
            ]
        );
        assert!(record.expire <= before + Duration::from_secs(31));
        assert!(record.expire >= before + Duration::from_secs(30));
    }

    #[test]
    fn test_parse_zero_ttl_and_empty_use_default() {
        let before = Instant::now();
        let zero = parse_response(
            &response(1, vec![Record::from_rdata(name(), 0, RData::A(A::new(1, 1, 1, 1)))]),
            1,
        )
        .unwrap();
        assert!(zero.expire >= before + DEFAULT_TTL);

        let empty = parse_response(&response(2, vec![]), 2).unwrap();
        assert!(empty.addresses.is_empty());
        assert!(empty.is_success());
        assert!(empty.expire >= before + DEFAULT_TTL);
    }

    #[test]
    fn test_parse_rejects_mismatched_id() {
        let err = parse_response(&response(5, vec![]), 6).unwrap_err();
        assert!(err.is_protocol());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = parse_response(&[0x12, 0x34, 0x01], 0x1234).unwrap_err();
        assert!(matches!(err, DnsError::Protocol(_)));
    }
}
