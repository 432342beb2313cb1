//! DNS Module Tests
//!
//! Covers:
//! - `fqdn` and `IpOption`
//! - `HostsOverride` using a MockNameServer
//! - `LocalNameServer` (Basic System Resolver)
//! - `Notifier` topic fan-out

use proxydns::base::error::DnsError;
use proxydns::dns::{
    fqdn, HostMapping, HostsOverride, IpOption, LocalNameServer, MatcherKind, NameServer,
    Notifier, Querying, RecordType, StaticHosts,
};

use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

struct MockNameServer {
    response: Vec<IpAddr>,
    asked: Mutex<Vec<String>>,
}

impl MockNameServer {
    fn new(response: Vec<IpAddr>) -> Self {
        Self {
            response,
            asked: Mutex::new(Vec::new()),
        }
    }
}

impl NameServer for MockNameServer {
    fn name(&self) -> &str {
        "mock"
    }

    fn query_ip(&self, domain: &str, _option: IpOption, _deadline: Option<Instant>) -> Querying {
        self.asked.lock().unwrap().push(domain.to_string());
        let ips = self.response.clone();
        Box::pin(async move { Ok(ips) })
    }
}

#[test]
fn test_fqdn_and_options() {
    assert_eq!(fqdn("example.com"), "example.com.");
    assert_eq!(fqdn("example.com."), "example.com.");

    let types: Vec<_> = IpOption::dual().record_types().collect();
    assert_eq!(types, vec![RecordType::A, RecordType::Aaaa]);
    assert_eq!(RecordType::Aaaa.topic("example.com."), "example.com.6");
    assert!(IpOption::ipv4_only().accepts(&IpAddr::V4(Ipv4Addr::LOCALHOST)));
    assert!(!IpOption::ipv4_only().accepts(&"::1".parse().unwrap()));
}

#[tokio::test]
async fn test_hosts_override() {
    let mock = Arc::new(MockNameServer::new(vec![IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8))]));
    let hosts = StaticHosts::new(&[
        HostMapping::ips(MatcherKind::Full, "local.override", &["127.0.0.1"]),
        HostMapping::alias(MatcherKind::Full, "alias.override", "target.example"),
    ])
    .unwrap();
    let resolver = HostsOverride::new(mock.clone(), Arc::new(hosts));
    assert_eq!(resolver.name(), "mock");
    assert_eq!(resolver.rule_count(), 2);

    // Override hit
    let ips = resolver
        .query_ip("local.override", IpOption::ipv4_only(), None)
        .await
        .unwrap();
    assert_eq!(ips, vec![IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))]);

    // Alias goes to the inner server under the new name
    resolver
        .query_ip("alias.override", IpOption::dual(), None)
        .await
        .unwrap();

    // Passthrough (miss)
    let ips = resolver
        .query_ip("other.com", IpOption::dual(), None)
        .await
        .unwrap();
    assert_eq!(ips, vec![IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8))]);

    assert_eq!(
        *mock.asked.lock().unwrap(),
        vec!["target.example".to_string(), "other.com".to_string()]
    );
}

#[tokio::test]
async fn test_alias_loop_is_config_error() {
    let mock = Arc::new(MockNameServer::new(vec![]));
    let hosts = StaticHosts::new(&[
        HostMapping::alias(MatcherKind::Full, "ping.example", "pong.example"),
        HostMapping::alias(MatcherKind::Full, "pong.example", "ping.example"),
    ])
    .unwrap();
    let resolver = HostsOverride::new(mock.clone(), Arc::new(hosts));

    let err = resolver
        .query_ip("ping.example", IpOption::dual(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, DnsError::InvalidConfig(_)));
    assert!(mock.asked.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_local_name_server_localhost() {
    let resolver = LocalNameServer::new();
    // localhost should always resolve, usually to 127.0.0.1 or ::1
    let result = resolver.query_ip("localhost", IpOption::dual(), None).await;

    // Depending on system config, this might fail in some CI envs.
    match result {
        Ok(ips) => {
            assert!(!ips.is_empty());
            assert!(ips.iter().all(|ip| ip.is_loopback()));
        }
        Err(e) => eprintln!("localhost resolution unavailable: {}", e),
    }
}

#[tokio::test]
async fn test_notifier_fans_out_once() {
    let notifier = Notifier::new();
    let mut first = notifier.subscribe("example.com.4");
    let mut second = notifier.subscribe("example.com.4");
    let mut other = notifier.subscribe("example.com.6");

    assert_eq!(notifier.publish("example.com.4"), 2);
    first.wait().await;
    second.wait().await;
    assert!(!other.has_fired());

    // Subscribers are removed on publish.
    assert_eq!(notifier.publish("example.com.4"), 0);

    drop(other);
    assert_eq!(notifier.topic_count(), 0);
}
