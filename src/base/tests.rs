use crate::base::error::DnsError;
use std::io;

#[test]
fn test_dns_error_codes() {
    assert_eq!(DnsError::EmptyResponse.as_i32(), -105);
    assert_eq!(DnsError::Protocol("bad".into()).as_i32(), -800);
    assert_eq!(DnsError::SelfQuery("DOH//dns.example".into()).as_i32(), -808);
    assert_eq!(DnsError::Cancelled.as_i32(), -810);
}

#[test]
fn test_error_classes() {
    let transport = DnsError::transport("dns.example:443", io::Error::other("reset"));
    assert!(transport.is_transport());
    assert!(!transport.is_protocol());

    assert!(DnsError::HttpStatus(503).is_transport());
    assert!(DnsError::Protocol("id mismatch".into()).is_protocol());
    assert!(!DnsError::EmptyResponse.is_protocol());
    assert!(!DnsError::Cancelled.is_transport());
}

#[test]
fn test_error_is_clone_and_comparable() {
    let err = DnsError::transport("a:443", io::Error::new(io::ErrorKind::TimedOut, "slow"));
    let copy = err.clone();
    assert_eq!(err, copy);
    assert_ne!(err, DnsError::Cancelled);
    assert_eq!(DnsError::HttpStatus(503), DnsError::HttpStatus(503));
    assert_ne!(DnsError::HttpStatus(503), DnsError::HttpStatus(502));
}

#[test]
fn test_error_display() {
    let err = DnsError::HttpStatus(404);
    assert_eq!(err.to_string(), "DoH server returned status 404");
}
