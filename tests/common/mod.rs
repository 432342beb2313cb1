//! Shared test fixtures: an in-memory DoH server reached through a mock
//! dispatcher.

#![allow(dead_code)]

use hickory_proto::op::{Message, MessageType, ResponseCode};
use hickory_proto::rr::rdata::opt::{ClientSubnet, EdnsCode, EdnsOption};
use hickory_proto::rr::rdata::{A, AAAA};
use hickory_proto::rr::{RData, Record, RecordType};
use proxydns::transport::dial::{Destination, Dispatcher, Dispatching, Link};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream};

#[derive(Default)]
struct State {
    answers: Mutex<HashMap<String, Vec<IpAddr>>>,
    ttl: Mutex<u32>,
    status: Mutex<HashMap<RecordType, u16>>,
    delay: Mutex<Duration>,
    type_delays: Mutex<HashMap<RecordType, Duration>>,
    queries: Mutex<HashMap<RecordType, usize>>,
    subnets: Mutex<Vec<ClientSubnet>>,
    dispatches: AtomicUsize,
}

/// A dispatcher whose every link leads to an HTTP/1.1 DoH server in memory.
#[derive(Clone, Default)]
pub struct MockDoh {
    state: Arc<State>,
}

impl MockDoh {
    pub fn new() -> Self {
        let mock = Self::default();
        *mock.state.ttl.lock().unwrap() = 300;
        mock
    }

    /// Answer queries for `domain` with `ips` (each type gets its family).
    pub fn answer(&self, domain: &str, ips: &[&str]) -> &Self {
        let ips = ips.iter().map(|ip| ip.parse().unwrap()).collect();
        self.state
            .answers
            .lock()
            .unwrap()
            .insert(domain.trim_end_matches('.').to_lowercase(), ips);
        self
    }

    pub fn ttl(&self, ttl: u32) -> &Self {
        *self.state.ttl.lock().unwrap() = ttl;
        self
    }

    /// Reply to queries of `record_type` with an HTTP `status`.
    pub fn status(&self, record_type: RecordType, status: u16) -> &Self {
        self.state.status.lock().unwrap().insert(record_type, status);
        self
    }

    /// Hold every reply back for `delay`.
    pub fn delay(&self, delay: Duration) -> &Self {
        *self.state.delay.lock().unwrap() = delay;
        self
    }

    /// Hold replies to `record_type` queries back for `delay`, overriding
    /// [`delay`](Self::delay).
    pub fn delay_for(&self, record_type: RecordType, delay: Duration) -> &Self {
        self.state.type_delays.lock().unwrap().insert(record_type, delay);
        self
    }

    pub fn queries(&self, record_type: RecordType) -> usize {
        self.state
            .queries
            .lock()
            .unwrap()
            .get(&record_type)
            .copied()
            .unwrap_or(0)
    }

    pub fn dispatches(&self) -> usize {
        self.state.dispatches.load(Ordering::SeqCst)
    }

    pub fn subnets(&self) -> Vec<ClientSubnet> {
        self.state.subnets.lock().unwrap().clone()
    }
}

impl Dispatcher for MockDoh {
    fn dispatch(&self, _destination: Destination) -> Dispatching {
        self.state.dispatches.fetch_add(1, Ordering::SeqCst);
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(serve(Arc::clone(&self.state), server));
        let (reader, writer) = tokio::io::split(client);
        Box::pin(async move { Ok(Link::new(reader, writer)) })
    }
}

async fn serve(state: Arc<State>, stream: DuplexStream) {
    let (read, mut write) = tokio::io::split(stream);
    let mut reader = BufReader::new(read);

    loop {
        let mut request_line = String::new();
        if reader.read_line(&mut request_line).await.unwrap_or(0) == 0 {
            return;
        }

        let mut content_length = 0usize;
        loop {
            let mut header = String::new();
            if reader.read_line(&mut header).await.unwrap_or(0) == 0 {
                return;
            }
            let header = header.trim_end();
            if header.is_empty() {
                break;
            }
            if let Some((name, value)) = header.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
            }
        }

        let mut body = vec![0u8; content_length];
        if reader.read_exact(&mut body).await.is_err() {
            return;
        }

        let response = respond(&state, &body).await;
        if write.write_all(&response).await.is_err() || write.flush().await.is_err() {
            return;
        }
    }
}

async fn respond(state: &State, body: &[u8]) -> Vec<u8> {
    let query = Message::from_vec(body).unwrap();
    let question = query.queries()[0].clone();
    let qtype = question.query_type();
    *state.queries.lock().unwrap().entry(qtype).or_default() += 1;

    if let Some(edns) = query.extensions().as_ref() {
        if let Some(EdnsOption::Subnet(subnet)) = edns.option(EdnsCode::Subnet) {
            state.subnets.lock().unwrap().push(subnet.clone());
        }
    }

    let type_delay = state.type_delays.lock().unwrap().get(&qtype).copied();
    let delay = type_delay.unwrap_or_else(|| *state.delay.lock().unwrap());
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let status = state.status.lock().unwrap().get(&qtype).copied().unwrap_or(200);
    if status != 200 {
        let text = b"upstream unavailable";
        let mut out = format!(
            "HTTP/1.1 {} Error\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n",
            status,
            text.len()
        )
        .into_bytes();
        out.extend_from_slice(text);
        return out;
    }

    let domain = question
        .name()
        .to_ascii()
        .trim_end_matches('.')
        .to_lowercase();
    let ttl = *state.ttl.lock().unwrap();
    let ips = state
        .answers
        .lock()
        .unwrap()
        .get(&domain)
        .cloned()
        .unwrap_or_default();

    let mut reply = Message::new();
    reply
        .set_id(query.id())
        .set_message_type(MessageType::Response)
        .set_response_code(ResponseCode::NoError)
        .set_recursion_desired(true)
        .set_recursion_available(true);
    reply.add_query(question.clone());
    for ip in ips {
        let rdata = match (ip, qtype) {
            (IpAddr::V4(v4), RecordType::A) => RData::A(A(v4)),
            (IpAddr::V6(v6), RecordType::AAAA) => RData::AAAA(AAAA(v6)),
            _ => continue,
        };
        reply.add_answer(Record::from_rdata(question.name().clone(), ttl, rdata));
    }

    let payload = reply.to_vec().unwrap();
    let mut out = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/dns-message\r\nContent-Length: {}\r\n\r\n",
        payload.len()
    )
    .into_bytes();
    out.extend_from_slice(&payload);
    out
}
