//! DNS-over-HTTPS name server (RFC 8484, wire format).
//!
//! A query is answered from the cache when every requested record type has a
//! live record. Otherwise the caller subscribes to the record-type topics it
//! needs, makes sure exactly one upstream query per record type is in flight
//! for the domain, and waits until each requested type is settled (answered
//! or its attempt finished) or its deadline passes.
//!
//! Each upstream query runs as its own task with its own deadline. A caller
//! giving up does not cancel it: a late answer still fills the cache.
//!
//! Two flavours share the implementation:
//! - remote (`DOH//host`): connections go through the platform dispatcher
//! - local (`DOHL//host`): connections are dialed directly

use crate::base::error::{DnsError, DnsResult};
use crate::dns::cache::{AnswerCache, DEFAULT_EVICTION_INTERVAL};
use crate::dns::notifier::Subscription;
use crate::dns::record::{IpRecord, RecordType};
use crate::dns::resolve::{fqdn, IpOption, NameServer, Querying};
use crate::dns::wire::{self, DnsRequest};
use crate::transport::dial::{Dialer, Dispatcher, DispatcherDialer, SystemDialer};
use crate::transport::https::{DohHttpClient, HttpOptions};
use crate::transport::tls::TlsConfig;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::io;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use url::Url;

/// Tunables for a DoH name server.
#[derive(Debug, Clone)]
pub struct DohOptions {
    /// Deadline for upstream queries when the caller gives none.
    pub query_timeout: Duration,
    /// Interval between cache eviction sweeps.
    pub eviction_interval: Duration,
    pub http: HttpOptions,
    pub tls: TlsConfig,
}

impl Default for DohOptions {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(5),
            eviction_interval: DEFAULT_EVICTION_INTERVAL,
            http: HttpOptions::default(),
            tls: TlsConfig::default(),
        }
    }
}

impl DohOptions {
    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn eviction_interval(mut self, interval: Duration) -> Self {
        self.eviction_interval = interval;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.http.request_timeout = timeout;
        self
    }

    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }
}

/// One upstream query that callers can join.
#[derive(Debug, Default)]
struct Attempt {
    finished: AtomicBool,
    error: OnceLock<DnsError>,
}

impl Attempt {
    fn finish(&self, error: Option<DnsError>) {
        if let Some(error) = error {
            let _ = self.error.set(error);
        }
        self.finished.store(true, Ordering::Release);
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn error(&self) -> Option<DnsError> {
        self.error.get().cloned()
    }
}

struct DohInner {
    name: String,
    host: String,
    url: Url,
    client_ip: Option<IpAddr>,
    cache: AnswerCache,
    http: DohHttpClient,
    request_id: AtomicU16,
    /// In-flight upstream queries keyed by topic.
    inflight: DashMap<String, Arc<Attempt>>,
    options: DohOptions,
}

/// DNS-over-HTTPS name server.
#[derive(Clone)]
pub struct DohNameServer {
    inner: Arc<DohInner>,
}

impl DohNameServer {
    /// A server whose connections are routed through `dispatcher`.
    pub fn new_remote(
        url: Url,
        dispatcher: Arc<dyn Dispatcher>,
        client_ip: Option<IpAddr>,
        options: DohOptions,
    ) -> DnsResult<Self> {
        let dialer = Arc::new(DispatcherDialer::new(dispatcher));
        let server = Self::build("DOH", url, dialer, client_ip, options)?;
        info!(server = %server.inner.name, url = %server.inner.url, "created remote DoH client");
        Ok(server)
    }

    /// A server that dials its endpoint directly. The scheme is forced to
    /// `https`.
    pub fn new_local(url: Url, client_ip: Option<IpAddr>, options: DohOptions) -> DnsResult<Self> {
        let url = if url.scheme() == "https" {
            url
        } else {
            let rest = &url.as_str()[url.scheme().len()..];
            Url::parse(&format!("https{}", rest))
                .map_err(|e| DnsError::InvalidConfig(format!("bad DoH url {}: {}", url, e)))?
        };
        let server = Self::build("DOHL", url, Arc::new(SystemDialer), client_ip, options)?;
        info!(server = %server.inner.name, url = %server.inner.url, "created local DoH client");
        Ok(server)
    }

    fn build(
        prefix: &str,
        url: Url,
        dialer: Arc<dyn Dialer>,
        client_ip: Option<IpAddr>,
        options: DohOptions,
    ) -> DnsResult<Self> {
        let tls = match url.scheme() {
            "https" => Some(options.tls.clone()),
            "http" => None,
            other => {
                return Err(DnsError::InvalidConfig(format!(
                    "unsupported DoH scheme {}",
                    other
                )))
            }
        };
        let host = url
            .host_str()
            .ok_or_else(|| DnsError::InvalidConfig(format!("no host in {}", url)))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_lowercase();
        let authority = match url.port() {
            Some(port) => format!("{}:{}", url.host_str().unwrap_or_default(), port),
            None => url.host_str().unwrap_or_default().to_string(),
        };
        let name = format!("{}//{}", prefix, authority);

        Ok(Self {
            inner: Arc::new(DohInner {
                cache: AnswerCache::with_interval(name.clone(), options.eviction_interval),
                http: DohHttpClient::new(dialer, tls, options.http.clone()),
                name,
                host,
                url,
                client_ip,
                request_id: AtomicU16::new(0),
                inflight: DashMap::new(),
                options,
            }),
        })
    }

    /// The server's answer cache.
    pub fn cache(&self) -> &AnswerCache {
        &self.inner.cache
    }

    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    /// Number of upstream queries currently in flight.
    pub fn inflight_count(&self) -> usize {
        self.inner.inflight.len()
    }
}

impl NameServer for DohNameServer {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn query_ip(&self, domain: &str, option: IpOption, deadline: Option<Instant>) -> Querying {
        Box::pin(Arc::clone(&self.inner).query(domain.to_string(), option, deadline))
    }
}

impl std::fmt::Debug for DohNameServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DohNameServer")
            .field("name", &self.inner.name)
            .field("url", &self.inner.url.as_str())
            .field("cache", &self.inner.cache)
            .finish_non_exhaustive()
    }
}

impl DohInner {
    fn is_self(&self, fqdn: &str) -> bool {
        fqdn.strip_suffix('.')
            .is_some_and(|d| d.eq_ignore_ascii_case(&self.host))
    }

    fn next_id(&self) -> u16 {
        self.request_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    async fn query(
        self: Arc<Self>,
        domain: String,
        option: IpOption,
        deadline: Option<Instant>,
    ) -> DnsResult<Vec<IpAddr>> {
        if option.is_empty() {
            return Err(DnsError::NoFamilyEnabled);
        }
        let fqdn = fqdn(&domain);
        if self.is_self(&fqdn) {
            error!(server = %self.name, "DoH server tries to resolve itself, use an IP or a static host");
            return Err(DnsError::SelfQuery(self.name.clone()));
        }

        if option
            .record_types()
            .all(|rt| self.cache.has_live(&fqdn, rt))
        {
            let result = self.cache.lookup(&fqdn, option);
            debug!(server = %self.name, domain = %domain, result = ?result, "cache HIT");
            return result;
        }

        let start = Instant::now();
        let deadline = deadline.unwrap_or(start + self.options.query_timeout);
        let topics: Vec<(RecordType, String)> = option
            .record_types()
            .map(|rt| (rt, rt.topic(&fqdn)))
            .collect();
        let mut attempts: Option<Vec<(RecordType, Arc<Attempt>)>> = None;

        loop {
            // Subscribe before looking at the cache so no publish is missed.
            let mut subs: Vec<Subscription> = topics
                .iter()
                .map(|(_, topic)| self.cache.notifier().subscribe(topic.as_str()))
                .collect();

            let joined = match &attempts {
                Some(joined) => joined.clone(),
                None => {
                    let joined = self.dispatch(&fqdn, &topics, deadline)?;
                    attempts = Some(joined.clone());
                    joined
                }
            };

            // Every requested type must have an answer or a finished attempt.
            let settled = joined
                .iter()
                .all(|(rt, attempt)| attempt.is_finished() || self.cache.has_live(&fqdn, *rt));
            if settled {
                return self.settle(&domain, &fqdn, option, &joined, start);
            }

            let wakeup = futures::future::select_all(subs.iter_mut().map(|s| Box::pin(s.wait())));
            if tokio::time::timeout_at(deadline, wakeup).await.is_err() {
                warn!(
                    server = %self.name,
                    domain = %domain,
                    elapsed = ?start.elapsed(),
                    "query deadline exceeded"
                );
                return Err(DnsError::Cancelled);
            }
        }
    }

    /// Final answer once no requested type is still pending.
    fn settle(
        &self,
        domain: &str,
        fqdn: &str,
        option: IpOption,
        joined: &[(RecordType, Arc<Attempt>)],
        start: Instant,
    ) -> DnsResult<Vec<IpAddr>> {
        let result = match self.cache.lookup(fqdn, option) {
            Err(DnsError::NotFound) => Err(joined
                .iter()
                .filter_map(|(_, attempt)| attempt.error())
                .last()
                .unwrap_or(DnsError::EmptyResponse)),
            result => result,
        };

        match &result {
            Ok(addresses) => info!(
                server = %self.name,
                domain = %domain,
                addresses = ?addresses,
                elapsed = ?start.elapsed(),
                "query answered"
            ),
            Err(err) => warn!(
                server = %self.name,
                domain = %domain,
                error = %err,
                elapsed = ?start.elapsed(),
                "query failed"
            ),
        }
        result
    }

    /// Join the in-flight attempt for each topic, starting one where none
    /// is running.
    fn dispatch(
        self: &Arc<Self>,
        fqdn: &str,
        topics: &[(RecordType, String)],
        deadline: Instant,
    ) -> DnsResult<Vec<(RecordType, Arc<Attempt>)>> {
        let mut joined = Vec::with_capacity(topics.len());
        let mut started = Vec::new();
        let mut failure = None;

        for (record_type, topic) in topics {
            match self.inflight.entry(topic.clone()) {
                Entry::Occupied(entry) => joined.push((*record_type, Arc::clone(entry.get()))),
                Entry::Vacant(entry) => {
                    let built = wire::build_requests(
                        fqdn,
                        &[*record_type],
                        || self.next_id(),
                        self.client_ip,
                    );
                    let request = match built.and_then(|mut requests| {
                        requests.pop().ok_or_else(|| {
                            DnsError::InvalidDomain(format!("no {} query for {}", record_type, fqdn))
                        })
                    }) {
                        Ok(request) => request,
                        Err(err) => {
                            failure = Some(err);
                            break;
                        }
                    };
                    let attempt = Arc::new(Attempt::default());
                    entry.insert(Arc::clone(&attempt));
                    joined.push((*record_type, Arc::clone(&attempt)));
                    started.push((request, attempt, topic.clone()));
                }
            }
        }

        if let Some(err) = failure {
            for (_, attempt, topic) in &started {
                attempt.finish(Some(err.clone()));
                self.inflight
                    .remove_if(topic, |_, current| Arc::ptr_eq(current, attempt));
                self.cache.notifier().publish(topic);
            }
            return Err(err);
        }

        for (request, attempt, topic) in started {
            info!(
                server = %self.name,
                domain = %fqdn,
                record_type = %request.record_type,
                id = request.id(),
                "querying"
            );
            tokio::spawn(Arc::clone(self).run_request(request, attempt, topic, deadline));
        }
        Ok(joined)
    }

    async fn run_request(
        self: Arc<Self>,
        request: DnsRequest,
        attempt: Arc<Attempt>,
        topic: String,
        deadline: Instant,
    ) {
        let result = match tokio::time::timeout_at(deadline, self.exchange(&request)).await {
            Ok(result) => result,
            Err(_) => Err(DnsError::transport(
                self.name.as_str(),
                io::Error::new(io::ErrorKind::TimedOut, "upstream query deadline exceeded"),
            )),
        };

        match result {
            Ok(record) => {
                info!(
                    server = %self.name,
                    domain = %request.domain,
                    record_type = %request.record_type,
                    addresses = ?record.addresses,
                    elapsed = ?request.start.elapsed(),
                    "got answer"
                );
                self.cache
                    .update(&request.domain, request.record_type, record, request.start);
                attempt.finish(None);
            }
            Err(err) => {
                error!(
                    server = %self.name,
                    domain = %request.domain,
                    record_type = %request.record_type,
                    error = %err,
                    "DoH query failed"
                );
                attempt.finish(Some(err));
            }
        }

        self.inflight
            .remove_if(&topic, |_, current| Arc::ptr_eq(current, &attempt));
        self.cache.notifier().publish(&topic);
    }

    async fn exchange(&self, request: &DnsRequest) -> DnsResult<IpRecord> {
        let body = request.encode()?;
        let payload = self.http.post(&self.url, body).await?;
        wire::parse_response(&payload, request.id())
    }
}
