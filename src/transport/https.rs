//! RFC 8484 POST client.
//!
//! Sends DNS wire messages as `application/dns-message` POST bodies over
//! HTTP/1.1 or HTTP/2, whichever the server picks through ALPN. Connections
//! are pooled and reused; every response body is read to the end, so a
//! non-200 reply still leaves its connection reusable.

use crate::base::error::{DnsError, DnsResult};
use crate::transport::dial::{Destination, Dialer};
use crate::transport::tls::TlsConfig;
use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, HOST};
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::client::conn::{http1, http2};
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

/// Media type of RFC 8484 wire-format bodies.
pub const DNS_MESSAGE: &str = "application/dns-message";

/// Connection and timeout tunables.
#[derive(Debug, Clone)]
pub struct HttpOptions {
    /// Upper bound for one POST, including connecting.
    pub request_timeout: Duration,
    /// Idle HTTP/1.1 connections older than this are not reused.
    pub idle_timeout: Duration,
    pub max_idle: usize,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(180),
            idle_timeout: Duration::from_secs(90),
            max_idle: 30,
        }
    }
}

type Body = Full<Bytes>;

enum Sender {
    H1(http1::SendRequest<Body>),
    H2(http2::SendRequest<Body>),
}

impl Sender {
    fn is_h2(&self) -> bool {
        matches!(self, Sender::H2(_))
    }
}

struct IdleConnection {
    sender: http1::SendRequest<Body>,
    idle_since: Instant,
}

#[derive(Default)]
struct Pool {
    h1: VecDeque<IdleConnection>,
    h2: Option<http2::SendRequest<Body>>,
}

/// HTTPS client for one DoH endpoint.
pub struct DohHttpClient {
    dialer: Arc<dyn Dialer>,
    /// `None` for plain `http://` endpoints.
    tls: Option<TlsConfig>,
    options: HttpOptions,
    pool: Mutex<Pool>,
}

impl DohHttpClient {
    pub fn new(dialer: Arc<dyn Dialer>, tls: Option<TlsConfig>, options: HttpOptions) -> Self {
        Self {
            dialer,
            tls,
            options,
            pool: Mutex::new(Pool::default()),
        }
    }

    /// POST `body` to `url` and return the 200 response body.
    pub async fn post(&self, url: &Url, body: Vec<u8>) -> DnsResult<Bytes> {
        let destination = Destination::from_url(url)?;
        let server = destination.to_string();
        match tokio::time::timeout(
            self.options.request_timeout,
            self.post_inner(url, &destination, Bytes::from(body)),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DnsError::transport(
                server,
                io::Error::new(io::ErrorKind::TimedOut, "DoH request timed out"),
            )),
        }
    }

    async fn post_inner(&self, url: &Url, destination: &Destination, body: Bytes) -> DnsResult<Bytes> {
        if let Some(sender) = self.checkout() {
            match self.send(sender, url, destination, body.clone()).await {
                Err(DnsError::Transport { source, .. }) => {
                    debug!(server = %destination, error = %source, "pooled connection failed, redialing");
                }
                result => return result,
            }
        }

        let sender = self.connect(destination).await?;
        self.send(sender, url, destination, body).await
    }

    async fn connect(&self, destination: &Destination) -> DnsResult<Sender> {
        let server = destination.to_string();
        let stream = self.dialer.dial(destination).await?;

        let (stream, h2) = match &self.tls {
            Some(tls) => {
                let tls = tls.connect(&destination.host, stream).await?;
                (tls.stream, tls.h2)
            }
            None => (stream, false),
        };
        let io = TokioIo::new(stream);

        if h2 {
            let (sender, conn) = http2::handshake::<_, _, Body>(TokioExecutor::new(), io)
                .await
                .map_err(|e| DnsError::transport(&server, io::Error::other(e)))?;
            let log_server = server.clone();
            tokio::spawn(async move {
                if let Err(e) = conn.await {
                    debug!(server = %log_server, error = %e, "h2 connection closed");
                }
            });
            self.lock_pool().h2 = Some(sender.clone());
            debug!(server = %server, "new h2 connection");
            Ok(Sender::H2(sender))
        } else {
            let (sender, conn) = http1::handshake::<_, Body>(io)
                .await
                .map_err(|e| DnsError::transport(&server, io::Error::other(e)))?;
            let log_server = server.clone();
            tokio::spawn(async move {
                if let Err(e) = conn.await {
                    debug!(server = %log_server, error = %e, "h1 connection closed");
                }
            });
            debug!(server = %server, "new h1 connection");
            Ok(Sender::H1(sender))
        }
    }

    async fn send(
        &self,
        sender: Sender,
        url: &Url,
        destination: &Destination,
        body: Bytes,
    ) -> DnsResult<Bytes> {
        let server = destination.to_string();
        let transport = |e: hyper::Error| DnsError::transport(&server, io::Error::other(e));
        let request = build_request(url, sender.is_h2(), body)?;

        let (response, sender) = match sender {
            Sender::H1(mut s) => {
                s.ready().await.map_err(transport)?;
                let response = s.send_request(request).await;
                (response, Sender::H1(s))
            }
            Sender::H2(mut s) => {
                s.ready().await.map_err(transport)?;
                let response = s.send_request(request).await;
                (response, Sender::H2(s))
            }
        };
        let response = response.map_err(transport)?;

        let status = response.status();
        let payload = response
            .into_body()
            .collect()
            .await
            .map_err(transport)?
            .to_bytes();
        self.checkin(sender);

        if status != StatusCode::OK {
            warn!(server = %server, status = status.as_u16(), "DoH server rejected query");
            return Err(DnsError::HttpStatus(status.as_u16()));
        }
        Ok(payload)
    }

    fn lock_pool(&self) -> std::sync::MutexGuard<'_, Pool> {
        self.pool.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn checkout(&self) -> Option<Sender> {
        let mut pool = self.lock_pool();

        if let Some(h2) = &pool.h2 {
            if !h2.is_closed() {
                return Some(Sender::H2(h2.clone()));
            }
            pool.h2 = None;
        }

        while let Some(idle) = pool.h1.pop_back() {
            if idle.sender.is_closed() || idle.idle_since.elapsed() > self.options.idle_timeout {
                continue;
            }
            return Some(Sender::H1(idle.sender));
        }
        None
    }

    fn checkin(&self, sender: Sender) {
        let mut pool = self.lock_pool();
        match sender {
            Sender::H1(sender) => {
                if sender.is_closed() {
                    return;
                }
                if pool.h1.len() >= self.options.max_idle {
                    pool.h1.pop_front();
                }
                pool.h1.push_back(IdleConnection {
                    sender,
                    idle_since: Instant::now(),
                });
            }
            Sender::H2(sender) => {
                if pool.h2.is_none() && !sender.is_closed() {
                    pool.h2 = Some(sender);
                }
            }
        }
    }

    /// Number of pooled HTTP/1.1 connections.
    pub fn idle_count(&self) -> usize {
        self.lock_pool().h1.len()
    }
}

impl std::fmt::Debug for DohHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DohHttpClient")
            .field("tls", &self.tls.is_some())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// HTTP/1.1 takes the origin-form path and a Host header; HTTP/2 takes the
/// absolute URI.
fn build_request(url: &Url, h2: bool, body: Bytes) -> DnsResult<Request<Body>> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .header(ACCEPT, DNS_MESSAGE)
        .header(CONTENT_TYPE, DNS_MESSAGE)
        .header(CONTENT_LENGTH, body.len());

    if h2 {
        builder = builder.uri(url.as_str());
    } else {
        let path = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };
        let host = url.host_str().unwrap_or_default();
        let authority = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        builder = builder.uri(path).header(HOST, authority);
    }

    builder
        .body(Full::new(body))
        .map_err(|e| DnsError::InvalidConfig(format!("bad DoH request for {}: {}", url, e)))
}
