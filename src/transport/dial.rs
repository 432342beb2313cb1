//! Opening byte streams to DoH servers.
//!
//! A remote DoH backend reaches its server through the platform's
//! [`Dispatcher`], so the query is routed like any other proxied
//! connection. A local backend dials directly with [`SystemDialer`].

use crate::base::context::IoResultExt;
use crate::base::error::{DnsError, DnsResult};
use crate::transport::stream::{BoxedStream, LinkStream};
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info};
use url::Url;

/// Host and port a stream is opened to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    pub host: String,
    pub port: u16,
}

impl Destination {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Destination of `url`, using the scheme's default port if none is set.
    pub fn from_url(url: &Url) -> DnsResult<Self> {
        let host = url
            .host_str()
            .ok_or_else(|| DnsError::InvalidConfig(format!("no host in {}", url)))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let port = url
            .port_or_known_default()
            .ok_or_else(|| DnsError::InvalidConfig(format!("no port for {}", url)))?;
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// The two halves of a dispatched connection.
pub struct Link {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
}

impl Link {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }
}

/// Alias for the `Future` returned by a dispatcher.
pub type Dispatching = Pin<Box<dyn Future<Output = io::Result<Link>> + Send>>;

/// The platform's generic stream dispatcher.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, destination: Destination) -> Dispatching;
}

impl<D: Dispatcher + ?Sized> Dispatcher for Arc<D> {
    fn dispatch(&self, destination: Destination) -> Dispatching {
        (**self).dispatch(destination)
    }
}

/// Alias for the `Future` returned by a dialer.
pub type Dialing = Pin<Box<dyn Future<Output = DnsResult<BoxedStream>> + Send>>;

/// Opens raw byte streams for the HTTPS client.
pub trait Dialer: Send + Sync {
    fn dial(&self, destination: &Destination) -> Dialing;
}

/// Dials through a [`Dispatcher`].
#[derive(Clone)]
pub struct DispatcherDialer {
    dispatcher: Arc<dyn Dispatcher>,
}

impl DispatcherDialer {
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

impl Dialer for DispatcherDialer {
    fn dial(&self, destination: &Destination) -> Dialing {
        let dispatching = self.dispatcher.dispatch(destination.clone());
        let server = destination.to_string();
        Box::pin(async move {
            let link = dispatching.await.transport_context(&server)?;
            debug!(server = %server, "dispatched DoH link");
            Ok(BoxedStream::new(LinkStream::new(link.reader, link.writer)))
        })
    }
}

impl fmt::Debug for DispatcherDialer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatcherDialer").finish_non_exhaustive()
    }
}

/// Dials with the host network stack.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemDialer;

impl Dialer for SystemDialer {
    fn dial(&self, destination: &Destination) -> Dialing {
        let destination = destination.clone();
        Box::pin(async move {
            let server = destination.to_string();
            let stream = TcpStream::connect((destination.host.as_str(), destination.port))
                .await
                .transport_context(&server)?;
            let _ = stream.set_nodelay(true);
            info!(server = %server, "dialed DoH server directly");
            Ok(BoxedStream::new(stream))
        })
    }
}
