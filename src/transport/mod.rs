//! Byte transports for DoH.
//!
//! - [`stream`]: boxed async streams
//! - [`dial`]: destinations, the platform dispatcher and direct dialing
//! - [`tls`]: BoringSSL handshakes with ALPN
//! - [`https`]: pooled RFC 8484 POST client

pub mod dial;
pub mod https;
pub mod stream;
pub mod tls;

pub use dial::{Destination, Dialer, Dispatcher, DispatcherDialer, Link, SystemDialer};
pub use https::{DohHttpClient, HttpOptions};
pub use stream::BoxedStream;
pub use tls::TlsConfig;
