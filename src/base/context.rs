//! Ergonomic error context helpers.
//!
//! Provides extension traits for adding context to `Result` types,
//! converting IO errors into context-rich `DnsError` variants.

use crate::base::error::DnsError;
use std::io;

/// Extension trait for adding context to IO Results.
pub trait IoResultExt<T> {
    /// Attach the upstream endpoint to an IO error.
    ///
    /// # Example
    /// ```ignore
    /// use proxydns::base::context::IoResultExt;
    ///
    /// let stream = TcpStream::connect(addr).await
    ///     .transport_context("dns.google:443")?;
    /// // Error: "transport to dns.google:443 failed: connection refused"
    /// ```
    fn transport_context(self, server: &str) -> Result<T, DnsError>;
}

impl<T> IoResultExt<T> for Result<T, io::Error> {
    fn transport_context(self, server: &str) -> Result<T, DnsError> {
        self.map_err(|e| DnsError::transport(server, e))
    }
}
