//! TLS for DoH connections, on BoringSSL.

use crate::base::error::{DnsError, DnsResult};
use crate::transport::stream::BoxedStream;
use boring::ssl::{SslConnector, SslConnectorBuilder, SslMethod, SslVerifyMode, SslVersion};
use std::io;

/// TLS settings for connecting to a DoH server.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub min_version: Option<SslVersion>,
    pub alpn_protos: Vec<String>,
    /// Verify the server certificate and hostname.
    pub verify_peer: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            min_version: Some(SslVersion::TLS1_2),
            alpn_protos: vec!["h2".to_string(), "http/1.1".to_string()],
            verify_peer: true,
        }
    }
}

/// A finished handshake.
#[derive(Debug)]
pub struct TlsStream {
    pub stream: BoxedStream,
    /// The server picked HTTP/2 through ALPN.
    pub h2: bool,
}

impl TlsConfig {
    /// ALPN protocol list in wire format: each name prefixed by its length.
    pub fn alpn_wire(&self) -> DnsResult<Vec<u8>> {
        let mut wire = Vec::new();
        for proto in &self.alpn_protos {
            let len = u8::try_from(proto.len()).map_err(|_| {
                DnsError::InvalidConfig(format!("ALPN protocol too long: {}", proto))
            })?;
            wire.push(len);
            wire.extend_from_slice(proto.as_bytes());
        }
        Ok(wire)
    }

    fn apply_to_builder(&self, builder: &mut SslConnectorBuilder, server: &str) -> DnsResult<()> {
        if let Some(min) = self.min_version {
            builder
                .set_min_proto_version(Some(min))
                .map_err(|e| tls_error(server, e))?;
        }
        if !self.alpn_protos.is_empty() {
            builder
                .set_alpn_protos(&self.alpn_wire()?)
                .map_err(|e| tls_error(server, e))?;
        }
        let mode = if self.verify_peer {
            SslVerifyMode::PEER
        } else {
            SslVerifyMode::NONE
        };
        builder.set_verify(mode);
        Ok(())
    }

    /// Run a TLS handshake with `host` over `stream`.
    pub async fn connect(&self, host: &str, stream: BoxedStream) -> DnsResult<TlsStream> {
        let mut builder =
            SslConnector::builder(SslMethod::tls()).map_err(|e| tls_error(host, e))?;
        self.apply_to_builder(&mut builder, host)?;

        let mut config = builder
            .build()
            .configure()
            .map_err(|e| tls_error(host, e))?;
        if !Self::should_set_sni(host) {
            config.set_use_server_name_indication(false);
        }
        if !self.verify_peer {
            config.set_verify_hostname(false);
        }

        let tls = tokio_boring::connect(config, host, stream)
            .await
            .map_err(|e| tls_error(host, e))?;
        let h2 = Self::negotiated_h2(tls.ssl().selected_alpn_protocol());
        tracing::debug!(host = %host, h2, "TLS handshake complete");

        Ok(TlsStream {
            stream: BoxedStream::new(tls),
            h2,
        })
    }

    /// SNI must not be sent for IP literals (RFC 6066).
    pub fn should_set_sni(host: &str) -> bool {
        host.parse::<std::net::IpAddr>().is_err()
    }

    pub fn negotiated_h2(alpn: Option<&[u8]>) -> bool {
        alpn == Some(b"h2".as_slice())
    }
}

fn tls_error(server: &str, err: impl std::fmt::Display) -> DnsError {
    DnsError::transport(
        server,
        io::Error::new(io::ErrorKind::ConnectionAborted, format!("TLS: {}", err)),
    )
}
