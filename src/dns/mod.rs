//! DNS resolution.
//!
//! Name servers share one contract, [`NameServer`]: give me the addresses of
//! a domain for the families in an [`IpOption`], within a deadline.
//!
//! - [`DohNameServer`]: DNS-over-HTTPS with an answer cache and request
//!   coalescing, reached through the dispatcher (remote) or dialed directly
//!   (local)
//! - [`LocalNameServer`]: the host OS resolver
//! - [`HostsOverride`]: answers from a [`StaticHosts`] table before an inner
//!   server
//!
//! # Example
//!
//! ```rust,ignore
//! use proxydns::dns::{DohNameServer, DohOptions, IpOption, NameServer};
//!
//! let server = DohNameServer::new_local(
//!     "https://1.1.1.1/dns-query".parse()?,
//!     None,
//!     DohOptions::default(),
//! )?;
//! let ips = server.query_ip("example.com", IpOption::dual(), None).await?;
//! ```

pub mod cache;
pub mod doh;
pub mod hosts;
pub mod local;
pub mod matcher;
pub mod notifier;
pub mod record;
pub mod resolve;
pub mod wire;

pub use cache::AnswerCache;
pub use doh::{DohNameServer, DohOptions};
pub use hosts::{HostAddress, HostMapping, StaticHosts};
pub use local::LocalNameServer;
pub use matcher::{DomainMatcher, MatcherGroup, MatcherKind};
pub use notifier::{Notifier, Subscription};
pub use record::{DomainRecord, IpRecord, RecordType};
pub use resolve::{fqdn, HostsOverride, IpOption, NameServer, Querying};
