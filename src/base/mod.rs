//! Base types and error handling.
//!
//! - [`DnsError`](error::DnsError): error kinds shared by every backend
//! - [`IoResultExt`](context::IoResultExt): attaching upstream context to IO errors

pub mod context;
pub mod error;

#[cfg(test)]
mod tests;
