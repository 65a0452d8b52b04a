//! TCP tunnel library.
//!
//! Relays every connection accepted on a base address to one fixed target,
//! optionally terminating TLS and rewriting HTTP request headers on the way.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::schema::TunnelConfig;
pub use lifecycle::Shutdown;
