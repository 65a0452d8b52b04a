//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Sessions and the listener produce:
//!     → logging.rs (structured log events, one span per session)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout
//!     → Metrics endpoint (Prometheus scrape, off by default)
//! ```
//!
//! # Design Decisions
//! - Metrics are cheap (atomic increments) and no-ops without a recorder
//! - Session spans carry the session id and peer address

pub mod logging;
pub mod metrics;
