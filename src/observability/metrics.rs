//! Metrics collection and exposition.
//!
//! # Metrics
//! - `tunnel_sessions_total` (counter): accepted sessions
//! - `tunnel_sessions_active` (gauge): live sessions
//! - `tunnel_connect_failures_total` (counter): outbound failures by `reason`
//! - `tunnel_tls_handshake_failures_total` (counter)
//! - `tunnel_header_rewrites_total` (counter): buffers passed through the rewriter
//! - `tunnel_bytes_total` (counter): relayed bytes by `direction`
//! - `tunnel_session_duration_seconds` (histogram)
//!
//! Recording is always safe: without an installed recorder the macros are no-ops.

use std::net::SocketAddr;
use std::time::Duration;

use ::metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and serve it over HTTP on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_session_opened() {
    counter!("tunnel_sessions_total").increment(1);
    gauge!("tunnel_sessions_active").increment(1.0);
}

pub fn record_session_closed(duration: Duration, upstream: u64, downstream: u64) {
    gauge!("tunnel_sessions_active").decrement(1.0);
    histogram!("tunnel_session_duration_seconds").record(duration.as_secs_f64());
    counter!("tunnel_bytes_total", "direction" => "upstream").increment(upstream);
    counter!("tunnel_bytes_total", "direction" => "downstream").increment(downstream);
}

pub fn record_connect_failure(reason: &'static str) {
    counter!("tunnel_connect_failures_total", "reason" => reason).increment(1);
}

pub fn record_tls_handshake_failure() {
    counter!("tunnel_tls_handshake_failures_total").increment(1);
}

pub fn record_header_rewrite() {
    counter!("tunnel_header_rewrites_total").increment(1);
}
