//! TCP tunnel
//!
//! Forwards every connection accepted on a base address to one fixed target.
//!
//! ```text
//!     Client ──▶ base (tcp | ssh | http | https) ──▶ Session ──▶ target host:port
//!                        │                              │
//!                   TLS (https)              Header rewrite (http, https)
//! ```
//!
//! Each session buffers client bytes while the outbound connection is being
//! established, flushes them once, then relays both directions until either
//! side closes.

use clap::Parser;

use tcp_tunnel::config::args::Args;
use tcp_tunnel::lifecycle::{signals, startup, Shutdown};
use tcp_tunnel::observability::{logging, metrics};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Args::parse().into_config()?;

    logging::init_logging(&config.observability);

    tracing::info!("tcp-tunnel v{} starting", env!("CARGO_PKG_VERSION"));
    if let (Some(base), Some(target)) = (&config.base, &config.target) {
        tracing::info!(
            base = %base,
            target = %target,
            mode = ?config.mode(),
            connect_timeout_secs = config.timeouts.connect_secs,
            x_forwarded_for = !config.rewrite.suppress_xff,
            host_translation = !config.rewrite.suppress_host_rewrite,
            "Configuration loaded"
        );
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    tokio::spawn(signals::wait_for_signal(shutdown.clone()));

    startup::run(config, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
