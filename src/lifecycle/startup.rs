//! Startup orchestration.
//!
//! # Responsibilities
//! - One-time process initialisation (descriptor limit)
//! - Load TLS material for `https` bases
//! - Bind the listener, then accept until shutdown
//! - Drain live sessions before returning
//!
//! # Design Decisions
//! - Fail fast: TLS and bind errors are fatal and happen before any accept
//! - The descriptor limit is only ever raised, never lowered

use std::io;
use std::sync::Arc;
use std::time::Duration;

use crate::config::schema::TunnelConfig;
use crate::lifecycle::shutdown::Shutdown;
use crate::net::connector::TcpConnector;
use crate::net::listener::{Listener, ListenerError};
use crate::net::tls::{load_tls_acceptor, TlsError};

/// Fatal startup errors.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// Raise the RLIMIT_NOFILE soft limit towards `desired`, capped at the hard limit.
///
/// Returns the soft limit in effect afterwards.
#[cfg(unix)]
pub fn raise_nofile_limit(desired: u64) -> io::Result<u64> {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: getrlimit only writes into the struct it is given.
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) } != 0 {
        return Err(io::Error::last_os_error());
    }

    let wanted = (desired as libc::rlim_t).min(limit.rlim_max);
    if wanted <= limit.rlim_cur {
        return Ok(limit.rlim_cur as u64);
    }

    limit.rlim_cur = wanted;
    // SAFETY: the struct is fully initialised above.
    if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &limit) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(wanted as u64)
}

#[cfg(not(unix))]
pub fn raise_nofile_limit(desired: u64) -> io::Result<u64> {
    Ok(desired)
}

/// Serve `config` until `shutdown` is triggered.
pub async fn run(config: TunnelConfig, shutdown: Shutdown) -> Result<(), StartupError> {
    let shutdown_rx = shutdown.subscribe();

    match raise_nofile_limit(config.limits.nofile) {
        Ok(limit) => tracing::debug!(nofile = limit, "Descriptor limit set"),
        Err(e) => tracing::warn!(error = %e, "Could not raise descriptor limit"),
    }

    let requires_tls = config
        .base
        .as_ref()
        .is_some_and(|b| b.protocol.requires_tls());
    let tls = match (&config.tls, requires_tls) {
        (Some(tls), true) => Some(load_tls_acceptor(tls)?),
        (Some(_), false) => {
            tracing::warn!("TLS files given for a plain base; they are ignored");
            None
        }
        (None, _) => None,
    };

    let listener = Listener::bind(&config, tls).await?;
    let tracker = listener.tracker();

    listener
        .run(Arc::new(TcpConnector), shutdown_rx)
        .await?;

    let drain = Duration::from_secs(config.timeouts.drain_secs);
    if !tracker.wait_for_drain(drain).await {
        tracing::warn!(
            remaining = tracker.active_count(),
            "Sessions still open after drain deadline"
        );
    }
    Ok(())
}
