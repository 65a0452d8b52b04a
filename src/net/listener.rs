//! TCP listener implementation with backpressure.
//!
//! # Responsibilities
//! - Bind to the configured base address
//! - Accept incoming TCP connections
//! - Enforce max_connections limit via semaphore
//! - Terminate TLS for `https` bases
//! - Spawn one session task per connection; a failing session never stops the loop

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Semaphore};
use tokio_rustls::TlsAcceptor;
use tracing::Instrument;

use crate::config::schema::TunnelConfig;
use crate::config::validation::ValidationError;
use crate::net::connection::{SessionGuard, SessionTracker};
use crate::net::connector::OutboundConnector;
use crate::net::session::{RelaySettings, Session};
use crate::observability::metrics;

/// Pause after a failed accept (e.g. descriptor exhaustion) before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    Bind(#[source] std::io::Error),

    /// Failed to accept connection.
    #[error("Failed to accept: {0}")]
    Accept(#[source] std::io::Error),

    /// Configuration cannot be served.
    #[error("Invalid listener configuration: {0}")]
    Config(#[from] ValidationError),
}

/// A bounded TCP listener that limits concurrent sessions.
///
/// Uses a semaphore to enforce `max_connections`. When the limit is reached,
/// new connections will wait until a slot becomes available.
pub struct Listener {
    /// The underlying TCP listener.
    inner: TcpListener,
    /// Semaphore to limit concurrent connections.
    connection_limit: Arc<Semaphore>,
    /// Configured maximum connections.
    max_connections: usize,
    /// Present for `https` bases.
    tls: Option<TlsAcceptor>,
    tls_handshake_timeout: Duration,
    settings: Arc<RelaySettings>,
    tracker: SessionTracker,
}

impl Listener {
    /// Bind to the configured base address.
    ///
    /// `tls` must be supplied when the base protocol requires TLS.
    pub async fn bind(config: &TunnelConfig, tls: Option<TlsAcceptor>) -> Result<Self, ListenerError> {
        let base = config.base.as_ref().ok_or(ValidationError::MissingBase)?;
        if base.protocol.requires_tls() && tls.is_none() {
            return Err(ValidationError::MissingTlsMaterial.into());
        }
        let settings = RelaySettings::from_config(config)?;

        let listener = TcpListener::bind((base.bind_host().as_str(), base.port))
            .await
            .map_err(ListenerError::Bind)?;

        let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;
        let max_connections = config.limits.max_connections;

        tracing::info!(
            address = %local_addr,
            protocol = %base.protocol,
            target = %settings.target,
            max_connections,
            "Listener bound"
        );

        Ok(Self {
            inner: listener,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
            max_connections,
            tls,
            tls_handshake_timeout: config.tls_handshake_timeout(),
            settings: Arc::new(settings),
            tracker: SessionTracker::new(),
        })
    }

    /// Accept a new connection, respecting the connection limit.
    ///
    /// This will wait if the connection limit has been reached.
    /// Returns the stream and a permit that must be held for the connection's lifetime.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        // Acquire permit first (backpressure)
        let permit = Arc::clone(&self.connection_limit)
            .acquire_owned()
            .await
            .map_err(|e| ListenerError::Accept(std::io::Error::other(e)))?;

        // Then accept the connection
        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        tracing::debug!(
            peer_addr = %addr,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    /// Accept and relay until `shutdown` fires.
    pub async fn run<C: OutboundConnector>(
        self,
        connector: Arc<C>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        loop {
            let accepted = tokio::select! {
                accepted = self.accept() => accepted,
                _ = shutdown.recv() => {
                    tracing::info!(active_sessions = self.tracker.active_count(), "Listener stopping");
                    return Ok(());
                }
            };

            match accepted {
                Ok((stream, peer_addr, permit)) => {
                    self.spawn_session(stream, peer_addr, permit, &connector);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }

    fn spawn_session<C: OutboundConnector>(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
        permit: ConnectionPermit,
        connector: &Arc<C>,
    ) {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer_addr = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
        }

        let guard = self.tracker.track();
        let span = tracing::info_span!("session", session_id = %guard.id(), %peer_addr);
        let settings = Arc::clone(&self.settings);
        let connector = Arc::clone(connector);
        let tls = self.tls.clone();
        let handshake_timeout = self.tls_handshake_timeout;

        tokio::spawn(
            async move {
                let _permit = permit;
                match tls {
                    None => serve(stream, peer_addr, guard, settings, connector).await,
                    Some(acceptor) => {
                        match tokio::time::timeout(handshake_timeout, acceptor.accept(stream)).await {
                            Ok(Ok(tls_stream)) => {
                                serve(tls_stream, peer_addr, guard, settings, connector).await
                            }
                            Ok(Err(e)) => {
                                metrics::record_tls_handshake_failure();
                                tracing::debug!(error = %e, "TLS handshake failed");
                            }
                            Err(_) => {
                                metrics::record_tls_handshake_failure();
                                tracing::debug!(timeout = ?handshake_timeout, "TLS handshake timed out");
                            }
                        }
                    }
                }
            }
            .instrument(span),
        );
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    /// Get current available connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    /// Get configured maximum connections.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Handle on the live-session count, usable after `run` consumed the listener.
    pub fn tracker(&self) -> SessionTracker {
        self.tracker.clone()
    }
}

async fn serve<S, C>(
    inbound: S,
    peer_addr: SocketAddr,
    guard: SessionGuard,
    settings: Arc<RelaySettings>,
    connector: Arc<C>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    C: OutboundConnector,
{
    let session = Session::new(guard.id(), inbound, peer_addr, settings, connector);
    // Errors are logged by the session and end with it.
    let _ = session.run().await;
    drop(guard);
}

/// A permit representing a connection slot.
///
/// The slot is released on drop, including when the session task panics.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}
