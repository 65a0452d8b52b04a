//! Session: one client connection bridged to one target connection.
//!
//! # Responsibilities
//! - Start the outbound connect as soon as the session exists
//! - Buffer client bytes that arrive before the target can take them
//! - Rewrite (HTTP mode) and flush that buffer exactly once
//! - Pump bytes in both directions until either side goes away
//! - Tear both sides down together; closing twice is a no-op
//!
//! # Ordering
//! The pending buffer is written to the target in full before any later
//! client byte is read, so the target sees client bytes in arrival order.
//!
//! In HTTP mode the buffer is held until it contains a complete header
//! block (or the client closes, or `max_pending_bytes` is reached) even if
//! the target is already connected, so the rewrite never sees a header block
//! cut short by connect timing.

use std::borrow::Cow;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

use crate::config::schema::{Mode, RewriteConfig, TargetAddress, TunnelConfig};
use crate::config::validation::ValidationError;
use crate::http::rewrite::{header_block_complete, rewrite_headers, HeaderRewriteContext};
use crate::net::connection::{SessionId, SessionState};
use crate::net::connector::{ConnectError, OutboundConnector};
use crate::observability::metrics;

/// Upper bound on a best-effort shutdown of one side during teardown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Settings shared by every session of a listener.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub mode: Mode,
    pub target: TargetAddress,
    pub connect_timeout: Duration,
    pub rewrite: RewriteConfig,
    pub max_pending_bytes: usize,
    pub buffer_size: usize,
    pub verbose: bool,
}

impl RelaySettings {
    pub fn from_config(config: &TunnelConfig) -> Result<Self, ValidationError> {
        let target = config
            .target
            .clone()
            .ok_or(ValidationError::MissingTarget)?;

        Ok(Self {
            mode: config.mode(),
            target,
            connect_timeout: config.connect_timeout(),
            rewrite: config.rewrite.clone(),
            max_pending_bytes: config.limits.max_pending_bytes,
            buffer_size: config.limits.buffer_size,
            verbose: config.observability.verbose,
        })
    }
}

/// Errors that end a session. Never escape the session's own task.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}

/// Which side ended an established session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedBy {
    Client,
    Target,
}

/// Outcome of a session that ran to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    /// Client → target bytes (as received from the client).
    pub upstream: u64,
    /// Target → client bytes.
    pub downstream: u64,
    /// `None` when the client left before the target connection was ready.
    pub closed_by: Option<ClosedBy>,
}

enum ConnectingEvent<T> {
    Connected(Result<T, ConnectError>),
    Read(io::Result<usize>),
    TargetRead(io::Result<usize>),
}

/// A client connection and, once connected, its target connection.
pub struct Session<S, C: OutboundConnector> {
    id: SessionId,
    client_addr: SocketAddr,
    settings: Arc<RelaySettings>,
    connector: Arc<C>,
    inbound: Option<S>,
    outbound: Option<C::Stream>,
    pending: Vec<u8>,
    state: SessionState,
    upstream: u64,
    downstream: u64,
}

impl<S, C> Session<S, C>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    C: OutboundConnector,
{
    pub fn new(
        id: SessionId,
        inbound: S,
        client_addr: SocketAddr,
        settings: Arc<RelaySettings>,
        connector: Arc<C>,
    ) -> Self {
        Self {
            id,
            client_addr,
            pending: Vec::with_capacity(settings.buffer_size.min(settings.max_pending_bytes)),
            settings,
            connector,
            inbound: Some(inbound),
            outbound: None,
            state: SessionState::Accepted,
            upstream: 0,
            downstream: 0,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session to completion. Both sides are closed on return.
    pub async fn run(mut self) -> Result<SessionSummary, SessionError> {
        let started = Instant::now();
        metrics::record_session_opened();

        let result = self.drive().await;
        self.close().await;

        metrics::record_session_closed(started.elapsed(), self.upstream, self.downstream);
        match &result {
            Ok(summary) => tracing::debug!(
                session_id = %self.id,
                upstream = summary.upstream,
                downstream = summary.downstream,
                closed_by = ?summary.closed_by,
                "Session closed"
            ),
            Err(e) => tracing::debug!(session_id = %self.id, error = %e, "Session failed"),
        }
        result
    }

    /// Close both sides. Returns `false` if the session was already closed.
    pub async fn close(&mut self) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }
        self.state = SessionState::Closed;

        if let Some(outbound) = self.outbound.take() {
            shutdown_quietly(outbound).await;
        }
        if let Some(inbound) = self.inbound.take() {
            shutdown_quietly(inbound).await;
        }
        true
    }

    async fn drive(&mut self) -> Result<SessionSummary, SessionError> {
        let settings = Arc::clone(&self.settings);
        let connector = Arc::clone(&self.connector);

        self.state = SessionState::Connecting;
        if settings.verbose {
            tracing::info!(client = %self.client_addr, target = %settings.target, "connection");
        } else {
            tracing::debug!(client = %self.client_addr, target = %settings.target, "connection");
        }

        let connect = connector.connect(&settings.target, settings.connect_timeout);
        tokio::pin!(connect);

        let mut client_open = true;
        let mut outbound: Option<C::Stream> = None;
        // Target bytes that arrive while an HTTP header block is still being
        // collected go straight to the client.
        let mut early = vec![0u8; settings.buffer_size];

        let mut outbound = loop {
            match outbound.take() {
                Some(stream) if !client_open || self.ready_to_flush() => break stream,
                other => outbound = other,
            }

            let can_read = client_open && self.pending.len() < settings.max_pending_bytes;
            let event = match (self.inbound.as_mut(), outbound.as_mut()) {
                (Some(inbound), Some(target)) if can_read => tokio::select! {
                    read = read_pending(inbound, &mut self.pending, settings.max_pending_bytes) => ConnectingEvent::Read(read),
                    read = target.read(&mut early) => ConnectingEvent::TargetRead(read),
                },
                (Some(inbound), None) if can_read => tokio::select! {
                    result = &mut connect => ConnectingEvent::Connected(result),
                    read = read_pending(inbound, &mut self.pending, settings.max_pending_bytes) => ConnectingEvent::Read(read),
                },
                // Not reading means either the client is gone or the buffer is
                // full; in both cases a connected session has already broken out.
                _ => ConnectingEvent::Connected((&mut connect).await),
            };

            match event {
                ConnectingEvent::Connected(Ok(stream)) => {
                    tracing::trace!(session_id = %self.id, "Target connected");
                    outbound = Some(stream);
                }
                ConnectingEvent::Connected(Err(e)) => {
                    metrics::record_connect_failure(e.reason());
                    tracing::warn!(session_id = %self.id, error = %e, "Outbound connect failed");
                    return Err(e.into());
                }
                ConnectingEvent::Read(Ok(0)) => {
                    tracing::debug!(
                        session_id = %self.id,
                        buffered = self.pending.len(),
                        "Client closed before target was ready"
                    );
                    client_open = false;
                }
                ConnectingEvent::Read(Ok(n)) => {
                    tracing::trace!(session_id = %self.id, bytes = n, "Buffered client bytes");
                }
                ConnectingEvent::Read(Err(e)) => {
                    tracing::debug!(session_id = %self.id, error = %e, "Client read failed while connecting");
                    client_open = false;
                }
                ConnectingEvent::TargetRead(Ok(n)) if n > 0 => {
                    if let Some(inbound) = self.inbound.as_mut() {
                        inbound.write_all(&early[..n]).await?;
                        inbound.flush().await?;
                    }
                    self.downstream += n as u64;
                }
                ConnectingEvent::TargetRead(result) => {
                    tracing::debug!(
                        session_id = %self.id,
                        buffered = self.pending.len(),
                        "Target closed before the request was forwarded"
                    );
                    self.outbound = outbound.take();
                    return match result {
                        Err(e) if !is_disconnect(&e) => Err(e.into()),
                        _ => Ok(self.summary(Some(ClosedBy::Target))),
                    };
                }
            }
        };

        self.flush_pending(&mut outbound).await?;
        self.outbound = Some(outbound);

        if !client_open {
            // Early disconnect: what the client sent has been delivered.
            return Ok(self.summary(None));
        }

        self.state = SessionState::Established;
        let (Some(inbound), Some(outbound)) = (self.inbound.as_mut(), self.outbound.as_mut()) else {
            return Ok(self.summary(None));
        };
        let closed_by = pump(
            inbound,
            outbound,
            settings.buffer_size,
            &mut self.upstream,
            &mut self.downstream,
        )
        .await?;

        Ok(self.summary(Some(closed_by)))
    }

    fn ready_to_flush(&self) -> bool {
        match self.settings.mode {
            Mode::Raw => true,
            Mode::Http => {
                self.pending.len() >= self.settings.max_pending_bytes
                    || header_block_complete(&self.pending)
            }
        }
    }

    /// Write the pending buffer to the target, once.
    async fn flush_pending(&mut self, outbound: &mut C::Stream) -> io::Result<()> {
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            return Ok(());
        }

        let data = match self.settings.mode {
            Mode::Raw => Cow::Borrowed(pending.as_slice()),
            Mode::Http => {
                let ctx = HeaderRewriteContext::new(
                    self.client_addr.ip().to_canonical(),
                    &self.settings.target,
                    &self.settings.rewrite,
                );
                metrics::record_header_rewrite();
                rewrite_headers(&pending, &ctx)
            }
        };

        outbound.write_all(&data).await?;
        outbound.flush().await?;
        self.upstream += pending.len() as u64;

        tracing::trace!(
            session_id = %self.id,
            received = pending.len(),
            written = data.len(),
            "Flushed pending buffer"
        );
        Ok(())
    }

    fn summary(&self, closed_by: Option<ClosedBy>) -> SessionSummary {
        SessionSummary {
            upstream: self.upstream,
            downstream: self.downstream,
            closed_by,
        }
    }
}

/// Append client bytes to `pending` without growing it past `limit`.
async fn read_pending<R>(reader: &mut R, pending: &mut Vec<u8>, limit: usize) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let room = limit.saturating_sub(pending.len()) as u64;
    let mut limited = (&mut *reader).take(room);
    limited.read_buf(pending).await
}

/// Relay both directions until one side finishes, then stop both.
async fn pump<A, B>(
    inbound: &mut A,
    outbound: &mut B,
    buffer_size: usize,
    upstream: &mut u64,
    downstream: &mut u64,
) -> io::Result<ClosedBy>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_rx, mut client_tx) = tokio::io::split(inbound);
    let (mut target_rx, mut target_tx) = tokio::io::split(outbound);

    let (side, result) = tokio::select! {
        r = forward(&mut client_rx, &mut target_tx, buffer_size, upstream) => (ClosedBy::Client, r),
        r = forward(&mut target_rx, &mut client_tx, buffer_size, downstream) => (ClosedBy::Target, r),
    };

    match result {
        Ok(()) => Ok(side),
        Err(e) if is_disconnect(&e) => Ok(side),
        Err(e) => Err(e),
    }
}

/// Copy one direction with a fixed buffer; each write completes before the next read.
async fn forward<R, W>(
    reader: &mut R,
    writer: &mut W,
    buffer_size: usize,
    total: &mut u64,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        *total += n as u64;
    }
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::NotConnected
    )
}

async fn shutdown_quietly<T: AsyncWrite + Unpin>(mut stream: T) {
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, stream.shutdown()).await;
}
