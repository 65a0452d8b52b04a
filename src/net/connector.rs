//! Outbound connections to the fixed target.
//!
//! One attempt per session, bounded by the configured connect timeout.
//! There is no retry: a failure closes the client side of that session only.

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::config::schema::TargetAddress;

/// Why an outbound connection could not be established.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("failed to connect to {target}: timed out after {}s", .timeout.as_secs_f64())]
    Timeout {
        target: TargetAddress,
        timeout: Duration,
    },

    #[error("failed to connect to {target}: {source}")]
    Io {
        target: TargetAddress,
        #[source]
        source: io::Error,
    },
}

impl ConnectError {
    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            ConnectError::Timeout { .. } => "timeout",
            ConnectError::Io { source, .. } => match source.kind() {
                io::ErrorKind::ConnectionRefused => "refused",
                io::ErrorKind::NotFound => "unresolved",
                _ => "io",
            },
        }
    }
}

/// Opens the outbound half of a session.
pub trait OutboundConnector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Connect to `target`, giving up after `timeout`.
    fn connect(
        &self,
        target: &TargetAddress,
        timeout: Duration,
    ) -> impl Future<Output = Result<Self::Stream, ConnectError>> + Send;
}

/// Plain TCP connector. Name resolution counts against the timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl OutboundConnector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(
        &self,
        target: &TargetAddress,
        timeout: Duration,
    ) -> Result<TcpStream, ConnectError> {
        let attempt = TcpStream::connect((target.host.as_str(), target.port));
        let stream = match tokio::time::timeout(timeout, attempt).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(ConnectError::Io {
                    target: target.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(ConnectError::Timeout {
                    target: target.clone(),
                    timeout,
                })
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "Failed to set TCP_NODELAY on outbound socket");
        }
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connects_to_listening_target() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let target = TargetAddress::new("127.0.0.1", addr.port());
        let stream = TcpConnector
            .connect(&target, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(stream.peer_addr().unwrap(), addr);
    }

    #[tokio::test]
    async fn refused_connection_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let target = TargetAddress::new("127.0.0.1", port);
        let err = TcpConnector
            .connect(&target, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::Io { .. }));
        assert_eq!(err.reason(), "refused");
        assert!(err.to_string().contains(&format!("127.0.0.1:{port}")));
    }

    #[tokio::test]
    async fn connect_timeout_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = TargetAddress::new("127.0.0.1", listener.local_addr().unwrap().port());

        // the socket is never writable on the first poll
        let err = TcpConnector
            .connect(&target, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::Timeout { .. }));
        assert_eq!(err.reason(), "timeout");
    }

    #[test]
    fn timeout_reason_label() {
        let err = ConnectError::Timeout {
            target: TargetAddress::new("192.0.2.1", 80),
            timeout: Duration::from_secs(20),
        };
        assert_eq!(err.reason(), "timeout");
        assert_eq!(
            err.to_string(),
            "failed to connect to 192.0.2.1:80: timed out after 20s"
        );
    }
}
