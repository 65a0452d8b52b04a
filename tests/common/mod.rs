//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

use tcp_tunnel::config::schema::{TargetAddress, TunnelConfig};
use tcp_tunnel::net::connection::SessionTracker;
use tcp_tunnel::net::{ConnectError, Listener, OutboundConnector, TcpConnector};
use tcp_tunnel::Shutdown;

pub const HTTP_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok";

/// Target that echoes everything back.
pub async fn start_echo_target() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

/// Target that reads each connection to EOF and reports what it got.
pub async fn start_sink_target() -> (SocketAddr, mpsc::UnboundedReceiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut received = Vec::new();
                let _ = socket.read_to_end(&mut received).await;
                let _ = tx.send(received);
            });
        }
    });
    (addr, rx)
}

/// Target that reads one request header block, reports it, answers and closes.
pub async fn start_http_target() -> (SocketAddr, mpsc::UnboundedReceiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut received = Vec::new();
                let mut chunk = [0u8; 1024];
                while !received.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => received.extend_from_slice(&chunk[..n]),
                    }
                }
                let _ = tx.send(received);
                let _ = socket.write_all(HTTP_RESPONSE).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    (addr, rx)
}

/// A port nothing listens on.
pub async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

pub fn tunnel_config(protocol: &str, target: SocketAddr) -> TunnelConfig {
    TunnelConfig::new(
        format!("{protocol}:127.0.0.1:0").parse().unwrap(),
        TargetAddress::new(target.ip().to_string(), target.port()),
    )
}

pub struct RunningTunnel {
    pub addr: SocketAddr,
    pub tracker: SessionTracker,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<()>,
}

pub async fn start_tunnel(config: TunnelConfig) -> RunningTunnel {
    start_tunnel_with(config, None, TcpConnector).await
}

pub async fn start_tunnel_with<C: OutboundConnector>(
    config: TunnelConfig,
    tls: Option<TlsAcceptor>,
    connector: C,
) -> RunningTunnel {
    let listener = Listener::bind(&config, tls).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let tracker = listener.tracker();
    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();

    let handle = tokio::spawn(async move {
        listener.run(Arc::new(connector), rx).await.unwrap();
    });
    RunningTunnel {
        addr,
        tracker,
        shutdown,
        handle,
    }
}

/// TCP connector that waits before connecting.
pub struct DelayedConnector(pub Duration);

impl OutboundConnector for DelayedConnector {
    type Stream = tokio::net::TcpStream;

    async fn connect(
        &self,
        target: &TargetAddress,
        timeout: Duration,
    ) -> Result<Self::Stream, ConnectError> {
        tokio::time::sleep(self.0).await;
        TcpConnector.connect(target, timeout).await
    }
}
