//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → tls.rs (handshake for https bases)
//!     → session.rs (buffer, connect, flush, pump)
//!         → connector.rs (outbound connect with timeout)
//!     → connection.rs (session ids, live-session tracking)
//!
//! Session States:
//!     Accepted → Connecting → Established → Closed
//! ```
//!
//! # Design Decisions
//! - Bounded accept via semaphore prevents resource exhaustion
//! - Each session tracked so shutdown can drain
//! - A failing session never affects the listener or other sessions

pub mod connection;
pub mod connector;
pub mod listener;
pub mod session;
pub mod tls;

pub use connector::{ConnectError, OutboundConnector, TcpConnector};
pub use listener::{Listener, ListenerError};
pub use session::{RelaySettings, Session, SessionError};
