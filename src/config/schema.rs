//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the tunnel.
//! All types derive Serde traits so the same structure can be read from a
//! TOML file or assembled from command-line arguments.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the tunnel.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TunnelConfig {
    /// Local address to accept connections on.
    pub base: Option<BaseAddress>,

    /// Fixed remote every session is forwarded to.
    pub target: Option<TargetAddress>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// HTTP header rewriting switches.
    pub rewrite: RewriteConfig,

    /// Certificate material for `https` listeners.
    pub tls: Option<TlsConfig>,

    /// Resource limits.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl TunnelConfig {
    /// Create a configuration for the given listener and target with defaults elsewhere.
    pub fn new(base: BaseAddress, target: TargetAddress) -> Self {
        Self {
            base: Some(base),
            target: Some(target),
            ..Self::default()
        }
    }

    /// Relay mode derived from the base protocol. Defaults to raw when unset.
    pub fn mode(&self) -> Mode {
        self.base
            .as_ref()
            .map(|b| b.protocol.mode())
            .unwrap_or(Mode::Raw)
    }

    /// Outbound connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.connect_secs)
    }

    /// Inbound TLS handshake timeout.
    pub fn tls_handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.tls_handshake_secs)
    }
}

/// Protocol declared on the base address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Ssh,
    Http,
    Https,
}

impl Protocol {
    /// Well-known port used when the base address omits one.
    pub fn default_port(self) -> Option<u16> {
        match self {
            Protocol::Https => Some(443),
            Protocol::Http => Some(80),
            Protocol::Ssh => Some(22),
            Protocol::Tcp => None,
        }
    }

    /// Relay mode for this protocol.
    pub fn mode(self) -> Mode {
        match self {
            Protocol::Tcp | Protocol::Ssh => Mode::Raw,
            Protocol::Http | Protocol::Https => Mode::Http,
        }
    }

    /// Whether inbound connections are TLS-terminated.
    pub fn requires_tls(self) -> bool {
        matches!(self, Protocol::Https)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Ssh => "ssh",
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

impl FromStr for Protocol {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "ssh" => Ok(Protocol::Ssh),
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            _ => Err(AddressError::UnsupportedProtocol(s.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How session bytes are treated in transit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Byte-for-byte relay.
    Raw,
    /// Host / X-Forwarded-For rewriting on the first buffered chunk.
    Http,
}

/// Errors produced while parsing base and target addresses.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("invalid format of `base`, '<protocol>:<host address>[:<port>]': {0}")]
    InvalidBase(String),

    #[error("invalid format of `target`, '<host address or ip>:<port>': {0}")]
    InvalidTarget(String),

    #[error("unsupported protocol '{0}', expected one of tcp, ssh, http, https")]
    UnsupportedProtocol(String),

    #[error("invalid port '{0}', it must be an integer between 0 and 65535")]
    InvalidPort(String),

    #[error("protocol '{0}' has no default port, one must be given")]
    MissingPort(Protocol),
}

/// Listening side: `<protocol>:<host>[:<port>]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct BaseAddress {
    pub protocol: Protocol,
    /// `None` binds every interface.
    pub host: Option<String>,
    pub port: u16,
}

impl BaseAddress {
    /// Resolve the bind address. Hostnames other than IP literals are resolved by the caller.
    pub fn bind_host(&self) -> String {
        match &self.host {
            Some(h) => strip_brackets(h).to_string(),
            None => IpAddr::V4(Ipv4Addr::UNSPECIFIED).to_string(),
        }
    }
}

impl FromStr for BaseAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (proto, rest) = s
            .split_once(':')
            .ok_or_else(|| AddressError::InvalidBase(s.to_string()))?;
        let protocol: Protocol = proto.parse()?;

        let (host, port) = split_host_port(rest);
        let port = match port {
            Some(p) => parse_port(p)?,
            None => protocol
                .default_port()
                .ok_or(AddressError::MissingPort(protocol))?,
        };

        let host = match host {
            "" | "*" => None,
            h => Some(h.to_string()),
        };

        Ok(Self {
            protocol,
            host,
            port,
        })
    }
}

impl TryFrom<String> for BaseAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BaseAddress> for String {
    fn from(value: BaseAddress) -> Self {
        value.to_string()
    }
}

impl fmt::Display for BaseAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let host = self.host.as_deref().unwrap_or("*");
        write!(f, "{}:{}:{}", self.protocol, host, self.port)
    }
}

/// Forwarding side: `<host>:<port>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetAddress {
    /// Hostname or IP literal, without IPv6 brackets.
    pub host: String,
    pub port: u16,
}

impl TargetAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl FromStr for TargetAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = match split_host_port(s) {
            (h, Some(p)) if !h.is_empty() => (h, p),
            _ => return Err(AddressError::InvalidTarget(s.to_string())),
        };

        Ok(Self {
            host: strip_brackets(host).to_string(),
            port: parse_port(port)?,
        })
    }
}

impl TryFrom<String> for TargetAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TargetAddress> for String {
    fn from(value: TargetAddress) -> Self {
        value.to_string()
    }
}

impl fmt::Display for TargetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Split `host[:port]`, honouring bracketed IPv6 literals.
fn split_host_port(s: &str) -> (&str, Option<&str>) {
    if s.starts_with('[') {
        if let Some(end) = s.find(']') {
            let host = &s[..=end];
            let port = s[end + 1..].strip_prefix(':');
            return (host, port);
        }
    }
    match s.rsplit_once(':') {
        // A bare IPv6 literal without brackets has no port.
        Some((host, _)) if host.contains(':') => (s, None),
        Some((host, port)) => (host, Some(port)),
        None => (s, None),
    }
}

fn strip_brackets(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

fn parse_port(s: &str) -> Result<u16, AddressError> {
    s.trim()
        .parse()
        .map_err(|_| AddressError::InvalidPort(s.to_string()))
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Outbound connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Inbound TLS handshake timeout in seconds.
    pub tls_handshake_secs: u64,

    /// Time allowed for live sessions to finish after shutdown is requested.
    pub drain_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 20,
            tls_handshake_secs: 10,
            drain_secs: 5,
        }
    }
}

/// HTTP rewrite switches. Ignored in raw mode.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RewriteConfig {
    /// Do not append `X-Forwarded-For`.
    pub suppress_xff: bool,

    /// Do not replace the `Host` header with the target address.
    pub suppress_host_rewrite: bool,
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: PathBuf,

    /// Path to private key file (PEM).
    pub key_path: PathBuf,
}

/// Resource limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum concurrent sessions (backpressure on accept).
    pub max_connections: usize,

    /// Upper bound on bytes held from a client before the target is ready.
    pub max_pending_bytes: usize,

    /// Per-direction copy buffer once a session is established.
    pub buffer_size: usize,

    /// Desired RLIMIT_NOFILE soft limit, applied once at startup.
    pub nofile: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            max_pending_bytes: 1024 * 1024,
            buffer_size: 16 * 1024,
            nofile: 4096,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log every session's connect line at INFO.
    pub verbose: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            verbose: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
