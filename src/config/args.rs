//! Command-line interface.
//!
//! Flags keep the names operators already use for this tool
//! (`--base`, `--target`, `--without-x-forwarded-for`, ...). An optional
//! TOML file supplies the starting configuration and every flag given on
//! the command line overrides it.

use std::path::PathBuf;

use clap::Parser;

use crate::config::loader::{read_config, ConfigError};
use crate::config::schema::{BaseAddress, TargetAddress, TlsConfig, TunnelConfig};
use crate::config::validation::validate_config;

#[derive(Debug, Parser)]
#[command(name = "tcp-tunnel")]
#[command(
    version,
    about = "TCP request forwarding server for tcp, ssh, http and https",
    long_about = None
)]
pub struct Args {
    /// Base server `protocol:host[:port]` (protocol: tcp, ssh, http, https; host `*` = any)
    #[arg(short = 'B', long)]
    pub base: Option<BaseAddress>,

    /// Target server `host:port`
    #[arg(short = 'T', long)]
    pub target: Option<TargetAddress>,

    /// SSL private key file (PEM)
    #[arg(long = "ssl-priv-file", value_name = "FILE")]
    pub ssl_priv_file: Option<PathBuf>,

    /// SSL certificate file (PEM)
    #[arg(long = "ssl-cert-file", value_name = "FILE")]
    pub ssl_cert_file: Option<PathBuf>,

    /// Outbound connect timeout in seconds [default: 20]
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Don't append `X-Forwarded-For` in the header
    #[arg(long = "without-x-forwarded-for")]
    pub without_x_forwarded_for: bool,

    /// Don't translate the original `Host` header
    #[arg(long = "without-host-translation")]
    pub without_host_translation: bool,

    /// Verbose: log every session
    #[arg(long = "vv")]
    pub verbose: bool,

    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Maximum concurrent sessions
    #[arg(long, value_name = "N")]
    pub max_connections: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Serve Prometheus metrics on this address
    #[arg(long, value_name = "ADDR")]
    pub metrics_address: Option<String>,
}

impl Args {
    /// Merge the optional config file with the command line and validate the result.
    pub fn into_config(self) -> Result<TunnelConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => read_config(path)?,
            None => TunnelConfig::default(),
        };

        if let Some(base) = self.base {
            config.base = Some(base);
        }
        if let Some(target) = self.target {
            config.target = Some(target);
        }
        if let Some(timeout) = self.timeout {
            config.timeouts.connect_secs = timeout;
        }
        if let Some(max) = self.max_connections {
            config.limits.max_connections = max;
        }

        match (self.ssl_cert_file, self.ssl_priv_file) {
            (Some(cert_path), Some(key_path)) => {
                config.tls = Some(TlsConfig {
                    cert_path,
                    key_path,
                });
            }
            (Some(cert_path), None) => {
                if let Some(tls) = config.tls.as_mut() {
                    tls.cert_path = cert_path;
                }
            }
            (None, Some(key_path)) => {
                if let Some(tls) = config.tls.as_mut() {
                    tls.key_path = key_path;
                }
            }
            (None, None) => {}
        }

        config.rewrite.suppress_xff |= self.without_x_forwarded_for;
        config.rewrite.suppress_host_rewrite |= self.without_host_translation;
        config.observability.verbose |= self.verbose;

        if let Some(level) = self.log_level {
            config.observability.log_level = level;
        }
        if let Some(addr) = self.metrics_address {
            config.observability.metrics_enabled = true;
            config.observability.metrics_address = addr;
        }

        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}
