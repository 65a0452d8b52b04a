//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde and address parsing handle syntax)
//! - Check that TLS material accompanies an `https` base
//! - Validate value ranges (timeouts > 0, ports valid, limits non-zero)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: TunnelConfig → Result<(), Vec<ValidationError>>
//! - Runs before any listener binds

use crate::config::schema::TunnelConfig;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("`base` must be given")]
    MissingBase,

    #[error("`target` must be given")]
    MissingTarget,

    #[error("target host must not be empty")]
    EmptyTargetHost,

    #[error("target port must not be 0")]
    ZeroTargetPort,

    #[error("for `https`, `ssl-priv-file` and `ssl-cert-file` must be given")]
    MissingTlsMaterial,

    #[error("{0} must be greater than 0")]
    Zero(&'static str),
}

/// Validate a fully merged configuration.
pub fn validate_config(config: &TunnelConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    match &config.base {
        Some(base) => {
            if base.protocol.requires_tls() && config.tls.is_none() {
                errors.push(ValidationError::MissingTlsMaterial);
            }
        }
        None => errors.push(ValidationError::MissingBase),
    }

    match &config.target {
        Some(target) => {
            if target.host.trim().is_empty() {
                errors.push(ValidationError::EmptyTargetHost);
            }
            if target.port == 0 {
                errors.push(ValidationError::ZeroTargetPort);
            }
        }
        None => errors.push(ValidationError::MissingTarget),
    }

    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::Zero("timeout"));
    }
    if config.timeouts.tls_handshake_secs == 0 {
        errors.push(ValidationError::Zero("tls_handshake_secs"));
    }
    if config.limits.max_connections == 0 {
        errors.push(ValidationError::Zero("max_connections"));
    }
    if config.limits.max_pending_bytes == 0 {
        errors.push(ValidationError::Zero("max_pending_bytes"));
    }
    if config.limits.buffer_size == 0 {
        errors.push(ValidationError::Zero("buffer_size"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
