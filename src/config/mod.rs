//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! command line (args.rs) ──┐
//! config file (loader.rs) ─┴→ merged TunnelConfig
//!     → validation.rs (semantic checks)
//!     → TunnelConfig (validated, immutable)
//!     → shared via Arc with the listener and every session
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde, FromStr) from semantic checks

pub mod args;
pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::ConfigError;
pub use schema::{
    BaseAddress, LimitsConfig, Mode, ObservabilityConfig, Protocol, RewriteConfig,
    TargetAddress, TimeoutConfig, TlsConfig, TunnelConfig,
};
