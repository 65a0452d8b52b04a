//! HTTP awareness for `http` and `https` tunnels.
//!
//! # Data Flow
//! ```text
//! client bytes buffered by the session
//!     → rewrite.rs (header_block_complete: is the header block all here?)
//!     → rewrite.rs (rewrite_headers: Host / X-Forwarded-For, once)
//!     → written to the target, then raw relay
//! ```
//!
//! There is no request parser here: method, version and body
//! framing are never inspected.

pub mod rewrite;

pub use rewrite::{header_block_complete, rewrite_headers, HeaderRewriteContext};
