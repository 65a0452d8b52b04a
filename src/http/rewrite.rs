//! Streaming HTTP header rewriting.
//!
//! Applied once per session, to the bytes a client sent before they were
//! forwarded. Two constructs are touched inside the header block:
//!
//! - any `Host:` line becomes `Host: <target-host>:<target-port>`
//! - `X-Forwarded-For: <client-ip>` is inserted right before the blank line
//!
//! Everything else, including any body or pipelined bytes after the blank
//! line, passes through byte-for-byte in its original order. No attempt is
//! made to validate the request line or understand the body.

use std::borrow::Cow;
use std::net::IpAddr;

use crate::config::schema::{RewriteConfig, TargetAddress};

/// The line terminating a header block.
const BLANK_LINE: &[u8] = b"\r\n";

/// Inputs of one rewrite invocation.
#[derive(Debug, Clone, Copy)]
pub struct HeaderRewriteContext<'a> {
    pub client_ip: IpAddr,
    pub target: &'a TargetAddress,
    pub suppress_xff: bool,
    pub suppress_host_rewrite: bool,
}

impl<'a> HeaderRewriteContext<'a> {
    pub fn new(client_ip: IpAddr, target: &'a TargetAddress, rewrite: &RewriteConfig) -> Self {
        Self {
            client_ip,
            target,
            suppress_xff: rewrite.suppress_xff,
            suppress_host_rewrite: rewrite.suppress_host_rewrite,
        }
    }

    /// True when neither construct is rewritten.
    pub fn is_identity(&self) -> bool {
        self.suppress_xff && self.suppress_host_rewrite
    }
}

/// Rewrite a buffered request chunk.
///
/// Returns the input untouched (borrowed) when both rewrites are suppressed.
pub fn rewrite_headers<'b>(buf: &'b [u8], ctx: &HeaderRewriteContext<'_>) -> Cow<'b, [u8]> {
    if ctx.is_identity() {
        return Cow::Borrowed(buf);
    }

    let mut out = Vec::with_capacity(buf.len() + 64);
    let mut in_header = true;

    for line in lines(buf) {
        if in_header && line == BLANK_LINE {
            in_header = false;
            if !ctx.suppress_xff {
                out.extend_from_slice(b"X-Forwarded-For: ");
                out.extend_from_slice(ctx.client_ip.to_string().as_bytes());
                out.extend_from_slice(BLANK_LINE);
            }
        } else if in_header && !ctx.suppress_host_rewrite && is_host_line(line) {
            out.extend_from_slice(format!("Host: {}\r\n", ctx.target).as_bytes());
            continue;
        }
        out.extend_from_slice(line);
    }

    Cow::Owned(out)
}

/// Whether `buf` already holds a complete header block.
///
/// A bare `\n` blank line also ends the block so LF-only clients are not
/// held back, although the rewrite itself only recognises `\r\n`.
pub fn header_block_complete(buf: &[u8]) -> bool {
    lines(buf).any(|line| line == BLANK_LINE || line == b"\n")
}

/// Split on `\n`, keeping terminators. A trailing unterminated segment is
/// yielded as the last line.
fn lines(buf: &[u8]) -> impl Iterator<Item = &[u8]> {
    buf.split_inclusive(|&b| b == b'\n')
}

fn is_host_line(line: &[u8]) -> bool {
    match line.iter().position(|&b| b == b':') {
        Some(colon) => line[..colon].eq_ignore_ascii_case(b"host"),
        None => false,
    }
}
