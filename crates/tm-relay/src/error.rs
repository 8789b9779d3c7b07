//! Relay error taxonomy.

use thiserror::Error;

/// Errors produced while relaying a single inbound request.
///
/// Routing failures are resolved locally and never contact the upstream.
/// The upstream variants classify transport-level failures only; an
/// upstream application error (any non-2xx status with well-formed framing)
/// is not an error here and passes through verbatim.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Inbound path does not start with the configured prefix at a path
    /// segment boundary.
    #[error("path does not match the relay prefix")]
    PrefixMismatch,

    /// The upstream could not be reached at all (DNS, connect, TLS).
    #[error("upstream unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),

    /// The connect + header-receipt deadline elapsed, or the per-chunk idle
    /// deadline elapsed while waiting for more body bytes.
    #[error("upstream timed out")]
    TimedOut,

    /// The upstream produced malformed response framing.
    #[error("upstream protocol error: {0}")]
    Protocol(#[source] reqwest::Error),
}
