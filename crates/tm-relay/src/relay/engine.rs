//! End-to-end orchestration of one relay operation.
//!
//! The engine owns the mapping from one inbound request to exactly one
//! [`RelayOutcome`]: validate the prefix, build the upstream descriptor,
//! dispatch, and hand back the lazy body. No retries — the relay cannot know
//! whether a forwarded operation is idempotent, so retry policy belongs to
//! the caller.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::{Body, BodyDataStream, HttpBody};
use axum::extract::Request;
use bytes::Bytes;
use futures_core::Stream;
use http::{HeaderMap, HeaderValue, StatusCode};
use tracing::Instrument;

use super::upstream::{UpstreamBody, UpstreamClient};
use super::CORRELATION_HEADER;
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::router;
use crate::stats::RelayStats;

/// Terminal result of one relay operation. Exactly one per inbound request.
pub enum RelayOutcome {
    /// Upstream produced a response head; status, headers, and body pass
    /// through verbatim (including non-2xx statuses).
    Success {
        status: StatusCode,
        headers: HeaderMap,
        body: UpstreamBody,
    },
    /// Path outside the configured prefix; the upstream was never contacted.
    PrefixMismatch,
    /// Could not reach the upstream at all.
    UpstreamUnreachable { detail: String },
    /// A relay deadline elapsed before the upstream produced headers.
    UpstreamTimeout,
    /// The upstream violated HTTP framing.
    UpstreamProtocolError { detail: String },
    /// The inbound connection went away mid-operation; nothing left to send.
    ClientDisconnected,
}

/// Single orchestration point for forwarding operations.
#[derive(Clone)]
pub struct RelayEngine {
    config: Arc<RelayConfig>,
    upstream: UpstreamClient,
    stats: RelayStats,
}

impl RelayEngine {
    pub fn new(config: Arc<RelayConfig>, upstream: UpstreamClient, stats: RelayStats) -> Self {
        Self {
            config,
            upstream,
            stats,
        }
    }

    /// Relay one inbound request.
    ///
    /// Must be called inside the per-request relay span — streaming timing
    /// fields are recorded on `tracing::Span::current()` as the body drains.
    pub async fn relay(&self, request: Request, correlation_id: &str) -> RelayOutcome {
        self.stats.inc_requests();

        let (parts, body) = request.into_parts();

        let mut descriptor = match router::resolve(
            &parts.method,
            &parts.uri,
            &parts.headers,
            &self.config.upstream.base_url,
            &self.config.relay.path_prefix,
            self.config.relay.strip_authorization,
        ) {
            Ok(descriptor) => descriptor,
            Err(_) => {
                self.stats.inc_rejected();
                tracing::debug!(path = %parts.uri.path(), "path outside relay prefix, rejecting");
                return RelayOutcome::PrefixMismatch;
            }
        };

        descriptor.headers.insert(
            CORRELATION_HEADER,
            HeaderValue::from_str(correlation_id)
                .unwrap_or_else(|_| HeaderValue::from_static("unknown")),
        );

        let disconnected = Arc::new(AtomicBool::new(false));
        let body = inbound_body(body, disconnected.clone());

        let root_span = tracing::Span::current();
        let host = host_of(&descriptor.url);
        let span = tm_tracing::upstream_dispatch_span!(correlation_id, host);

        let result = self
            .upstream
            .dispatch(descriptor, body, root_span, self.stats.clone())
            .instrument(span)
            .await;

        match result {
            Ok(response) => {
                self.stats.inc_relayed();
                tracing::info!(
                    status = response.status.as_u16(),
                    "upstream response head received, streaming body"
                );
                RelayOutcome::Success {
                    status: response.status,
                    headers: response.headers,
                    body: response.body,
                }
            }
            Err(e) => {
                // An aborted upload surfaces as a reqwest body error; report
                // it as the client going away, not as an upstream failure.
                if disconnected.load(Ordering::Relaxed) {
                    tracing::debug!("client disconnected while streaming request body");
                    return RelayOutcome::ClientDisconnected;
                }
                self.stats.inc_upstream_failures();
                match e {
                    RelayError::TimedOut => {
                        tracing::warn!("upstream dispatch timed out");
                        RelayOutcome::UpstreamTimeout
                    }
                    RelayError::Unreachable(e) => {
                        tracing::error!(error = %e, "upstream unreachable");
                        RelayOutcome::UpstreamUnreachable {
                            detail: e.to_string(),
                        }
                    }
                    RelayError::Protocol(e) => {
                        tracing::error!(error = %e, "upstream protocol error");
                        RelayOutcome::UpstreamProtocolError {
                            detail: e.to_string(),
                        }
                    }
                    RelayError::PrefixMismatch => RelayOutcome::PrefixMismatch,
                }
            }
        }
    }
}

/// Build the forwarded request body, streaming the inbound bytes through
/// without buffering. Returns `None` for bodyless requests so the upstream
/// sees a plain request instead of an empty chunked stream.
///
/// Presence is decided by the body itself, not framing headers: an HTTP/2
/// request streams its body without `content-length` or `transfer-encoding`.
fn inbound_body(body: Body, disconnected: Arc<AtomicBool>) -> Option<reqwest::Body> {
    if body.is_end_stream() {
        return None;
    }

    Some(reqwest::Body::wrap_stream(WatchedBody {
        inner: body.into_data_stream(),
        disconnected,
    }))
}

/// Inbound body pass-through that flags stream failures, so an aborted
/// upload can be told apart from an upstream transport error.
struct WatchedBody {
    inner: BodyDataStream,
    disconnected: Arc<AtomicBool>,
}

impl Stream for WatchedBody {
    type Item = Result<Bytes, axum::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Err(e))) => {
                self.disconnected.store(true, Ordering::Relaxed);
                Poll::Ready(Some(Err(e)))
            }
            other => other,
        }
    }
}

fn host_of(url: &str) -> &str {
    url.trim_start_matches("https://")
        .trim_start_matches("http://")
        .split('/')
        .next()
        .unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("https://example.test/v1/tools"), "example.test");
        assert_eq!(host_of("http://127.0.0.1:9000/x"), "127.0.0.1:9000");
        assert_eq!(host_of("https://example.test"), "example.test");
    }
}
