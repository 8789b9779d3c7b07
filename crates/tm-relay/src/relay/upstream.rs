//! Outbound dispatch to the upstream endpoint.
//!
//! Wraps a shared `reqwest::Client` whose pool reuses connections per
//! scheme+host, bounded by `max_idle_per_host`. Two deadlines bound every
//! dispatch: a connect + header-receipt deadline around `send()`, and a
//! per-chunk idle deadline on the returned body stream, so a slow but live
//! stream is never killed by the original deadline. Connections that fail
//! mid-request are discarded by the pool, not reused.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_core::Stream;
use http::{HeaderMap, StatusCode};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep, Instant, Sleep};

use crate::config::UpstreamConfig;
use crate::error::RelayError;
use crate::router::UpstreamRequest;
use crate::stats::RelayStats;

/// Upstream response head plus the lazily-consumed body.
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: UpstreamBody,
}

/// Client for the configured upstream. Cheap to clone.
#[derive(Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    in_flight: Arc<Semaphore>,
    request_timeout: Duration,
    idle_read_timeout: Duration,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(config.max_idle_per_host)
            .build()?;

        Ok(Self {
            client,
            in_flight: Arc::new(Semaphore::new(config.max_in_flight)),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            idle_read_timeout: Duration::from_secs(config.idle_read_timeout_secs),
        })
    }

    /// Send one forwarded request and return the response head as soon as it
    /// arrives; the body stays lazy.
    ///
    /// The request deadline covers the wait for an in-flight slot, connect,
    /// request write (including streaming the inbound body), and
    /// response-header receipt. The returned body enforces its own idle
    /// deadline per chunk and holds the in-flight slot until it is fully
    /// consumed or dropped.
    pub async fn dispatch(
        &self,
        request: UpstreamRequest,
        body: Option<reqwest::Body>,
        root_span: tracing::Span,
        stats: RelayStats,
    ) -> Result<UpstreamResponse, RelayError> {
        let deadline = Instant::now() + self.request_timeout;

        // acquire_owned only fails if the semaphore is closed, which never
        // happens; treat both paths as the slot not arriving in time.
        let permit =
            match tokio::time::timeout_at(deadline, self.in_flight.clone().acquire_owned()).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) | Err(_) => return Err(RelayError::TimedOut),
            };

        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let start = std::time::Instant::now();
        let response = match tokio::time::timeout_at(deadline, builder.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(classify(e)),
            Err(_) => return Err(RelayError::TimedOut),
        };

        let status = response.status();
        let current = tracing::Span::current();
        current.record("status", status.as_u16());
        current.record("latency_ms", start.elapsed().as_millis() as u64);

        let headers = response.headers().clone();
        let body = UpstreamBody {
            inner: Box::pin(response.bytes_stream()),
            idle: self.idle_read_timeout,
            deadline: Box::pin(sleep(self.idle_read_timeout)),
            finished: false,
            first_chunk_seen: false,
            bytes_relayed: 0,
            start,
            span: root_span,
            stats,
            _permit: permit,
        };

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}

/// Map a reqwest transport error onto the relay taxonomy.
fn classify(e: reqwest::Error) -> RelayError {
    if e.is_timeout() {
        RelayError::TimedOut
    } else if e.is_connect() {
        RelayError::Unreachable(e)
    } else {
        RelayError::Protocol(e)
    }
}

/// Lazily-produced sequence of upstream body chunks.
///
/// Chunks pass through unchanged and in arrival order; each poll that ends
/// `Pending` is raced against a resettable idle deadline. Records timing on
/// the held relay span:
/// - `ttfb_ms`: milliseconds from dispatch to first chunk
/// - `total_duration_ms`: milliseconds from dispatch to stream end
///
/// Holds the in-flight permit for its whole life. Dropping mid-stream aborts
/// the upstream read and releases the connection and the permit.
pub struct UpstreamBody {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    idle: Duration,
    deadline: Pin<Box<Sleep>>,
    finished: bool,
    first_chunk_seen: bool,
    bytes_relayed: u64,
    start: std::time::Instant,
    span: tracing::Span,
    stats: RelayStats,
    _permit: OwnedSemaphorePermit,
}

impl Stream for UpstreamBody {
    type Item = Result<Bytes, RelayError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if !self.first_chunk_seen {
                    self.first_chunk_seen = true;
                    self.span
                        .record("ttfb_ms", self.start.elapsed().as_millis() as u64);
                }
                self.bytes_relayed += chunk.len() as u64;
                let next = Instant::now() + self.idle;
                self.deadline.as_mut().reset(next);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                self.finished = true;
                Poll::Ready(Some(Err(classify(e))))
            }
            Poll::Ready(None) => {
                self.finished = true;
                self.span
                    .record("total_duration_ms", self.start.elapsed().as_millis() as u64);
                Poll::Ready(None)
            }
            Poll::Pending => {
                if self.deadline.as_mut().poll(cx).is_ready() {
                    self.finished = true;
                    tracing::warn!(
                        idle_secs = self.idle.as_secs(),
                        "idle deadline elapsed waiting for upstream body chunk"
                    );
                    return Poll::Ready(Some(Err(RelayError::TimedOut)));
                }
                Poll::Pending
            }
        }
    }
}

impl Drop for UpstreamBody {
    fn drop(&mut self) {
        self.stats.add_relayed_bytes(self.bytes_relayed);
        if !self.finished {
            tracing::debug!("upstream body dropped before completion, aborting upstream read");
        }
    }
}
