//! Span builder helpers for tm-relay instrumentation.

/// Create a tracing span for one end-to-end relay operation.
///
/// Usage: `let span = relay_request_span!(&correlation_id, method, path);`
///
/// Fields recorded later, once known:
/// - `status`: status code returned to the client
/// - `latency_ms`: milliseconds from accept to response head
/// - `ttfb_ms`: milliseconds from upstream dispatch to first body chunk
/// - `total_duration_ms`: milliseconds from upstream dispatch to stream end
#[macro_export]
macro_rules! relay_request_span {
    ($correlation_id:expr, $method:expr, $path:expr) => {
        tracing::info_span!(
            "relay_request",
            correlation_id = %$correlation_id,
            method = %$method,
            path = %$path,
            status = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
            ttfb_ms = tracing::field::Empty,
            total_duration_ms = tracing::field::Empty,
        )
    };
}

/// Create a tracing span for one upstream dispatch.
#[macro_export]
macro_rules! upstream_dispatch_span {
    ($correlation_id:expr, $host:expr) => {
        tracing::info_span!(
            "upstream_dispatch",
            correlation_id = %$correlation_id,
            upstream_host = %$host,
            status = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    };
}
