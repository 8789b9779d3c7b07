//! Inbound listener: axum router, outcome translation, graceful shutdown.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::Instrument;

use crate::config::RelayConfig;
use crate::relay::engine::{RelayEngine, RelayOutcome};
use crate::relay::{generate_correlation_id, CORRELATION_HEADER};
use crate::router;
use crate::stats::RelayStats;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub engine: RelayEngine,
    pub stats: RelayStats,
}

/// Build the relay router. Every path not claimed by an explicit route is
/// handed to the engine, any method.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/api/stats", get(handle_get_stats))
        .fallback(handle_relay)
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

/// Bind the listen address and serve until a termination signal, then let
/// in-flight requests drain for up to the configured grace period.
pub async fn run(state: AppState) -> anyhow::Result<()> {
    let listen_addr = state.config.server.listen_address.clone();
    let grace = Duration::from_secs(state.config.server.shutdown_grace_secs);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "tm-relay listening");

    let draining = Arc::new(tokio::sync::Notify::new());
    let notify = draining.clone();

    let server = axum::serve(listener, app(state)).with_graceful_shutdown(async move {
        shutdown_signal().await;
        notify.notify_waiters();
    });
    let mut server = std::pin::pin!(server.into_future());

    tokio::select! {
        result = &mut server => result?,
        _ = async {
            draining.notified().await;
            tokio::time::sleep(grace).await;
        } => {
            tracing::warn!(
                grace_secs = grace.as_secs(),
                "drain grace period elapsed, abandoning in-flight requests"
            );
        }
    }

    tracing::info!("tm-relay shut down");
    Ok(())
}

/// Relay handler: one correlation ID and one engine call per request.
async fn handle_relay(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let correlation_id = generate_correlation_id();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let span = tm_tracing::relay_request_span!(&correlation_id, &method, &path);
    let start = std::time::Instant::now();

    async {
        let outcome = state.engine.relay(request, &correlation_id).await;
        let response = into_client_response(outcome, &correlation_id);

        let current = tracing::Span::current();
        current.record("status", response.status().as_u16());
        current.record("latency_ms", start.elapsed().as_millis() as u64);
        response
    }
    .instrument(span)
    .await
}

/// Translate the engine's outcome into the concrete client response.
///
/// Success streams the upstream status, headers (minus hop-by-hop), and body
/// verbatim. Relay-originated failures get a distinct status class and a
/// small JSON diagnostic so callers can apply their own retry policy.
fn into_client_response(outcome: RelayOutcome, correlation_id: &str) -> Response {
    let response = match outcome {
        RelayOutcome::Success {
            status,
            headers,
            body,
        } => {
            let mut builder = Response::builder().status(status);
            for (name, value) in headers.iter() {
                if router::is_hop_by_hop(name.as_str()) {
                    continue;
                }
                builder = builder.header(name, value);
            }
            builder
                .body(Body::from_stream(body))
                .unwrap_or_else(|e| {
                    tracing::error!(error = %e, "failed to assemble client response");
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
                })
        }
        RelayOutcome::PrefixMismatch => {
            diagnostic(StatusCode::NOT_FOUND, "path does not match the relay prefix")
        }
        RelayOutcome::UpstreamUnreachable { .. } => {
            diagnostic(StatusCode::BAD_GATEWAY, "upstream unreachable")
        }
        RelayOutcome::UpstreamTimeout => diagnostic(StatusCode::GATEWAY_TIMEOUT, "upstream timeout"),
        RelayOutcome::UpstreamProtocolError { .. } => {
            diagnostic(StatusCode::BAD_GATEWAY, "upstream protocol error")
        }
        // The connection is already gone; the status is only visible in logs
        // and stats. 499 per the nginx convention.
        RelayOutcome::ClientDisconnected => StatusCode::from_u16(499)
            .unwrap_or(StatusCode::BAD_REQUEST)
            .into_response(),
    };

    with_correlation(response, correlation_id)
}

fn diagnostic(status: StatusCode, message: &str) -> Response {
    (status, axum::Json(serde_json::json!({ "error": message }))).into_response()
}

fn with_correlation(mut response: Response, correlation_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(correlation_id) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}

/// Health check endpoint; answered locally, the upstream is never involved.
async fn handle_health() -> impl IntoResponse {
    axum::Json(serde_json::json!({ "ok": true }))
}

/// GET /api/stats — return current relay statistics.
async fn handle_get_stats(State(state): State<Arc<AppState>>) -> Response {
    axum::Json(state.stats.snapshot()).into_response()
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C signal handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received, draining in-flight requests");
}
