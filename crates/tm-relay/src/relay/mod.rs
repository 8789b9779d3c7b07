//! Relay core: upstream dispatch and end-to-end orchestration.

pub mod engine;
pub mod upstream;

use uuid::Uuid;

/// Header attached to every forwarded request and client response, linking
/// the two sides of one relay operation in logs.
pub const CORRELATION_HEADER: &str = "x-relay-request-id";

/// Generate a new correlation ID (UUID v4).
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}
