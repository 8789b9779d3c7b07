//! tm-relay: streaming relay that forwards requests under a local path
//! prefix to a configurable upstream, passing responses back verbatim.

pub mod config;
pub mod error;
pub mod relay;
pub mod router;
pub mod server;
pub mod stats;
