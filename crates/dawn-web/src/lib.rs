//! Axum web adapter for the dawn voice assistant.
//!
//! Everything client-facing lives here: the HTTP gateway (static files,
//! auth endpoints, health), the WebSocket protocol, the outbound dispatcher
//! that owns all socket writes, and the worker pipelines that talk to the
//! LLM and tool subsystems through the `dawn-core` ports.

pub mod bootstrap;
pub mod error;
pub mod extract;
pub mod gateway;
pub mod loopback;
pub mod outbound;
pub mod routes;
pub mod state;
pub mod tls;
pub mod workers;
pub mod ws;

pub use bootstrap::{GatewayConfig, ServerContext, TlsPaths, bootstrap};
pub use routes::create_router;
pub use state::AppState;

// Silence unused dev-dependency warnings until we add mock-based tests
#[cfg(test)]
use tokio_test as _;
