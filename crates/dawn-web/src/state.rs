//! Shared application state type.
//!
//! Defines the `AppState` type used across all handlers and routers.

use crate::bootstrap::ServerContext;
use std::sync::Arc;

/// Application state shared across all handlers.
///
/// This is an Arc-wrapped [`ServerContext`] owning the session manager, the
/// response queue, the auth machinery, and the injected port
/// implementations.
pub type AppState = Arc<ServerContext>;
