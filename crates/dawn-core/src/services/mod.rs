//! Server-core services: sessions, queueing, auth machinery, filtering.

pub mod command_filter;
pub mod csrf;
pub mod memory;
pub mod passwords;
pub mod rate_limit;
pub mod response_queue;
pub mod sessions;
pub mod text_clean;
pub mod token_map;

pub use command_filter::CommandTagFilter;
pub use csrf::{CsrfError, CsrfProtect};
pub use rate_limit::{RateLimiter, normalize_ip};
pub use response_queue::ResponseQueue;
pub use sessions::{CancelToken, Session, SessionError, SessionManager};
pub use token_map::ReconnectTokens;
