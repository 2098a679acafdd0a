//! Domain types shared across the server core.

pub mod chat;
pub mod envelope;
pub mod llm;
pub mod session;

pub use chat::{ChatMessage, MessageRole};
pub use envelope::{AudioCodec, Envelope, ServerState};
pub use llm::{LlmConfig, LlmProvider, TokenUsage};
pub use session::{SatelliteIdentity, SatelliteTier, SessionKind};
