//! Ports: contracts the server core expects its environment to implement.
//!
//! Concrete implementations are injected at the composition root in
//! `dawn-web::bootstrap`. In-memory reference implementations live in
//! [`crate::services::memory`] and back the default CLI wiring and the
//! test suites.

pub mod audio;
pub mod auth_store;
pub mod command_bus;
pub mod conversation_store;
pub mod llm_client;

pub use audio::{AsrEngine, AudioDecoder, TtsEngine, VoiceError};
pub use auth_store::{
    AuditEvent, AuthSession, AuthStore, AuthStoreError, AuthUser, NewAuthSession, NewUser,
};
pub use command_bus::{CommandBus, CommandBusError, PendingReply};
pub use conversation_store::{
    Conversation, ConversationStore, ConversationStoreError, Page, StoredMessage,
};
pub use llm_client::{ChatRequest, LlmClient, LlmError, LlmReply};
