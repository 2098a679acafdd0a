//! Core domain model, ports, and services for the dawn voice assistant.
//!
//! This crate is transport-agnostic: it knows nothing about axum, sockets,
//! or TLS. The web adapter (`dawn-web`) wires concrete infrastructure to the
//! ports defined here and drives the services from its handlers and workers.

pub mod domain;
pub mod ports;
pub mod services;
pub mod settings;

// Re-export commonly used types for convenience
pub use domain::{
    AudioCodec, ChatMessage, Envelope, LlmConfig, LlmProvider, MessageRole, SatelliteIdentity,
    ServerState, SessionKind, TokenUsage,
};
pub use ports::{
    AsrEngine, AudioDecoder, AuditEvent, AuthSession, AuthStore, AuthStoreError, AuthUser,
    CommandBus, CommandBusError, Conversation, ConversationStore, ConversationStoreError,
    LlmClient, LlmError, LlmReply, NewAuthSession, Page, PendingReply, StoredMessage, TtsEngine,
    VoiceError,
};
pub use services::{
    CommandTagFilter, CsrfError, CsrfProtect, RateLimiter, ReconnectTokens, ResponseQueue,
    Session, SessionError, SessionManager, normalize_ip,
};
pub use settings::{RuntimeSettings, SecretStatus, SettingsError, SettingsSnapshot};

// Silence unused dev-dependency warnings until we add mock-based tests
#[cfg(test)]
use mockall as _;
#[cfg(test)]
use tokio_test as _;
