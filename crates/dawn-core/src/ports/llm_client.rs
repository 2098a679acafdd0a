//! Language-model client port.
//!
//! The backend streams tokens through an `mpsc` sender as they arrive and
//! returns the full response (plus usage) on completion. Callers decide what
//! to do with the deltas; a worker that has been cancelled simply drops the
//! receiving end and ignores the eventual return value.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::chat::ChatMessage;
use crate::domain::llm::{LlmConfig, LlmProvider, TokenUsage};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend timed out")]
    Timeout,

    #[error("malformed backend response: {0}")]
    Malformed(String),
}

/// One chat completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub config: LlmConfig,
}

/// The completed reply for one request.
#[derive(Debug, Clone)]
pub struct LlmReply {
    pub text: String,
    pub usage: TokenUsage,
}

/// Port for streaming chat completion backends.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Run one completion, pushing token deltas into `deltas` as they
    /// arrive. A closed receiver is not an error: the backend keeps
    /// generating and the full text is still returned.
    async fn chat_stream(
        &self,
        request: ChatRequest,
        deltas: mpsc::Sender<String>,
    ) -> Result<LlmReply, LlmError>;

    /// Models available from one provider.
    async fn list_models(&self, provider: LlmProvider) -> Result<Vec<String>, LlmError>;
}
