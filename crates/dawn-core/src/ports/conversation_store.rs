//! Conversation store port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::chat::MessageRole;

#[derive(Debug, Error)]
pub enum ConversationStoreError {
    #[error("conversation not found: {0}")]
    NotFound(u64),

    #[error("storage error: {0}")]
    Storage(String),
}

/// A persisted conversation, owned by one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: u64,
    pub user_id: u64,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A persisted message within a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: u64,
    pub conversation_id: u64,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// One page of a paginated listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub offset: usize,
}

/// Port for conversation persistence.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create(&self, user_id: u64, title: String) -> Result<u64, ConversationStoreError>;

    /// List a user's conversations, most recently updated first.
    async fn list(
        &self,
        user_id: u64,
        offset: usize,
        limit: usize,
    ) -> Result<Page<Conversation>, ConversationStoreError>;

    async fn get(
        &self,
        id: u64,
    ) -> Result<(Conversation, Vec<StoredMessage>), ConversationStoreError>;

    async fn add_message(
        &self,
        id: u64,
        role: MessageRole,
        content: String,
    ) -> Result<u64, ConversationStoreError>;

    async fn rename(&self, id: u64, title: String) -> Result<(), ConversationStoreError>;

    async fn delete(&self, id: u64) -> Result<(), ConversationStoreError>;

    /// Case-insensitive content search over a user's conversations.
    async fn search(
        &self,
        user_id: u64,
        query: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Page<Conversation>, ConversationStoreError>;
}
