//! In-memory reference implementations of the external-store ports.
//!
//! These back the default CLI wiring and the test suites. They implement
//! the full port contracts (expiry, failure counters, lockouts, pagination,
//! reply rendezvous) but persist nothing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::oneshot;
use tracing::debug;

use crate::domain::chat::MessageRole;
use crate::ports::auth_store::{
    AuditEvent, AuthSession, AuthStore, AuthStoreError, AuthUser, NewAuthSession, NewUser,
};
use crate::ports::command_bus::{CommandBus, CommandBusError, PendingReply};
use crate::ports::conversation_store::{
    Conversation, ConversationStore, ConversationStoreError, Page, StoredMessage,
};

/// Server-side auth-session lifetime.
const AUTH_SESSION_TTL_HOURS: i64 = 24;

#[derive(Default)]
struct AuthInner {
    users: HashMap<String, AuthUser>,
    sessions: HashMap<String, AuthSession>,
    failures: HashMap<String, u32>,
    lockouts: HashMap<String, DateTime<Utc>>,
    audit: Vec<AuditEvent>,
}

/// In-memory [`AuthStore`].
pub struct MemoryAuthStore {
    inner: Mutex<AuthInner>,
    next_user_id: AtomicU64,
}

impl MemoryAuthStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(AuthInner::default()),
            next_user_id: AtomicU64::new(1),
        }
    }

    /// Recorded audit events (test hook).
    #[must_use]
    pub fn audit_log(&self) -> Vec<AuditEvent> {
        self.inner.lock().unwrap().audit.clone()
    }
}

impl Default for MemoryAuthStore {
    fn default() -> Self {
        Self::new()
    }
}

fn session_expired(session: &AuthSession) -> bool {
    Utc::now() - session.created_at > ChronoDuration::hours(AUTH_SESSION_TTL_HOURS)
}

#[async_trait]
impl AuthStore for MemoryAuthStore {
    async fn get_user(&self, username: &str) -> Result<Option<AuthUser>, AuthStoreError> {
        Ok(self.inner.lock().unwrap().users.get(username).cloned())
    }

    async fn list_users(&self) -> Result<Vec<AuthUser>, AuthStoreError> {
        let mut users: Vec<AuthUser> =
            self.inner.lock().unwrap().users.values().cloned().collect();
        users.sort_by_key(|u| u.id);
        Ok(users)
    }

    async fn create_user(&self, user: NewUser) -> Result<u64, AuthStoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.users.contains_key(&user.username) {
            return Err(AuthStoreError::UserExists(user.username));
        }
        let id = self.next_user_id.fetch_add(1, Ordering::Relaxed);
        inner.users.insert(
            user.username.clone(),
            AuthUser {
                id,
                username: user.username,
                password_hash: user.password_hash,
                is_admin: user.is_admin,
                locked: false,
            },
        );
        Ok(id)
    }

    async fn delete_user(&self, username: &str) -> Result<(), AuthStoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.users.remove(username).is_none() {
            return Err(AuthStoreError::UserNotFound(username.to_string()));
        }
        inner.sessions.retain(|_, s| s.username != username);
        Ok(())
    }

    async fn set_password_hash(&self, username: &str, hash: String) -> Result<(), AuthStoreError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.users.get_mut(username) {
            Some(user) => {
                user.password_hash = hash;
                Ok(())
            }
            None => Err(AuthStoreError::UserNotFound(username.to_string())),
        }
    }

    async fn set_locked(&self, username: &str, locked: bool) -> Result<(), AuthStoreError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.users.get_mut(username) {
            Some(user) => {
                user.locked = locked;
                Ok(())
            }
            None => Err(AuthStoreError::UserNotFound(username.to_string())),
        }
    }

    async fn create_session(&self, session: NewAuthSession) -> Result<(), AuthStoreError> {
        let now = Utc::now();
        self.inner.lock().unwrap().sessions.insert(
            session.token.clone(),
            AuthSession {
                token: session.token,
                user_id: session.user_id,
                username: session.username,
                is_admin: session.is_admin,
                issued_ip: session.issued_ip,
                user_agent: session.user_agent,
                created_at: now,
                last_activity: now,
            },
        );
        Ok(())
    }

    async fn get_session(&self, token: &str) -> Result<Option<AuthSession>, AuthStoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .sessions
            .get(token)
            .filter(|s| !session_expired(s))
            .cloned())
    }

    async fn delete_session(&self, token: &str) -> Result<(), AuthStoreError> {
        self.inner.lock().unwrap().sessions.remove(token);
        Ok(())
    }

    async fn list_sessions(&self, user_id: u64) -> Result<Vec<AuthSession>, AuthStoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .sessions
            .values()
            .filter(|s| s.user_id == user_id && !session_expired(s))
            .cloned()
            .collect())
    }

    async fn touch_session(&self, token: &str) -> Result<(), AuthStoreError> {
        if let Some(session) = self.inner.lock().unwrap().sessions.get_mut(token) {
            session.last_activity = Utc::now();
        }
        Ok(())
    }

    async fn failure_count(&self, username: &str) -> Result<u32, AuthStoreError> {
        Ok(*self
            .inner
            .lock()
            .unwrap()
            .failures
            .get(username)
            .unwrap_or(&0))
    }

    async fn record_failure(&self, username: &str) -> Result<u32, AuthStoreError> {
        let mut inner = self.inner.lock().unwrap();
        let count = inner.failures.entry(username.to_string()).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn clear_failures(&self, username: &str) -> Result<(), AuthStoreError> {
        self.inner.lock().unwrap().failures.remove(username);
        Ok(())
    }

    async fn lockout_until(
        &self,
        username: &str,
    ) -> Result<Option<DateTime<Utc>>, AuthStoreError> {
        Ok(self.inner.lock().unwrap().lockouts.get(username).copied())
    }

    async fn set_lockout(
        &self,
        username: &str,
        until: DateTime<Utc>,
    ) -> Result<(), AuthStoreError> {
        self.inner
            .lock()
            .unwrap()
            .lockouts
            .insert(username.to_string(), until);
        Ok(())
    }

    async fn clear_lockout(&self, username: &str) -> Result<(), AuthStoreError> {
        self.inner.lock().unwrap().lockouts.remove(username);
        Ok(())
    }

    async fn record_audit_event(&self, event: AuditEvent) -> Result<(), AuthStoreError> {
        self.inner.lock().unwrap().audit.push(event);
        Ok(())
    }
}

// ── Conversations ─────────────────────────────────────────────────────────

#[derive(Default)]
struct ConvInner {
    conversations: HashMap<u64, Conversation>,
    messages: HashMap<u64, Vec<StoredMessage>>,
}

/// In-memory [`ConversationStore`].
pub struct MemoryConversationStore {
    inner: Mutex<ConvInner>,
    next_conv_id: AtomicU64,
    next_msg_id: AtomicU64,
}

impl MemoryConversationStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ConvInner::default()),
            next_conv_id: AtomicU64::new(1),
            next_msg_id: AtomicU64::new(1),
        }
    }
}

impl Default for MemoryConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

fn paginate(mut all: Vec<Conversation>, offset: usize, limit: usize) -> Page<Conversation> {
    all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    let total = all.len();
    let items = all.into_iter().skip(offset).take(limit).collect();
    Page {
        items,
        total,
        offset,
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn create(&self, user_id: u64, title: String) -> Result<u64, ConversationStoreError> {
        let id = self.next_conv_id.fetch_add(1, Ordering::Relaxed);
        let now = Utc::now();
        let mut inner = self.inner.lock().unwrap();
        inner.conversations.insert(
            id,
            Conversation {
                id,
                user_id,
                title,
                created_at: now,
                updated_at: now,
            },
        );
        inner.messages.insert(id, Vec::new());
        Ok(id)
    }

    async fn list(
        &self,
        user_id: u64,
        offset: usize,
        limit: usize,
    ) -> Result<Page<Conversation>, ConversationStoreError> {
        let inner = self.inner.lock().unwrap();
        let all: Vec<Conversation> = inner
            .conversations
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        Ok(paginate(all, offset, limit))
    }

    async fn get(
        &self,
        id: u64,
    ) -> Result<(Conversation, Vec<StoredMessage>), ConversationStoreError> {
        let inner = self.inner.lock().unwrap();
        let conv = inner
            .conversations
            .get(&id)
            .cloned()
            .ok_or(ConversationStoreError::NotFound(id))?;
        let messages = inner.messages.get(&id).cloned().unwrap_or_default();
        Ok((conv, messages))
    }

    async fn add_message(
        &self,
        id: u64,
        role: MessageRole,
        content: String,
    ) -> Result<u64, ConversationStoreError> {
        let mut inner = self.inner.lock().unwrap();
        let conv = inner
            .conversations
            .get_mut(&id)
            .ok_or(ConversationStoreError::NotFound(id))?;
        conv.updated_at = Utc::now();
        let msg_id = self.next_msg_id.fetch_add(1, Ordering::Relaxed);
        inner.messages.entry(id).or_default().push(StoredMessage {
            id: msg_id,
            conversation_id: id,
            role,
            content,
            created_at: Utc::now(),
        });
        Ok(msg_id)
    }

    async fn rename(&self, id: u64, title: String) -> Result<(), ConversationStoreError> {
        let mut inner = self.inner.lock().unwrap();
        let conv = inner
            .conversations
            .get_mut(&id)
            .ok_or(ConversationStoreError::NotFound(id))?;
        conv.title = title;
        conv.updated_at = Utc::now();
        Ok(())
    }

    async fn delete(&self, id: u64) -> Result<(), ConversationStoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.conversations.remove(&id).is_none() {
            return Err(ConversationStoreError::NotFound(id));
        }
        inner.messages.remove(&id);
        Ok(())
    }

    async fn search(
        &self,
        user_id: u64,
        query: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Page<Conversation>, ConversationStoreError> {
        let needle = query.to_lowercase();
        let inner = self.inner.lock().unwrap();
        let matches: Vec<Conversation> = inner
            .conversations
            .values()
            .filter(|c| c.user_id == user_id)
            .filter(|c| {
                c.title.to_lowercase().contains(&needle)
                    || inner.messages.get(&c.id).is_some_and(|msgs| {
                        msgs.iter().any(|m| m.content.to_lowercase().contains(&needle))
                    })
            })
            .cloned()
            .collect();
        Ok(paginate(matches, offset, limit))
    }
}

// ── Command bus ───────────────────────────────────────────────────────────

/// In-memory [`CommandBus`]: publishes are recorded, replies rendezvous
/// through [`MemoryCommandBus::complete`].
pub struct MemoryCommandBus {
    pending: Mutex<HashMap<u64, oneshot::Sender<serde_json::Value>>>,
    published: Mutex<Vec<(String, serde_json::Value)>>,
}

impl MemoryCommandBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            published: Mutex::new(Vec::new()),
        }
    }

    /// Deliver a reply for `request_id`. Returns false if nothing was
    /// waiting (timeout already fired, or unknown id).
    pub fn complete(&self, request_id: u64, reply: serde_json::Value) -> bool {
        match self.pending.lock().unwrap().remove(&request_id) {
            Some(tx) => tx.send(reply).is_ok(),
            None => false,
        }
    }

    /// Published messages (test hook).
    #[must_use]
    pub fn published(&self) -> Vec<(String, serde_json::Value)> {
        self.published.lock().unwrap().clone()
    }
}

impl Default for MemoryCommandBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandBus for MemoryCommandBus {
    async fn publish(
        &self,
        topic: &str,
        payload: serde_json::Value,
    ) -> Result<(), CommandBusError> {
        debug!(topic, "command published");
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
        Ok(())
    }

    fn register(&self, request_id: u64) -> PendingReply {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(request_id, tx);
        PendingReply::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_auth_user_lifecycle() {
        let store = MemoryAuthStore::new();
        let id = store
            .create_user(NewUser {
                username: "alice".into(),
                password_hash: "hash".into(),
                is_admin: false,
            })
            .await
            .unwrap();
        assert_eq!(store.get_user("alice").await.unwrap().unwrap().id, id);
        assert!(store.get_user("bob").await.unwrap().is_none());
        store.delete_user("alice").await.unwrap();
        assert!(store.get_user("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failure_counter() {
        let store = MemoryAuthStore::new();
        assert_eq!(store.failure_count("alice").await.unwrap(), 0);
        assert_eq!(store.record_failure("alice").await.unwrap(), 1);
        assert_eq!(store.record_failure("alice").await.unwrap(), 2);
        store.clear_failures("alice").await.unwrap();
        assert_eq!(store.failure_count("alice").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_auth_session_round_trip() {
        let store = MemoryAuthStore::new();
        store
            .create_session(NewAuthSession {
                token: "deadbeef".into(),
                user_id: 1,
                username: "alice".into(),
                is_admin: true,
                issued_ip: "203.0.113.7".into(),
                user_agent: "test".into(),
            })
            .await
            .unwrap();
        let session = store.get_session("deadbeef").await.unwrap().unwrap();
        assert!(session.is_admin);
        store.delete_session("deadbeef").await.unwrap();
        assert!(store.get_session("deadbeef").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_conversation_search() {
        let store = MemoryConversationStore::new();
        let id = store.create(1, "Groceries".into()).await.unwrap();
        store
            .add_message(id, MessageRole::User, "buy milk and eggs".into())
            .await
            .unwrap();
        store.create(1, "Weather".into()).await.unwrap();
        store.create(2, "milk discussion".into()).await.unwrap();

        let page = store.search(1, "MILK", 0, 10).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].title, "Groceries");
    }

    #[tokio::test]
    async fn test_command_bus_rendezvous() {
        let bus = MemoryCommandBus::new();
        let reply = bus.register(42);
        bus.publish("dawn/commands", serde_json::json!({"request_id": 42}))
            .await
            .unwrap();
        assert!(bus.complete(42, serde_json::json!({"ok": true})));
        let value = reply.wait(Duration::from_millis(100)).await.unwrap();
        assert_eq!(value["ok"], true);
    }

    #[tokio::test]
    async fn test_command_bus_timeout() {
        let bus = MemoryCommandBus::new();
        let reply = bus.register(7);
        let err = reply.wait(Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, CommandBusError::Timeout(_)));
    }
}
