//! Auth store port.
//!
//! Users, server-side auth sessions, failure counters, lockouts, and audit
//! events all live behind this trait. The core treats the store as an opaque
//! key-value surface; persistence is an external concern.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the auth store.
#[derive(Debug, Error)]
pub enum AuthStoreError {
    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("user already exists: {0}")]
    UserExists(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// A stored user record.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: u64,
    pub username: String,
    /// PHC-formatted Argon2id hash.
    pub password_hash: String,
    pub is_admin: bool,
    /// Administrative lock, independent of the failure lockout.
    pub locked: bool,
}

/// Data for creating a new user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub is_admin: bool,
}

/// A server-side auth session keyed by its opaque cookie token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    pub token: String,
    pub user_id: u64,
    pub username: String,
    pub is_admin: bool,
    pub issued_ip: String,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Data for creating a server-side auth session.
#[derive(Debug, Clone)]
pub struct NewAuthSession {
    pub token: String,
    pub user_id: u64,
    pub username: String,
    pub is_admin: bool,
    pub issued_ip: String,
    pub user_agent: String,
}

/// Security-relevant events recorded through the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AuditEvent {
    LoginSuccess { username: String, ip: String },
    LoginFailure { username: String, ip: String },
    Lockout { username: String },
    Logout { username: String },
    RateLimited { ip: String },
}

/// Port for user identity, auth sessions, and failure accounting.
///
/// `is_admin` must always be read through [`AuthStore::get_session`] at the
/// moment an admin-gated operation runs; callers never cache it.
#[async_trait]
pub trait AuthStore: Send + Sync {
    async fn get_user(&self, username: &str) -> Result<Option<AuthUser>, AuthStoreError>;

    async fn list_users(&self) -> Result<Vec<AuthUser>, AuthStoreError>;

    async fn create_user(&self, user: NewUser) -> Result<u64, AuthStoreError>;

    async fn delete_user(&self, username: &str) -> Result<(), AuthStoreError>;

    /// Replace a user's password hash.
    async fn set_password_hash(&self, username: &str, hash: String) -> Result<(), AuthStoreError>;

    /// Set or clear the administrative lock.
    async fn set_locked(&self, username: &str, locked: bool) -> Result<(), AuthStoreError>;

    async fn create_session(&self, session: NewAuthSession) -> Result<(), AuthStoreError>;

    /// Look up a session by token. Expired sessions return `None`.
    async fn get_session(&self, token: &str) -> Result<Option<AuthSession>, AuthStoreError>;

    async fn delete_session(&self, token: &str) -> Result<(), AuthStoreError>;

    /// List live sessions belonging to one user.
    async fn list_sessions(&self, user_id: u64) -> Result<Vec<AuthSession>, AuthStoreError>;

    /// Refresh a session's last-activity timestamp.
    async fn touch_session(&self, token: &str) -> Result<(), AuthStoreError>;

    /// Consecutive-failure count for a username.
    async fn failure_count(&self, username: &str) -> Result<u32, AuthStoreError>;

    /// Record one more failure; returns the new count.
    async fn record_failure(&self, username: &str) -> Result<u32, AuthStoreError>;

    async fn clear_failures(&self, username: &str) -> Result<(), AuthStoreError>;

    /// Failure-lockout expiry, if a lockout is in effect.
    async fn lockout_until(&self, username: &str) -> Result<Option<DateTime<Utc>>, AuthStoreError>;

    async fn set_lockout(
        &self,
        username: &str,
        until: DateTime<Utc>,
    ) -> Result<(), AuthStoreError>;

    async fn clear_lockout(&self, username: &str) -> Result<(), AuthStoreError>;

    async fn record_audit_event(&self, event: AuditEvent) -> Result<(), AuthStoreError>;
}
