//! Server bootstrap - the composition root.
//!
//! This module is the ONLY place where infrastructure is wired together for
//! the web adapter. All concrete port implementations are instantiated here;
//! handlers and workers reach everything through [`ServerContext`].

use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use tokio::sync::Notify;
use tracing::info;

use dawn_core::domain::envelope::ServerState;
use dawn_core::domain::llm::LlmConfig;
use dawn_core::ports::audio::{AsrEngine, AudioDecoder, TtsEngine};
use dawn_core::ports::auth_store::{AuthStore, NewUser};
use dawn_core::ports::command_bus::CommandBus;
use dawn_core::ports::conversation_store::ConversationStore;
use dawn_core::ports::llm_client::LlmClient;
use dawn_core::services::memory::{MemoryAuthStore, MemoryCommandBus, MemoryConversationStore};
use dawn_core::services::passwords;
use dawn_core::services::{CsrfProtect, RateLimiter, ReconnectTokens, ResponseQueue, SessionManager};
use dawn_core::settings::RuntimeSettings;

use crate::loopback::{LoopbackAsr, LoopbackLlm, LoopbackTts, PcmPassthrough};

/// TLS certificate material on disk.
#[derive(Debug, Clone)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Configuration for the web adapter.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Port for the HTTP server.
    pub port: u16,
    /// Bind address.
    pub bind_addr: String,
    /// Document root for static file serving.
    pub document_root: PathBuf,
    /// TLS material; `None` serves plain HTTP.
    pub tls: Option<TlsPaths>,
    /// Refuse to start without TLS material.
    pub require_https: bool,
    /// Maximum concurrent sessions (the local session included).
    pub max_clients: usize,
    /// Outbound audio chunk bound, in bytes.
    pub audio_chunk_bytes: usize,
    /// Hard cap on one utterance's accumulated inbound audio.
    pub audio_buffer_cap: usize,
    /// Idle timeout after which disconnected sessions are swept.
    pub session_idle_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 8443,
            bind_addr: "0.0.0.0".to_string(),
            document_root: PathBuf::from("www"),
            tls: None,
            require_https: false,
            max_clients: 16,
            audio_chunk_bytes: 8 * 1024,
            audio_buffer_cap: 1024 * 1024,
            session_idle_timeout_secs: 1800,
        }
    }
}

/// Login rate limit: attempts per window per normalized IP.
const LOGIN_RATE_LIMIT: u32 = 20;
const LOGIN_RATE_WINDOW: Duration = Duration::from_secs(15 * 60);

/// CSRF issuance rate limit per normalized IP.
const CSRF_RATE_LIMIT: u32 = 30;
const CSRF_RATE_WINDOW: Duration = Duration::from_secs(60);

/// CSRF token lifetime.
const CSRF_TTL: Duration = Duration::from_secs(10 * 60);

/// Application context owning all shared state.
///
/// The process-wide singletons of the original design (queue, token map,
/// nonce ring, limiters) are fields here; handlers borrow them through the
/// shared [`crate::state::AppState`].
pub struct ServerContext {
    pub config: GatewayConfig,
    pub sessions: SessionManager,
    pub queue: ResponseQueue,
    pub reconnect_tokens: ReconnectTokens,
    pub csrf: CsrfProtect,
    pub login_limiter: RateLimiter,
    pub csrf_limiter: RateLimiter,
    pub settings: RuntimeSettings,

    pub auth: Arc<dyn AuthStore>,
    pub conversations: Arc<dyn ConversationStore>,
    pub command_bus: Arc<dyn CommandBus>,
    pub llm: Arc<dyn LlmClient>,
    pub decoder: Arc<dyn AudioDecoder>,
    pub asr: Arc<dyn AsrEngine>,
    pub tts: Arc<dyn TtsEngine>,

    /// Signalled by the admin `restart` command; the binary decides what a
    /// restart means.
    pub restart: Notify,

    started_at: Instant,
    state: Mutex<ServerState>,
    queries: AtomicU64,
    next_request_id: AtomicU64,
}

impl ServerContext {
    #[must_use]
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    #[must_use]
    pub fn state(&self) -> ServerState {
        *self.state.lock().unwrap()
    }

    pub fn set_state(&self, state: ServerState) {
        *self.state.lock().unwrap() = state;
    }

    /// Count one user query (surfaced by `/health`).
    pub fn count_query(&self) -> u64 {
        self.queries.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[must_use]
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    /// Allocate a request id for a command-bus rendezvous.
    pub fn next_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Bootstrap the server context with the in-memory store wiring.
///
/// Real deployments replace the stores and engines through
/// [`bootstrap_with`]; the defaults make the server fully operational for
/// development and tests.
pub fn bootstrap(config: GatewayConfig) -> Result<Arc<ServerContext>> {
    bootstrap_with(
        config,
        Arc::new(MemoryAuthStore::new()),
        Arc::new(MemoryConversationStore::new()),
        Arc::new(MemoryCommandBus::new()),
        Arc::new(LoopbackLlm::new()),
    )
}

/// Bootstrap with explicit store and backend implementations.
pub fn bootstrap_with(
    config: GatewayConfig,
    auth: Arc<dyn AuthStore>,
    conversations: Arc<dyn ConversationStore>,
    command_bus: Arc<dyn CommandBus>,
    llm: Arc<dyn LlmClient>,
) -> Result<Arc<ServerContext>> {
    if config.require_https && config.tls.is_none() {
        anyhow::bail!("HTTPS required but no TLS certificate configured");
    }

    let defaults = LlmConfig::default();
    let csrf = CsrfProtect::new(CSRF_TTL).context("initializing CSRF secret")?;

    info!(
        port = config.port,
        tls = config.tls.is_some(),
        max_clients = config.max_clients,
        document_root = %config.document_root.display(),
        "bootstrapping dawn web adapter"
    );

    Ok(Arc::new(ServerContext {
        sessions: SessionManager::new(config.max_clients, defaults.clone()),
        queue: ResponseQueue::with_defaults(),
        reconnect_tokens: ReconnectTokens::new(),
        csrf,
        login_limiter: RateLimiter::new(LOGIN_RATE_LIMIT, LOGIN_RATE_WINDOW),
        csrf_limiter: RateLimiter::new(CSRF_RATE_LIMIT, CSRF_RATE_WINDOW),
        settings: RuntimeSettings::new(defaults),
        auth,
        conversations,
        command_bus,
        llm,
        decoder: Arc::new(PcmPassthrough),
        asr: Arc::new(LoopbackAsr::default()),
        tts: Arc::new(LoopbackTts::default()),
        restart: Notify::new(),
        started_at: Instant::now(),
        state: Mutex::new(ServerState::Idle),
        queries: AtomicU64::new(0),
        next_request_id: AtomicU64::new(1),
        config,
    }))
}

/// Create a user in the configured auth store (initial provisioning).
pub async fn seed_user(
    ctx: &ServerContext,
    username: &str,
    password: &str,
    is_admin: bool,
) -> Result<u64> {
    let hash = passwords::hash_password(password)
        .map_err(|e| anyhow::anyhow!("hashing seed password: {e}"))?;
    let id = ctx
        .auth
        .create_user(NewUser {
            username: username.to_string(),
            password_hash: hash,
            is_admin,
        })
        .await?;
    info!(username, is_admin, "seeded user");
    Ok(id)
}
