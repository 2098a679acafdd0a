//! Session objects and the session manager.
//!
//! Sessions are shared between the outbound dispatcher and worker tasks as
//! `Arc<Session>`; the manager's index is the only long-lived holder. Leaf
//! state on a session sits behind separate mutexes that are never held
//! simultaneously; cross-section access copies under lock.
//!
//! ## Lock order
//!
//! 1. Manager index lock (`SessionManager::sessions`)
//! 2. Session outbound-link mutex
//! 3. Session leaf mutexes (history, LLM config, tools, filter)
//!
//! ## Destruction
//!
//! Destruction is two-phase: mark `disconnected` and remove the session from
//! the index (no new references can be obtained), then the backing memory is
//! freed when the last outstanding `Arc` clone drops. A `disconnected`
//! session that is still indexed (socket closed, awaiting reconnect) is
//! only returned by the explicit reconnect lookup.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::chat::{ChatMessage, MessageRole};
use crate::domain::envelope::Envelope;
use crate::domain::llm::LlmConfig;
use crate::domain::session::{SatelliteIdentity, SatelliteTier, SessionKind};
use crate::services::command_filter::CommandTagFilter;

/// Reserved id of the immortal local session.
pub const LOCAL_SESSION_ID: u64 = 0;

/// Upper bound on the currently-executing tool list kept for UI display.
const MAX_ACTIVE_TOOLS: usize = 8;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session limit reached")]
    AtCapacity,

    #[error("session not found: {0}")]
    NotFound(u64),

    #[error("session 0 is immortal")]
    Immortal,
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// One conversation context, shared by reference between the connection,
/// the outbound dispatcher, and any workers it spawned.
pub struct Session {
    id: u64,
    kind: SessionKind,
    created_unix: u64,
    last_activity: AtomicU64,

    // Status flags and counters. Workers read these with acquire ordering at
    // their checkpoints; the connection writes them with release ordering.
    disconnected: AtomicBool,
    llm_streaming_active: AtomicBool,
    stream_had_content: AtomicBool,
    stream_id: AtomicU64,
    request_generation: AtomicU64,

    // Leaf mutexes, never held simultaneously.
    history: Mutex<Vec<ChatMessage>>,
    llm: Mutex<LlmConfig>,
    satellite: Mutex<Option<SatelliteIdentity>>,
    active_tools: Mutex<Vec<String>>,
    filter: Mutex<CommandTagFilter>,

    // Link to the owning connection's egress channel. Observational: the
    // session never keeps a connection alive, it only forwards envelopes
    // while a link is attached.
    outbound: Mutex<Option<mpsc::Sender<Envelope>>>,
}

impl Session {
    fn new(id: u64, kind: SessionKind, llm: LlmConfig) -> Self {
        let now = now_unix();
        Self {
            id,
            kind,
            created_unix: now,
            last_activity: AtomicU64::new(now),
            disconnected: AtomicBool::new(false),
            llm_streaming_active: AtomicBool::new(false),
            stream_had_content: AtomicBool::new(false),
            stream_id: AtomicU64::new(0),
            request_generation: AtomicU64::new(0),
            history: Mutex::new(Vec::new()),
            llm: Mutex::new(llm),
            satellite: Mutex::new(None),
            active_tools: Mutex::new(Vec::new()),
            filter: Mutex::new(CommandTagFilter::new()),
            outbound: Mutex::new(None),
        }
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub const fn kind(&self) -> SessionKind {
        self.kind
    }

    #[must_use]
    pub const fn created_unix(&self) -> u64 {
        self.created_unix
    }

    /// Refresh the last-activity timestamp.
    pub fn touch(&self) {
        self.last_activity.store(now_unix(), Ordering::Relaxed);
    }

    /// Seconds since the last recorded activity.
    #[must_use]
    pub fn idle_secs(&self) -> u64 {
        now_unix().saturating_sub(self.last_activity.load(Ordering::Relaxed))
    }

    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    /// Mark the session disconnected. Workers observe this at their next
    /// checkpoint and abort without sending.
    pub fn mark_disconnected(&self) {
        self.disconnected.store(true, Ordering::Release);
    }

    fn clear_disconnected(&self) {
        self.disconnected.store(false, Ordering::Release);
    }

    // ── Streaming ─────────────────────────────────────────────────────────

    /// Start a new streaming reply; returns the fresh, strictly-increasing
    /// stream id.
    pub fn begin_stream(&self) -> u64 {
        let id = self.stream_id.fetch_add(1, Ordering::AcqRel) + 1;
        self.stream_had_content.store(false, Ordering::Release);
        self.llm_streaming_active.store(true, Ordering::Release);
        id
    }

    pub fn end_stream(&self) {
        self.llm_streaming_active.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn stream_active(&self) -> bool {
        self.llm_streaming_active.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn current_stream_id(&self) -> u64 {
        self.stream_id.load(Ordering::Acquire)
    }

    pub fn note_stream_content(&self) {
        self.stream_had_content.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn stream_had_content(&self) -> bool {
        self.stream_had_content.load(Ordering::Acquire)
    }

    // ── Request generations ───────────────────────────────────────────────

    /// Bump the request generation (a new user query supersedes in-flight
    /// work) and return a cancellation token for the new generation.
    pub fn begin_request(self: &Arc<Self>) -> CancelToken {
        let generation = self.request_generation.fetch_add(1, Ordering::AcqRel) + 1;
        CancelToken {
            session: Arc::clone(self),
            generation,
        }
    }

    #[must_use]
    pub fn current_generation(&self) -> u64 {
        self.request_generation.load(Ordering::Acquire)
    }

    // ── Conversation history ──────────────────────────────────────────────

    /// Append a message. System messages never enter through this path.
    pub fn push_history(&self, message: ChatMessage) {
        debug_assert!(message.role != MessageRole::System);
        self.history.lock().unwrap().push(message);
    }

    /// Copy of the full history, leading system message included.
    #[must_use]
    pub fn history_snapshot(&self) -> Vec<ChatMessage> {
        self.history.lock().unwrap().clone()
    }

    /// Copy of the history with system messages removed (replay payloads).
    #[must_use]
    pub fn history_for_replay(&self) -> Vec<ChatMessage> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .cloned()
            .collect()
    }

    /// Replace the leading system message in place, or prepend one. The rest
    /// of the history is preserved so personalization changes mid-conversation
    /// keep their context.
    pub fn set_system_prompt(&self, prompt: impl Into<String>) {
        let mut history = self.history.lock().unwrap();
        match history.first_mut() {
            Some(first) if first.role == MessageRole::System => {
                first.content = prompt.into();
            }
            _ => history.insert(0, ChatMessage::system(prompt)),
        }
    }

    /// Drop oldest non-system messages until at most `keep` remain.
    /// Returns the number removed.
    pub fn compact_history(&self, keep: usize) -> usize {
        let mut history = self.history.lock().unwrap();
        let has_system = history
            .first()
            .is_some_and(|m| m.role == MessageRole::System);
        let body = history.len() - usize::from(has_system);
        if body <= keep {
            return 0;
        }
        let remove = body - keep;
        let start = usize::from(has_system);
        history.drain(start..start + remove);
        remove
    }

    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history.lock().unwrap().len()
    }

    // ── LLM config ────────────────────────────────────────────────────────

    #[must_use]
    pub fn llm_config(&self) -> LlmConfig {
        self.llm.lock().unwrap().clone()
    }

    /// Replace the per-session LLM config. Validation (API-key presence for
    /// cloud providers) happens at the call site against the secrets vault.
    pub fn set_llm_config(&self, config: LlmConfig) {
        *self.llm.lock().unwrap() = config;
    }

    // ── Satellite identity ────────────────────────────────────────────────

    #[must_use]
    pub fn satellite(&self) -> Option<SatelliteIdentity> {
        self.satellite.lock().unwrap().clone()
    }

    fn set_satellite(&self, identity: SatelliteIdentity) {
        *self.satellite.lock().unwrap() = Some(identity);
    }

    // ── Tool display list ─────────────────────────────────────────────────

    /// Record a tool as executing; the list is bounded for UI display.
    pub fn tool_started(&self, name: &str) {
        let mut tools = self.active_tools.lock().unwrap();
        if tools.len() < MAX_ACTIVE_TOOLS {
            tools.push(name.to_string());
        }
    }

    pub fn tool_finished(&self, name: &str) {
        let mut tools = self.active_tools.lock().unwrap();
        if let Some(pos) = tools.iter().position(|t| t == name) {
            tools.remove(pos);
        }
    }

    #[must_use]
    pub fn active_tools(&self) -> Vec<String> {
        self.active_tools.lock().unwrap().clone()
    }

    // ── Command-tag filter ────────────────────────────────────────────────

    /// Run a streamed delta through the session's command-tag filter,
    /// returning the visible portion.
    pub fn filter_delta(&self, delta: &str) -> String {
        self.filter.lock().unwrap().push(delta)
    }

    /// Reset the filter at stream start.
    pub fn reset_filter(&self) {
        *self.filter.lock().unwrap() = CommandTagFilter::new();
    }

    /// Flush the filter at end of stream: an unresolved partial tag outside
    /// a block is visible text.
    #[must_use]
    pub fn finish_filter(&self) -> String {
        self.filter.lock().unwrap().finish()
    }

    // ── Outbound link ─────────────────────────────────────────────────────

    /// Attach the owning connection's egress channel.
    pub fn attach_outbound(&self, tx: mpsc::Sender<Envelope>) {
        *self.outbound.lock().unwrap() = Some(tx);
    }

    /// Sever the connection link (socket closed or write failed).
    pub fn detach_outbound(&self) {
        *self.outbound.lock().unwrap() = None;
    }

    #[must_use]
    pub fn outbound(&self) -> Option<mpsc::Sender<Envelope>> {
        self.outbound.lock().unwrap().clone()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("disconnected", &self.is_disconnected())
            .finish_non_exhaustive()
    }
}

/// Cancellation token combining the two supersession signals: session
/// disconnect (terminal) and request-generation advance (a newer query on a
/// still-live session). Workers check it at every suspension point.
#[derive(Clone)]
pub struct CancelToken {
    session: Arc<Session>,
    generation: u64,
}

impl CancelToken {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.session.disconnected.load(Ordering::Acquire)
            || self.session.request_generation.load(Ordering::Acquire) != self.generation
    }

    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

/// Owns every session and allocates their ids.
pub struct SessionManager {
    sessions: RwLock<HashMap<u64, Arc<Session>>>,
    next_id: AtomicU64,
    max_sessions: usize,
}

impl SessionManager {
    /// Create the manager and its immortal local session 0.
    #[must_use]
    pub fn new(max_sessions: usize, default_llm: LlmConfig) -> Self {
        let local = Arc::new(Session::new(
            LOCAL_SESSION_ID,
            SessionKind::Local,
            default_llm,
        ));
        let mut sessions = HashMap::new();
        sessions.insert(LOCAL_SESSION_ID, local);
        Self {
            sessions: RwLock::new(sessions),
            next_id: AtomicU64::new(1),
            max_sessions,
        }
    }

    /// Create a fresh session, enforcing the configured cap.
    pub fn create(
        &self,
        kind: SessionKind,
        llm: LlmConfig,
    ) -> Result<Arc<Session>, SessionError> {
        let mut sessions = self.sessions.write().unwrap();
        if sessions.len() >= self.max_sessions {
            return Err(SessionError::AtCapacity);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(Session::new(id, kind, llm));
        sessions.insert(id, Arc::clone(&session));
        info!(session_id = id, kind = kind.as_str(), "session created");
        Ok(session)
    }

    /// Create or reconnect a satellite session. UUID matching and
    /// reconnection happen in the same atomic window under the write lock;
    /// a reconnected session keeps its conversation history. The boolean is
    /// true when an existing session was re-bound.
    pub fn register_satellite(
        &self,
        identity: SatelliteIdentity,
        tier: SatelliteTier,
        llm: LlmConfig,
    ) -> Result<(Arc<Session>, bool), SessionError> {
        let mut sessions = self.sessions.write().unwrap();

        let existing = sessions
            .values()
            .find(|s| {
                s.satellite()
                    .is_some_and(|sat| sat.uuid == identity.uuid)
            })
            .cloned();

        if let Some(session) = existing {
            session.clear_disconnected();
            session.set_satellite(identity);
            session.touch();
            info!(session_id = session.id(), "satellite reconnected");
            return Ok((session, true));
        }

        if sessions.len() >= self.max_sessions {
            return Err(SessionError::AtCapacity);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(Session::new(id, SessionKind::from_tier(tier), llm));
        session.set_satellite(identity);
        sessions.insert(id, Arc::clone(&session));
        info!(session_id = id, "satellite registered");
        Ok((session, false))
    }

    /// Look up a live session. Disconnected sessions are not returned here.
    #[must_use]
    pub fn get(&self, id: u64) -> Option<Arc<Session>> {
        let sessions = self.sessions.read().unwrap();
        sessions
            .get(&id)
            .filter(|s| !s.is_disconnected())
            .cloned()
    }

    /// Reconnect lookup: returns the session even while disconnected, and
    /// clears the flag so envelopes flow again.
    #[must_use]
    pub fn get_for_reconnect(&self, id: u64) -> Option<Arc<Session>> {
        let sessions = self.sessions.read().unwrap();
        let session = sessions.get(&id).cloned()?;
        session.clear_disconnected();
        session.touch();
        Some(session)
    }

    /// Phase one of destruction: mark disconnected and unindex. The memory
    /// is freed when the last outstanding reference drops.
    pub fn destroy(&self, id: u64) -> Result<(), SessionError> {
        if id == LOCAL_SESSION_ID {
            return Err(SessionError::Immortal);
        }
        let removed = self.sessions.write().unwrap().remove(&id);
        match removed {
            Some(session) => {
                session.mark_disconnected();
                session.detach_outbound();
                debug!(session_id = id, "session destroyed");
                Ok(())
            }
            None => Err(SessionError::NotFound(id)),
        }
    }

    /// Destroy disconnected sessions idle beyond `timeout_secs`. Session 0
    /// is never swept. Returns the ids destroyed.
    pub fn sweep_idle(&self, timeout_secs: u64) -> Vec<u64> {
        let candidates: Vec<u64> = {
            let sessions = self.sessions.read().unwrap();
            sessions
                .values()
                .filter(|s| {
                    s.id() != LOCAL_SESSION_ID
                        && s.is_disconnected()
                        && s.idle_secs() > timeout_secs
                })
                .map(|s| s.id())
                .collect()
        };
        for id in &candidates {
            let _ = self.destroy(*id);
        }
        if !candidates.is_empty() {
            info!(count = candidates.len(), "expired idle sessions");
        }
        candidates
    }

    /// Number of indexed sessions (the immortal local session included).
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    /// Find a live session by satellite UUID.
    #[must_use]
    pub fn find_by_uuid(&self, uuid: Uuid) -> Option<Arc<Session>> {
        let sessions = self.sessions.read().unwrap();
        sessions
            .values()
            .find(|s| s.satellite().is_some_and(|sat| sat.uuid == uuid))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::SatelliteTier;

    fn manager(cap: usize) -> SessionManager {
        SessionManager::new(cap, LlmConfig::default())
    }

    #[test]
    fn test_local_session_exists_and_is_immortal() {
        let mgr = manager(4);
        assert!(mgr.get(LOCAL_SESSION_ID).is_some());
        assert!(matches!(
            mgr.destroy(LOCAL_SESSION_ID),
            Err(SessionError::Immortal)
        ));
    }

    #[test]
    fn test_capacity_enforced() {
        let mgr = manager(2); // local session occupies one slot
        let s1 = mgr.create(SessionKind::Websocket, LlmConfig::default());
        assert!(s1.is_ok());
        assert!(matches!(
            mgr.create(SessionKind::Websocket, LlmConfig::default()),
            Err(SessionError::AtCapacity)
        ));
    }

    #[test]
    fn test_disconnected_hidden_from_plain_lookup() {
        let mgr = manager(4);
        let s = mgr.create(SessionKind::Websocket, LlmConfig::default()).unwrap();
        let id = s.id();
        s.mark_disconnected();
        assert!(mgr.get(id).is_none());
        assert!(mgr.get_for_reconnect(id).is_some());
        // reconnect lookup clears the flag
        assert!(mgr.get(id).is_some());
    }

    #[test]
    fn test_destroy_frees_only_after_last_reference() {
        let mgr = manager(4);
        let s = mgr.create(SessionKind::Websocket, LlmConfig::default()).unwrap();
        let id = s.id();
        let weak = Arc::downgrade(&s);
        mgr.destroy(id).unwrap();
        // our clone still holds the session alive
        assert!(weak.upgrade().is_some());
        drop(s);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_satellite_reconnect_preserves_history() {
        let mgr = manager(4);
        let identity = SatelliteIdentity {
            uuid: Uuid::new_v4(),
            name: "kitchen".into(),
            location: "kitchen".into(),
        };
        let (s, reconnected) = mgr
            .register_satellite(identity.clone(), SatelliteTier::Tier1, LlmConfig::default())
            .unwrap();
        assert!(!reconnected);
        s.push_history(ChatMessage::user("turn on the lights"));
        s.mark_disconnected();

        let (s2, reconnected) = mgr
            .register_satellite(identity, SatelliteTier::Tier1, LlmConfig::default())
            .unwrap();
        assert!(reconnected);
        assert_eq!(s2.id(), s.id());
        assert!(!s2.is_disconnected());
        assert_eq!(s2.history_len(), 1);
    }

    #[test]
    fn test_stream_ids_strictly_increase() {
        let mgr = manager(4);
        let s = mgr.create(SessionKind::Websocket, LlmConfig::default()).unwrap();
        let a = s.begin_stream();
        let b = s.begin_stream();
        let c = s.begin_stream();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_cancel_token_supersession() {
        let mgr = manager(4);
        let s = mgr.create(SessionKind::Websocket, LlmConfig::default()).unwrap();
        let token = s.begin_request();
        assert!(!token.is_cancelled());
        let _newer = s.begin_request();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancel_token_disconnect() {
        let mgr = manager(4);
        let s = mgr.create(SessionKind::Websocket, LlmConfig::default()).unwrap();
        let token = s.begin_request();
        s.mark_disconnected();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_system_prompt_replaced_in_place() {
        let mgr = manager(4);
        let s = mgr.create(SessionKind::Websocket, LlmConfig::default()).unwrap();
        s.set_system_prompt("you are dawn");
        s.push_history(ChatMessage::user("hi"));
        s.push_history(ChatMessage::assistant("hello"));
        s.set_system_prompt("you are dawn, but terse");

        let history = s.history_snapshot();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].role, MessageRole::System);
        assert_eq!(history[0].content, "you are dawn, but terse");
        assert_eq!(history[1].content, "hi");
    }

    #[test]
    fn test_replay_strips_system_messages() {
        let mgr = manager(4);
        let s = mgr.create(SessionKind::Websocket, LlmConfig::default()).unwrap();
        s.set_system_prompt("system");
        s.push_history(ChatMessage::user("a"));
        let replay = s.history_for_replay();
        assert_eq!(replay.len(), 1);
        assert_eq!(replay[0].role, MessageRole::User);
    }

    #[test]
    fn test_compact_history() {
        let mgr = manager(4);
        let s = mgr.create(SessionKind::Websocket, LlmConfig::default()).unwrap();
        s.set_system_prompt("system");
        for i in 0..10 {
            s.push_history(ChatMessage::user(format!("m{i}")));
        }
        let removed = s.compact_history(4);
        assert_eq!(removed, 6);
        let history = s.history_snapshot();
        assert_eq!(history.len(), 5); // system + 4 kept
        assert_eq!(history[0].role, MessageRole::System);
        assert_eq!(history[1].content, "m6");
    }

    #[test]
    fn test_sweep_only_disconnected() {
        let mgr = manager(8);
        let live = mgr.create(SessionKind::Websocket, LlmConfig::default()).unwrap();
        let gone = mgr.create(SessionKind::Websocket, LlmConfig::default()).unwrap();
        gone.mark_disconnected();
        // both idle "0 seconds"; a zero timeout still requires idle > timeout
        let swept = mgr.sweep_idle(0);
        assert!(swept.is_empty());
        // force idleness by rewinding last_activity
        gone.last_activity.store(0, Ordering::Relaxed);
        live.last_activity.store(0, Ordering::Relaxed);
        let swept = mgr.sweep_idle(60);
        assert_eq!(swept, vec![gone.id()]);
        assert!(mgr.get(live.id()).is_some());
    }

    #[test]
    fn test_tool_list_is_bounded() {
        let mgr = manager(4);
        let s = mgr.create(SessionKind::Websocket, LlmConfig::default()).unwrap();
        for i in 0..20 {
            s.tool_started(&format!("tool{i}"));
        }
        assert_eq!(s.active_tools().len(), MAX_ACTIVE_TOOLS);
        s.tool_finished("tool3");
        assert_eq!(s.active_tools().len(), MAX_ACTIVE_TOOLS - 1);
    }
}
