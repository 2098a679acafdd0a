//! Per-socket connection state.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use dawn_core::domain::envelope::Envelope;
use dawn_core::services::Session;

/// Auth state captured at upgrade time.
///
/// `is_admin` is deliberately absent: admin checks re-read the auth session
/// from the store at the moment of the operation, so revocation and
/// demotion take effect immediately.
#[derive(Debug, Clone)]
pub struct AuthSnapshot {
    pub user_id: u64,
    pub username: String,
    /// The opaque cookie token, kept for re-validation lookups.
    pub token: String,
}

/// State tied to one WebSocket.
pub struct Connection {
    /// Bound session, once `init` / `reconnect` / `register` succeeded.
    pub session: Option<Arc<Session>>,
    /// Token handed to the client for reconnection.
    pub reconnect_token: Option<String>,
    /// Accumulated inbound utterance bytes (opcode `audio-in`).
    pub audio_buffer: Vec<u8>,
    /// Set when the buffer cap was exceeded; the terminating
    /// `audio-in-end` then becomes a no-op.
    pub audio_overflowed: bool,
    /// Negotiated: client can consume Opus frames.
    pub opus: bool,
    pub auth: Option<AuthSnapshot>,
    pub peer_ip: String,

    outbound: mpsc::Sender<Envelope>,
}

impl Connection {
    #[must_use]
    pub fn new(
        outbound: mpsc::Sender<Envelope>,
        peer_ip: String,
        auth: Option<AuthSnapshot>,
    ) -> Self {
        Self {
            session: None,
            reconnect_token: None,
            audio_buffer: Vec::new(),
            audio_overflowed: false,
            opus: false,
            auth,
            peer_ip,
            outbound,
        }
    }

    /// Bind a session to this connection: the session's outbound link is
    /// pointed at our egress channel so queued envelopes reach this socket.
    pub fn bind_session(&mut self, session: Arc<Session>) {
        session.attach_outbound(self.outbound.clone());
        self.session = Some(session);
    }

    /// Send an envelope directly on this connection's egress channel.
    ///
    /// Used before a session is bound (handshake errors); afterwards
    /// everything goes through the response queue for ordering.
    pub async fn send_direct(&self, envelope: Envelope) {
        if self.outbound.send(envelope).await.is_err() {
            warn!("egress channel closed during direct send");
        }
    }
}
