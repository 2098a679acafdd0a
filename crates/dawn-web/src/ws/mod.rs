//! WebSocket surface: upgrade, per-connection ingest/egress, protocol.

pub mod connection;
pub mod protocol;
pub mod wire;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use dawn_core::domain::envelope::Envelope;

use crate::extract::{ClientIp, cookie_value};
use crate::gateway::static_files::SESSION_COOKIE;
use crate::state::AppState;
use connection::{AuthSnapshot, Connection};

/// Fixed WebSocket subprotocol name.
pub const SUBPROTOCOL: &str = "dawn-chat";

/// Per-connection egress channel depth. A client that falls this far
/// behind starts losing envelopes (the dispatcher sheds rather than
/// blocks).
const EGRESS_CHANNEL_DEPTH: usize = 64;

/// `GET /ws`: upgrade to the chat protocol.
///
/// The auth snapshot is captured from the session cookie before the
/// upgrade; `is_admin` is deliberately not part of it.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    ip: ClientIp,
) -> impl IntoResponse {
    let auth = match cookie_value(&headers, SESSION_COOKIE) {
        Some(token) => match state.auth.get_session(&token).await {
            Ok(Some(session)) => Some(AuthSnapshot {
                user_id: session.user_id,
                username: session.username,
                token,
            }),
            _ => None,
        },
        None => None,
    };

    ws.protocols([SUBPROTOCOL])
        .on_upgrade(move |socket| handle_socket(state, socket, ip.0, auth))
}

async fn handle_socket(
    state: AppState,
    socket: WebSocket,
    peer_ip: String,
    auth: Option<AuthSnapshot>,
) {
    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::channel(EGRESS_CHANNEL_DEPTH);
    let egress = tokio::spawn(egress_loop(sink, rx));

    info!(peer_ip = %peer_ip, authenticated = auth.is_some(), "websocket connected");
    let mut conn = Connection::new(tx, peer_ip, auth);

    // Ingest loop. The connection waits for `init` / `reconnect` before a
    // session exists; `protocol` enforces that.
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                protocol::handle_text(&state, &mut conn, text.as_str()).await;
            }
            Ok(Message::Binary(data)) => {
                protocol::handle_binary(&state, &mut conn, &data).await;
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                debug!(error = %e, "websocket read error");
                break;
            }
            // Ping/pong are answered by the library.
            Ok(_) => {}
        }
    }

    // Teardown: sever the session back-link, mark it disconnected (it stays
    // indexed for reconnect until the expiry sweep), release our reference.
    if let Some(session) = conn.session.take() {
        session.detach_outbound();
        session.mark_disconnected();
        info!(session_id = session.id(), "websocket disconnected");
    }
    drop(conn); // last egress sender drops; the egress task drains and exits
    let _ = egress.await;
}

/// Egress task: the only writer for this socket.
///
/// Exactly one envelope is consumed, encoded, and written per iteration,
/// never two writes in one turn. A failed write is terminal for the
/// connection.
async fn egress_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Envelope>,
) {
    while let Some(envelope) = rx.recv().await {
        let Some(frame) = wire::encode(envelope) else {
            // oversized or unencodable; already logged
            continue;
        };
        if let Err(e) = sink.send(frame).await {
            warn!(error = %e, "websocket write failed, closing");
            break;
        }
    }
    let _ = sink.close().await;
}
