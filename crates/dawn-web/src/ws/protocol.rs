//! JSON command dispatch and binary frame handling for one connection.
//!
//! All text frames are `{type, payload?}`. Unknown types are logged and
//! ignored. Admin-only types re-read `is_admin` from the auth store before
//! any side effect; generic authenticated guards re-read too, so revocation
//! takes effect on the next message. Handlers never write to the socket;
//! replies go through the response queue (or, before a session is bound,
//! directly onto this connection's egress channel).

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

use dawn_core::domain::envelope::{
    CODE_BUFFER_FULL, CODE_MAX_CLIENTS, Envelope, ServerState,
};
use dawn_core::domain::llm::{LlmConfig, LlmProvider};
use dawn_core::domain::session::{SatelliteIdentity, SatelliteTier, SessionKind};
use dawn_core::ports::auth_store::{AuthSession, NewUser};
use dawn_core::services::passwords;
use dawn_core::settings::{PersonalSettings, ToolSettings};

use crate::state::AppState;
use crate::workers::{self, QueryInput};
use crate::ws::connection::Connection;
use crate::ws::wire;

/// Capability lists longer than this are rejected outright.
const MAX_CAPABILITY_ENTRIES: usize = 16;

#[derive(Debug, Deserialize)]
struct ClientMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

/// Queue an error envelope for this connection.
async fn send_error(state: &AppState, conn: &Connection, code: &str, message: &str) {
    let envelope = Envelope::error(code, message);
    match &conn.session {
        Some(session) => state.queue.push(session, envelope),
        None => conn.send_direct(envelope).await,
    }
}

/// Re-read the auth session from the store; `None` means the cookie was
/// absent, expired, or revoked since the upgrade.
async fn live_auth(state: &AppState, conn: &Connection) -> Option<AuthSession> {
    let auth = conn.auth.as_ref()?;
    state.auth.get_session(&auth.token).await.ok().flatten()
}

async fn require_auth(state: &AppState, conn: &Connection) -> Option<AuthSession> {
    match live_auth(state, conn).await {
        Some(session) => Some(session),
        None => {
            send_error(state, conn, "UNAUTHENTICATED", "Sign in required").await;
            None
        }
    }
}

async fn require_admin(state: &AppState, conn: &Connection) -> Option<AuthSession> {
    match live_auth(state, conn).await {
        Some(session) if session.is_admin => Some(session),
        Some(_) => {
            send_error(state, conn, "FORBIDDEN", "Administrator access required").await;
            None
        }
        None => {
            send_error(state, conn, "UNAUTHENTICATED", "Sign in required").await;
            None
        }
    }
}

fn reply(state: &AppState, conn: &Connection, kind: &str, value: Value) {
    if let Some(session) = &conn.session {
        state.queue.push(
            session,
            Envelope::Data {
                kind: kind.to_string(),
                value,
            },
        );
    }
}

/// Entry point for one text frame.
pub async fn handle_text(state: &AppState, conn: &mut Connection, raw: &str) {
    let message: ClientMessage = match serde_json::from_str(raw) {
        Ok(message) => message,
        Err(e) => {
            debug!(error = %e, "unparseable client message");
            send_error(state, conn, "INVALID_JSON", "Message is not valid JSON").await;
            return;
        }
    };

    // Session binding must happen first; everything else needs a session.
    match message.kind.as_str() {
        "init" => return handle_init(state, conn, &message.payload).await,
        "reconnect" => return handle_reconnect(state, conn, &message.payload).await,
        "register" => return handle_register(state, conn, &message.payload).await,
        _ => {}
    }

    let Some(session) = conn.session.clone() else {
        send_error(state, conn, "NOT_INITIALIZED", "Send init or reconnect first").await;
        return;
    };
    session.touch();

    match message.kind.as_str() {
        "text_query" => {
            let Some(text) = message.payload["text"].as_str().filter(|t| !t.is_empty())
            else {
                send_error(state, conn, "MISSING_FIELD", "text is required").await;
                return;
            };
            state.count_query();
            workers::spawn_query(
                state.clone(),
                session,
                QueryInput::Text(text.to_string()),
            );
        }
        "cancel" => {
            // Supersede any in-flight work for this session and report idle
            // immediately; workers observe the stale generation at their
            // next checkpoint and drop their results.
            drop(session.begin_request());
            session.end_stream();
            state.set_state(ServerState::Idle);
            state.queue.push(
                &session,
                Envelope::State {
                    state: ServerState::Idle,
                },
            );
        }
        "compact_history" => {
            let keep = usize::try_from(message.payload["keep"].as_u64().unwrap_or(20))
                .unwrap_or(usize::MAX);
            let removed = session.compact_history(keep);
            state
                .queue
                .push(&session, Envelope::CompactionComplete { removed });
        }
        "set_session_llm" => handle_set_session_llm(state, conn, &session, &message.payload).await,
        "list_models" => {
            let provider = session.llm_config().provider;
            match state.llm.list_models(provider).await {
                Ok(models) => reply(state, conn, "models", json!(models)),
                Err(e) => {
                    send_error(state, conn, "LLM_ERROR", &e.to_string()).await;
                }
            }
        }
        "list_interfaces" => {
            reply(
                state,
                conn,
                "interfaces",
                json!([{
                    "bind": state.config.bind_addr,
                    "port": state.config.port,
                    "tls": state.config.tls.is_some(),
                }]),
            );
        }
        "list_audio_devices" => {
            // remote connections have no device enumeration
            reply(state, conn, "audio-devices", json!([]));
        }
        "get_config" => {
            if require_admin(state, conn).await.is_some() {
                reply(state, conn, "config", json!(state.settings.snapshot()));
            }
        }
        "set_config" => handle_set_config(state, conn, &message.payload).await,
        "get_secrets" => {
            if require_admin(state, conn).await.is_some() {
                let statuses: Vec<Value> = state
                    .settings
                    .secret_statuses()
                    .into_iter()
                    .map(|(name, status)| json!({ "name": name, "status": status }))
                    .collect();
                reply(state, conn, "secrets", json!(statuses));
            }
        }
        "set_secret" => {
            if require_admin(state, conn).await.is_some() {
                let (Some(name), Some(value)) = (
                    message.payload["name"].as_str(),
                    message.payload["value"].as_str(),
                ) else {
                    send_error(state, conn, "MISSING_FIELD", "name and value are required").await;
                    return;
                };
                state.settings.set_secret(name, value);
                info!(secret = name, "secret updated");
                reply(state, conn, "secrets", json!({ "updated": name }));
            }
        }
        "get_tool_config" => {
            if require_admin(state, conn).await.is_some() {
                reply(state, conn, "tool-config", json!(state.settings.tools()));
            }
        }
        "set_tool_config" => {
            if require_admin(state, conn).await.is_some() {
                match serde_json::from_value::<ToolSettings>(message.payload.clone()) {
                    Ok(tools) => {
                        state.settings.set_tools(tools);
                        reply(state, conn, "tool-config", json!(state.settings.tools()));
                    }
                    Err(e) => {
                        send_error(state, conn, "INVALID_CONFIG", &e.to_string()).await;
                    }
                }
            }
        }
        "get_personal" => {
            if require_auth(state, conn).await.is_some() {
                reply(state, conn, "personal", json!(state.settings.personal()));
            }
        }
        "set_personal" => {
            if require_auth(state, conn).await.is_some() {
                match serde_json::from_value::<PersonalSettings>(message.payload.clone()) {
                    Ok(personal) => {
                        // a changed system prompt applies to the live session
                        // without clearing its history
                        if let Some(prompt) = personal.system_prompt.clone() {
                            session.set_system_prompt(prompt);
                        }
                        state.settings.set_personal(personal);
                        reply(state, conn, "personal", json!(state.settings.personal()));
                    }
                    Err(e) => {
                        send_error(state, conn, "INVALID_CONFIG", &e.to_string()).await;
                    }
                }
            }
        }
        "list_auth_sessions" => {
            if let Some(auth) = require_auth(state, conn).await {
                match state.auth.list_sessions(auth.user_id).await {
                    Ok(sessions) => {
                        let list: Vec<Value> = sessions
                            .iter()
                            .map(|s| {
                                json!({
                                    "token": s.token,
                                    "issued_ip": s.issued_ip,
                                    "user_agent": s.user_agent,
                                    "created_at": s.created_at,
                                    "last_activity": s.last_activity,
                                })
                            })
                            .collect();
                        reply(state, conn, "auth-sessions", json!(list));
                    }
                    Err(e) => send_error(state, conn, "PROCESSING_ERROR", &e.to_string()).await,
                }
            }
        }
        "revoke_auth_session" => {
            if let Some(auth) = require_auth(state, conn).await {
                let Some(token) = message.payload["token"].as_str() else {
                    send_error(state, conn, "MISSING_FIELD", "token is required").await;
                    return;
                };
                // only the caller's own sessions can be revoked here
                let owned = state
                    .auth
                    .list_sessions(auth.user_id)
                    .await
                    .map(|list| list.iter().any(|s| s.token == token))
                    .unwrap_or(false);
                if owned {
                    let _ = state.auth.delete_session(token).await;
                    reply(state, conn, "auth-sessions", json!({ "revoked": true }));
                } else {
                    send_error(state, conn, "FORBIDDEN", "Not your session").await;
                }
            }
        }
        "list_users" => {
            if require_admin(state, conn).await.is_some() {
                match state.auth.list_users().await {
                    Ok(users) => {
                        let list: Vec<Value> = users
                            .iter()
                            .map(|u| {
                                json!({
                                    "id": u.id,
                                    "username": u.username,
                                    "is_admin": u.is_admin,
                                    "locked": u.locked,
                                })
                            })
                            .collect();
                        reply(state, conn, "users", json!(list));
                    }
                    Err(e) => send_error(state, conn, "PROCESSING_ERROR", &e.to_string()).await,
                }
            }
        }
        "create_user" => handle_create_user(state, conn, &message.payload).await,
        "delete_user" => {
            if require_admin(state, conn).await.is_some() {
                let Some(username) = message.payload["username"].as_str() else {
                    send_error(state, conn, "MISSING_FIELD", "username is required").await;
                    return;
                };
                match state.auth.delete_user(username).await {
                    Ok(()) => reply(state, conn, "users", json!({ "deleted": username })),
                    Err(e) => send_error(state, conn, "PROCESSING_ERROR", &e.to_string()).await,
                }
            }
        }
        "change_password" => handle_change_password(state, conn, &message.payload).await,
        "lock_user" | "unlock_user" => {
            if require_admin(state, conn).await.is_some() {
                let Some(username) = message.payload["username"].as_str() else {
                    send_error(state, conn, "MISSING_FIELD", "username is required").await;
                    return;
                };
                let locked = message.kind == "lock_user";
                match state.auth.set_locked(username, locked).await {
                    Ok(()) => reply(state, conn, "users", json!({ "username": username, "locked": locked })),
                    Err(e) => send_error(state, conn, "PROCESSING_ERROR", &e.to_string()).await,
                }
            }
        }
        "list_conversations"
        | "create_conversation"
        | "get_conversation"
        | "rename_conversation"
        | "delete_conversation"
        | "search_conversations" => {
            handle_conversation(state, conn, &message.kind, &message.payload).await;
        }
        "smartthings_oauth" => {
            if require_auth(state, conn).await.is_some() {
                match state
                    .command_bus
                    .publish("smartthings/oauth", message.payload.clone())
                    .await
                {
                    Ok(()) => reply(state, conn, "smartthings", json!({ "forwarded": true })),
                    Err(e) => send_error(state, conn, "PROCESSING_ERROR", &e.to_string()).await,
                }
            }
        }
        "restart" => {
            if require_admin(state, conn).await.is_some() {
                info!("restart requested");
                reply(state, conn, "restart", json!({ "restarting": true }));
                state.restart.notify_waiters();
            }
        }
        other => {
            debug!(kind = other, "unknown message type ignored");
        }
    }
}

// ── Handshake ─────────────────────────────────────────────────────────────

async fn handle_init(state: &AppState, conn: &mut Connection, payload: &Value) {
    if conn.session.is_some() {
        send_error(state, conn, "ALREADY_INITIALIZED", "Session already bound").await;
        return;
    }
    if !negotiate_capabilities(state, conn, payload).await {
        return;
    }

    let session = match state
        .sessions
        .create(SessionKind::Websocket, state.settings.llm_defaults())
    {
        Ok(session) => session,
        Err(e) => {
            warn!(error = %e, "init refused: at capacity");
            conn.send_direct(Envelope::Error {
                code: CODE_MAX_CLIENTS.to_string(),
                message: "Server is at its client limit".to_string(),
                recoverable: false,
            })
            .await;
            return;
        }
    };

    let token = match state.reconnect_tokens.issue(session.id()) {
        Ok(token) => token,
        Err(e) => {
            warn!(error = %e, "reconnect token issuance failed");
            let _ = state.sessions.destroy(session.id());
            conn.send_direct(Envelope::error("PROCESSING_ERROR", "Token issuance failed"))
                .await;
            return;
        }
    };

    conn.reconnect_token = Some(token.clone());
    conn.bind_session(session.clone());
    state.queue.push(&session, Envelope::SessionToken { token });
    state.queue.push(
        &session,
        Envelope::Config {
            llm: session.llm_config(),
        },
    );
    state.queue.push(
        &session,
        Envelope::State {
            state: state.state(),
        },
    );
}

async fn handle_reconnect(state: &AppState, conn: &mut Connection, payload: &Value) {
    if conn.session.is_some() {
        send_error(state, conn, "ALREADY_INITIALIZED", "Session already bound").await;
        return;
    }

    let token = payload["token"].as_str();
    let revived = token
        .and_then(|t| state.reconnect_tokens.lookup(t))
        .and_then(|id| state.sessions.get_for_reconnect(id));

    let Some(session) = revived else {
        // destroyed or unknown token: a fresh session is the right outcome
        debug!("reconnect token did not resolve, falling through to init");
        handle_init(state, conn, payload).await;
        return;
    };

    info!(session_id = session.id(), "websocket reconnected");
    conn.reconnect_token = token.map(ToString::to_string);
    conn.bind_session(session.clone());

    state.queue.push(
        &session,
        Envelope::SessionToken {
            token: conn.reconnect_token.clone().unwrap_or_default(),
        },
    );
    state.queue.push(
        &session,
        Envelope::Config {
            llm: session.llm_config(),
        },
    );
    for envelope in wire::replay_envelopes(&session.history_for_replay()) {
        state.queue.push(&session, envelope);
    }
    state.queue.push(
        &session,
        Envelope::State {
            state: state.state(),
        },
    );
}

async fn handle_register(state: &AppState, conn: &mut Connection, payload: &Value) {
    if conn.session.is_some() {
        send_error(state, conn, "ALREADY_INITIALIZED", "Session already bound").await;
        return;
    }
    if !negotiate_capabilities(state, conn, payload).await {
        return;
    }

    let Some(uuid) = payload["uuid"].as_str().and_then(|u| Uuid::parse_str(u).ok())
    else {
        send_error(state, conn, "INVALID_UUID", "A valid uuid is required").await;
        return;
    };
    let tier = match payload["tier"].as_str() {
        Some("tier1" | "1") => SatelliteTier::Tier1,
        Some("tier2" | "2") => SatelliteTier::Tier2,
        _ => {
            send_error(state, conn, "MISSING_FIELD", "tier must be tier1 or tier2").await;
            return;
        }
    };
    let identity = SatelliteIdentity {
        uuid,
        name: payload["name"].as_str().unwrap_or("satellite").to_string(),
        location: payload["location"].as_str().unwrap_or("").to_string(),
    };

    let (session, reconnected) = match state.sessions.register_satellite(
        identity,
        tier,
        state.settings.llm_defaults(),
    ) {
        Ok(result) => result,
        Err(e) => {
            warn!(error = %e, "satellite registration refused");
            conn.send_direct(Envelope::Error {
                code: CODE_MAX_CLIENTS.to_string(),
                message: "Server is at its client limit".to_string(),
                recoverable: false,
            })
            .await;
            return;
        }
    };

    let token = match state.reconnect_tokens.issue(session.id()) {
        Ok(token) => token,
        Err(e) => {
            warn!(error = %e, "reconnect token issuance failed");
            conn.send_direct(Envelope::error("PROCESSING_ERROR", "Token issuance failed"))
                .await;
            return;
        }
    };

    conn.reconnect_token = Some(token.clone());
    conn.bind_session(session.clone());
    state.queue.push(&session, Envelope::SessionToken { token });
    state.queue.push(
        &session,
        Envelope::Config {
            llm: session.llm_config(),
        },
    );
    if reconnected {
        for envelope in wire::replay_envelopes(&session.history_for_replay()) {
            state.queue.push(&session, envelope);
        }
    }
    state.queue.push(
        &session,
        Envelope::State {
            state: state.state(),
        },
    );
}

/// Parse `capabilities.audio_codecs`; sets the connection's Opus flag.
/// Returns false (after sending an error) when the list is oversized.
async fn negotiate_capabilities(
    state: &AppState,
    conn: &mut Connection,
    payload: &Value,
) -> bool {
    let Some(codecs) = payload["capabilities"]["audio_codecs"].as_array() else {
        return true;
    };
    if codecs.len() > MAX_CAPABILITY_ENTRIES {
        send_error(state, conn, "INVALID_CAPABILITIES", "Too many codec entries").await;
        return false;
    }
    conn.opus = codecs.iter().any(|c| c.as_str() == Some("opus"));
    true
}

// ── Config / users / conversations ────────────────────────────────────────

async fn handle_set_config(state: &AppState, conn: &Connection, payload: &Value) {
    if require_admin(state, conn).await.is_none() {
        return;
    }
    match serde_json::from_value::<LlmConfig>(payload["llm"].clone()) {
        Ok(config) => match state.settings.set_llm_defaults(config) {
            Ok(()) => reply(state, conn, "config", json!(state.settings.snapshot())),
            Err(e) => send_error(state, conn, "INVALID_CONFIG", &e.to_string()).await,
        },
        Err(e) => send_error(state, conn, "INVALID_CONFIG", &e.to_string()).await,
    }
}

async fn handle_set_session_llm(
    state: &AppState,
    conn: &Connection,
    session: &std::sync::Arc<dawn_core::services::Session>,
    payload: &Value,
) {
    let mut config = session.llm_config();
    if let Some(provider) = payload["provider"].as_str() {
        let Some(provider) = LlmProvider::parse(provider) else {
            send_error(state, conn, "INVALID_CONFIG", "Unknown provider").await;
            return;
        };
        config.provider = provider;
    }
    if let Some(model) = payload["model"].as_str() {
        config.model = model.to_string();
    }
    if let Some(temperature) = payload["temperature"].as_f64() {
        #[allow(clippy::cast_possible_truncation)]
        {
            config.temperature = Some(temperature as f32);
        }
    }
    if let Some(max_tokens) = payload["max_tokens"].as_u64() {
        config.max_tokens = u32::try_from(max_tokens).ok();
    }
    if let Some(native) = payload["native_tool_calling"].as_bool() {
        config.native_tool_calling = native;
    }

    if let Err(e) = state.settings.validate_llm(&config) {
        send_error(state, conn, "INVALID_CONFIG", &e.to_string()).await;
        return;
    }
    session.set_llm_config(config.clone());
    state.queue.push(session, Envelope::Config { llm: config });
}

async fn handle_create_user(state: &AppState, conn: &Connection, payload: &Value) {
    if require_admin(state, conn).await.is_none() {
        return;
    }
    let (Some(username), Some(password)) = (
        payload["username"].as_str(),
        payload["password"].as_str(),
    ) else {
        send_error(state, conn, "MISSING_FIELD", "username and password are required").await;
        return;
    };
    let hash = match passwords::hash_password(password) {
        Ok(hash) => hash,
        Err(e) => {
            send_error(state, conn, "PROCESSING_ERROR", &e.to_string()).await;
            return;
        }
    };
    let result = state
        .auth
        .create_user(NewUser {
            username: username.to_string(),
            password_hash: hash,
            is_admin: payload["is_admin"].as_bool().unwrap_or(false),
        })
        .await;
    match result {
        Ok(id) => reply(state, conn, "users", json!({ "created": username, "id": id })),
        Err(e) => send_error(state, conn, "PROCESSING_ERROR", &e.to_string()).await,
    }
}

async fn handle_change_password(state: &AppState, conn: &Connection, payload: &Value) {
    let Some(auth) = require_auth(state, conn).await else {
        return;
    };
    let Some(new_password) = payload["new_password"].as_str() else {
        send_error(state, conn, "MISSING_FIELD", "new_password is required").await;
        return;
    };
    let target = payload["username"].as_str().unwrap_or(&auth.username);

    if target == auth.username {
        // self-service requires the current password
        let Some(old) = payload["old_password"].as_str() else {
            send_error(state, conn, "MISSING_FIELD", "old_password is required").await;
            return;
        };
        let Ok(Some(user)) = state.auth.get_user(&auth.username).await else {
            send_error(state, conn, "PROCESSING_ERROR", "User lookup failed").await;
            return;
        };
        if !passwords::verify_password(&user.password_hash, old) {
            send_error(state, conn, "FORBIDDEN", "Current password is wrong").await;
            return;
        }
    } else if require_admin(state, conn).await.is_none() {
        return;
    }

    match passwords::hash_password(new_password) {
        Ok(hash) => match state.auth.set_password_hash(target, hash).await {
            Ok(()) => reply(state, conn, "users", json!({ "password_changed": target })),
            Err(e) => send_error(state, conn, "PROCESSING_ERROR", &e.to_string()).await,
        },
        Err(e) => send_error(state, conn, "PROCESSING_ERROR", &e.to_string()).await,
    }
}

async fn handle_conversation(state: &AppState, conn: &Connection, kind: &str, payload: &Value) {
    let Some(auth) = require_auth(state, conn).await else {
        return;
    };
    let offset = usize::try_from(payload["offset"].as_u64().unwrap_or(0)).unwrap_or(0);
    let limit = usize::try_from(payload["limit"].as_u64().unwrap_or(50)).unwrap_or(50);

    let result = match kind {
        "list_conversations" => state
            .conversations
            .list(auth.user_id, offset, limit)
            .await
            .map(|page| json!(page)),
        "create_conversation" => {
            let title = payload["title"].as_str().unwrap_or("New conversation");
            state
                .conversations
                .create(auth.user_id, title.to_string())
                .await
                .map(|id| json!({ "id": id }))
        }
        "search_conversations" => {
            let query = payload["query"].as_str().unwrap_or("");
            state
                .conversations
                .search(auth.user_id, query, offset, limit)
                .await
                .map(|page| json!(page))
        }
        _ => {
            // the remaining operations address one conversation and check
            // ownership first
            let Some(id) = payload["id"].as_u64() else {
                send_error(state, conn, "MISSING_FIELD", "id is required").await;
                return;
            };
            match state.conversations.get(id).await {
                Ok((conversation, messages)) => {
                    if conversation.user_id != auth.user_id {
                        send_error(state, conn, "FORBIDDEN", "Not your conversation").await;
                        return;
                    }
                    match kind {
                        "get_conversation" => Ok(json!({
                            "conversation": conversation,
                            "messages": messages,
                        })),
                        "rename_conversation" => {
                            let title = payload["title"].as_str().unwrap_or("Untitled");
                            state
                                .conversations
                                .rename(id, title.to_string())
                                .await
                                .map(|()| json!({ "renamed": id }))
                        }
                        "delete_conversation" => state
                            .conversations
                            .delete(id)
                            .await
                            .map(|()| json!({ "deleted": id })),
                        _ => return,
                    }
                }
                Err(e) => Err(e),
            }
        }
    };

    match result {
        Ok(value) => reply(state, conn, "conversations", value),
        Err(e) => send_error(state, conn, "PROCESSING_ERROR", &e.to_string()).await,
    }
}

// ── Binary frames ─────────────────────────────────────────────────────────

/// Entry point for one binary frame: first byte is the opcode.
pub async fn handle_binary(state: &AppState, conn: &mut Connection, data: &[u8]) {
    let Some((&opcode, payload)) = data.split_first() else {
        return;
    };
    let Some(session) = conn.session.clone() else {
        send_error(state, conn, "NOT_INITIALIZED", "Send init or reconnect first").await;
        return;
    };

    match opcode {
        wire::OP_AUDIO_IN => {
            if conn.audio_overflowed {
                return;
            }
            if conn.audio_buffer.len() + payload.len() > state.config.audio_buffer_cap {
                warn!(
                    session_id = session.id(),
                    cap = state.config.audio_buffer_cap,
                    "utterance exceeded audio buffer cap"
                );
                conn.audio_buffer.clear();
                conn.audio_overflowed = true;
                state.queue.push(
                    &session,
                    Envelope::error(CODE_BUFFER_FULL, "Utterance too long, discarded"),
                );
                return;
            }
            conn.audio_buffer.extend_from_slice(payload);
        }
        wire::OP_AUDIO_IN_END => {
            if conn.audio_overflowed {
                // the aborted utterance's end marker is a no-op
                conn.audio_overflowed = false;
                conn.audio_buffer.clear();
                return;
            }
            if conn.audio_buffer.is_empty() {
                return;
            }
            let utterance = std::mem::take(&mut conn.audio_buffer);
            state.count_query();
            workers::spawn_query(
                state.clone(),
                session,
                QueryInput::Audio {
                    data: utterance,
                    opus: conn.opus,
                },
            );
        }
        other => {
            debug!(opcode = other, "unknown binary opcode ignored");
        }
    }
}
