//! Component tests for the WebSocket protocol and worker pipelines.
//!
//! These drive `protocol::handle_text` / `handle_binary` against a real
//! context with the outbound dispatcher running, holding the connection's
//! egress channel where the socket would be. What arrives on that channel
//! is exactly what a client would see, in the same order.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{Notify, mpsc};

use dawn_core::domain::chat::ChatMessage;
use dawn_core::domain::envelope::{Envelope, ServerState};
use dawn_core::ports::command_bus::CommandBus;
use dawn_core::ports::llm_client::{ChatRequest, LlmClient, LlmError, LlmReply};
use dawn_core::services::memory::{MemoryAuthStore, MemoryCommandBus, MemoryConversationStore};
use dawn_web::bootstrap::{GatewayConfig, ServerContext, bootstrap, bootstrap_with};
use dawn_web::loopback::LoopbackLlm;
use dawn_web::outbound;
use dawn_web::ws::connection::Connection;
use dawn_web::ws::protocol;
use dawn_web::ws::wire::{OP_AUDIO_IN, OP_AUDIO_IN_END};

fn test_config() -> GatewayConfig {
    GatewayConfig {
        document_root: std::env::temp_dir(),
        audio_buffer_cap: 64,
        ..GatewayConfig::default()
    }
}

fn connect(ctx: &Arc<ServerContext>) -> (Connection, mpsc::Receiver<Envelope>) {
    tokio::spawn(outbound::dispatch_loop(Arc::clone(ctx)));
    let (tx, rx) = mpsc::channel(256);
    (Connection::new(tx, "198.51.100.1".to_string(), None), rx)
}

async fn recv(rx: &mut mpsc::Receiver<Envelope>) -> Envelope {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for envelope")
        .expect("egress channel closed")
}

async fn assert_silent(rx: &mut mpsc::Receiver<Envelope>) {
    let outcome = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(outcome.is_err(), "unexpected envelope: {:?}", outcome.unwrap());
}

#[tokio::test]
async fn init_binds_session_and_acknowledges() {
    let ctx = bootstrap(test_config()).unwrap();
    let (mut conn, mut rx) = connect(&ctx);

    protocol::handle_text(&ctx, &mut conn, r#"{"type":"init","payload":{}}"#).await;

    let Envelope::SessionToken { token } = recv(&mut rx).await else {
        panic!("expected session token first");
    };
    assert_eq!(token.len(), 32);
    assert!(matches!(recv(&mut rx).await, Envelope::Config { .. }));
    assert!(matches!(
        recv(&mut rx).await,
        Envelope::State { state: ServerState::Idle }
    ));
    assert!(conn.session.is_some());
}

#[tokio::test]
async fn reconnect_replays_history_without_system_messages() {
    let ctx = bootstrap(test_config()).unwrap();
    let (mut conn, mut rx) = connect(&ctx);

    protocol::handle_text(&ctx, &mut conn, r#"{"type":"init","payload":{}}"#).await;
    let Envelope::SessionToken { token } = recv(&mut rx).await else {
        panic!("expected session token");
    };
    let _ = recv(&mut rx).await; // config
    let _ = recv(&mut rx).await; // state

    // one exchanged turn plus a system prompt that must not replay
    let session = conn.session.clone().unwrap();
    session.set_system_prompt("you are dawn");
    session.push_history(ChatMessage::user("what time is it"));
    session.push_history(ChatMessage::assistant("half past nine"));
    let session_id = session.id();

    // socket closes
    session.detach_outbound();
    session.mark_disconnected();
    drop(conn);
    drop(rx);

    // the client comes back with its token
    let (tx2, mut rx2) = mpsc::channel(256);
    let mut conn2 = Connection::new(tx2, "198.51.100.1".to_string(), None);
    let reconnect = json!({ "type": "reconnect", "payload": { "token": token } });
    protocol::handle_text(&ctx, &mut conn2, &reconnect.to_string()).await;

    let Envelope::SessionToken { token: token2 } = recv(&mut rx2).await else {
        panic!("expected session token");
    };
    assert_eq!(token2, token);
    assert!(matches!(recv(&mut rx2).await, Envelope::Config { .. }));

    let Envelope::Transcript { speaker, text } = recv(&mut rx2).await else {
        panic!("expected transcript replay");
    };
    assert_eq!((speaker.as_str(), text.as_str()), ("user", "what time is it"));
    let Envelope::Transcript { speaker, text } = recv(&mut rx2).await else {
        panic!("expected transcript replay");
    };
    assert_eq!((speaker.as_str(), text.as_str()), ("assistant", "half past nine"));

    assert!(matches!(
        recv(&mut rx2).await,
        Envelope::State { state: ServerState::Idle }
    ));
    assert_eq!(conn2.session.unwrap().id(), session_id);
}

#[tokio::test]
async fn unknown_reconnect_token_falls_through_to_fresh_session() {
    let ctx = bootstrap(test_config()).unwrap();
    let (mut conn, mut rx) = connect(&ctx);

    let reconnect = json!({
        "type": "reconnect",
        "payload": { "token": "feedfacefeedfacefeedfacefeedface" },
    });
    protocol::handle_text(&ctx, &mut conn, &reconnect.to_string()).await;

    // a fresh token, not the bogus one
    let Envelope::SessionToken { token } = recv(&mut rx).await else {
        panic!("expected session token");
    };
    assert_ne!(token, "feedfacefeedfacefeedfacefeedface");
    assert!(conn.session.is_some());
}

#[tokio::test]
async fn text_query_streams_and_returns_to_idle() {
    let ctx = bootstrap(test_config()).unwrap();
    let (mut conn, mut rx) = connect(&ctx);

    protocol::handle_text(&ctx, &mut conn, r#"{"type":"init","payload":{}}"#).await;
    for _ in 0..3 {
        let _ = recv(&mut rx).await;
    }

    let query = json!({ "type": "text_query", "payload": { "text": "hello" } });
    protocol::handle_text(&ctx, &mut conn, &query.to_string()).await;

    assert!(matches!(
        recv(&mut rx).await,
        Envelope::State { state: ServerState::Thinking }
    ));
    let Envelope::Transcript { speaker, text } = recv(&mut rx).await else {
        panic!("expected user echo");
    };
    assert_eq!((speaker.as_str(), text.as_str()), ("user", "hello"));

    let Envelope::StreamStart { stream_id } = recv(&mut rx).await else {
        panic!("expected stream start");
    };

    let mut streamed = String::new();
    loop {
        match recv(&mut rx).await {
            Envelope::StreamDelta {
                stream_id: delta_id,
                text,
            } => {
                assert_eq!(delta_id, stream_id);
                streamed.push_str(&text);
            }
            Envelope::StreamEnd {
                stream_id: end_id,
                reason,
            } => {
                assert_eq!(end_id, stream_id);
                assert_eq!(reason, "complete");
                break;
            }
            other => panic!("unexpected envelope during stream: {other:?}"),
        }
    }
    assert_eq!(streamed, "You said: hello");

    assert!(matches!(recv(&mut rx).await, Envelope::ContextUsage { .. }));
    assert!(matches!(recv(&mut rx).await, Envelope::Metrics { .. }));
    assert!(matches!(
        recv(&mut rx).await,
        Envelope::State { state: ServerState::Idle }
    ));

    // history recorded both turns
    let session = conn.session.unwrap();
    let history = session.history_snapshot();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].content, "You said: hello");
}

#[tokio::test]
async fn stream_ids_increase_across_queries() {
    let ctx = bootstrap(test_config()).unwrap();
    let (mut conn, mut rx) = connect(&ctx);
    protocol::handle_text(&ctx, &mut conn, r#"{"type":"init","payload":{}}"#).await;
    for _ in 0..3 {
        let _ = recv(&mut rx).await;
    }

    let mut seen_ids = Vec::new();
    for i in 0..3 {
        let query = json!({ "type": "text_query", "payload": { "text": format!("q{i}") } });
        protocol::handle_text(&ctx, &mut conn, &query.to_string()).await;
        loop {
            match recv(&mut rx).await {
                Envelope::StreamStart { stream_id } => seen_ids.push(stream_id),
                Envelope::State { state: ServerState::Idle } => break,
                _ => {}
            }
        }
    }
    assert_eq!(seen_ids.len(), 3);
    assert!(seen_ids.windows(2).all(|w| w[0] < w[1]));
}

/// An LLM that blocks until released, for deterministic cancellation tests.
struct GatedLlm {
    gate: Arc<Notify>,
    release_text: String,
}

#[async_trait::async_trait]
impl LlmClient for GatedLlm {
    async fn chat_stream(
        &self,
        _request: ChatRequest,
        deltas: mpsc::Sender<String>,
    ) -> Result<LlmReply, LlmError> {
        self.gate.notified().await;
        let _ = deltas.send(self.release_text.clone()).await;
        Ok(LlmReply {
            text: self.release_text.clone(),
            usage: dawn_core::domain::llm::TokenUsage::default(),
        })
    }

    async fn list_models(
        &self,
        _provider: dawn_core::domain::llm::LlmProvider,
    ) -> Result<Vec<String>, LlmError> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn cancel_supersedes_inflight_query() {
    let gate = Arc::new(Notify::new());
    let ctx = bootstrap_with(
        test_config(),
        Arc::new(MemoryAuthStore::new()),
        Arc::new(MemoryConversationStore::new()),
        Arc::new(MemoryCommandBus::new()),
        Arc::new(GatedLlm {
            gate: Arc::clone(&gate),
            release_text: "too late".to_string(),
        }),
    )
    .unwrap();
    let (mut conn, mut rx) = connect(&ctx);

    protocol::handle_text(&ctx, &mut conn, r#"{"type":"init","payload":{}}"#).await;
    for _ in 0..3 {
        let _ = recv(&mut rx).await;
    }

    let query = json!({ "type": "text_query", "payload": { "text": "never mind" } });
    protocol::handle_text(&ctx, &mut conn, &query.to_string()).await;

    // the worker reaches the gated LLM call
    assert!(matches!(
        recv(&mut rx).await,
        Envelope::State { state: ServerState::Thinking }
    ));
    assert!(matches!(recv(&mut rx).await, Envelope::Transcript { .. }));
    assert!(matches!(recv(&mut rx).await, Envelope::StreamStart { .. }));

    // cancel: idle arrives promptly
    protocol::handle_text(&ctx, &mut conn, r#"{"type":"cancel"}"#).await;
    assert!(matches!(
        recv(&mut rx).await,
        Envelope::State { state: ServerState::Idle }
    ));

    // release the backend; the superseded worker must stay silent
    gate.notify_one();
    assert_silent(&mut rx).await;
}

#[tokio::test]
async fn audio_overflow_aborts_utterance() {
    let ctx = bootstrap(test_config()).unwrap(); // 64-byte cap
    let (mut conn, mut rx) = connect(&ctx);

    protocol::handle_text(&ctx, &mut conn, r#"{"type":"init","payload":{}}"#).await;
    for _ in 0..3 {
        let _ = recv(&mut rx).await;
    }

    let mut frame = vec![OP_AUDIO_IN];
    frame.extend_from_slice(&[0u8; 100]);
    protocol::handle_binary(&ctx, &mut conn, &frame).await;

    let Envelope::Error { code, .. } = recv(&mut rx).await else {
        panic!("expected buffer-full error");
    };
    assert_eq!(code, "BUFFER_FULL");

    // the end marker after an overflow is a no-op: no worker, no envelopes
    protocol::handle_binary(&ctx, &mut conn, &[OP_AUDIO_IN_END]).await;
    assert_silent(&mut rx).await;

    // the next utterance accumulates from scratch
    let mut small = vec![OP_AUDIO_IN];
    small.extend_from_slice(&[0u8; 32]);
    protocol::handle_binary(&ctx, &mut conn, &small).await;
    assert_silent(&mut rx).await;
    assert_eq!(conn.audio_buffer.len(), 32);
}

#[tokio::test]
async fn stalled_client_does_not_block_other_sessions() {
    let ctx = bootstrap(test_config()).unwrap();
    tokio::spawn(outbound::dispatch_loop(Arc::clone(&ctx)));

    // a stalled connection: depth-2 egress channel that is never drained
    let (stalled_tx, mut stalled_rx) = mpsc::channel(2);
    let stalled = ctx
        .sessions
        .create(
            dawn_core::domain::session::SessionKind::Websocket,
            ctx.settings.llm_defaults(),
        )
        .unwrap();
    stalled.attach_outbound(stalled_tx);

    // a healthy connection behind it in the queue
    let (healthy_tx, mut healthy_rx) = mpsc::channel(8);
    let healthy = ctx
        .sessions
        .create(
            dawn_core::domain::session::SessionKind::Websocket,
            ctx.settings.llm_defaults(),
        )
        .unwrap();
    healthy.attach_outbound(healthy_tx);

    // flood the stalled client far past its egress depth, then queue one
    // envelope for the healthy one
    for i in 0..20 {
        ctx.queue.push(
            &stalled,
            Envelope::StreamDelta {
                stream_id: 1,
                text: format!("d{i}"),
            },
        );
    }
    ctx.queue.push(&healthy, Envelope::AudioEnd);

    // the healthy client's envelope arrives even though the stalled one
    // never read a byte
    assert!(matches!(recv(&mut healthy_rx).await, Envelope::AudioEnd));

    // the stalled client holds exactly its channel depth; the overflow
    // was shed, not deferred
    assert!(stalled_rx.try_recv().is_ok());
    assert!(stalled_rx.try_recv().is_ok());
    assert!(stalled_rx.try_recv().is_err());
}

#[tokio::test]
async fn outbound_audio_respects_chunk_bound() {
    let ctx = bootstrap(GatewayConfig {
        audio_chunk_bytes: 128,
        ..test_config()
    })
    .unwrap();
    let session = ctx
        .sessions
        .create(
            dawn_core::domain::session::SessionKind::Websocket,
            ctx.settings.llm_defaults(),
        )
        .unwrap();
    let cancel = session.begin_request();

    // loopback TTS yields 16 samples (32 bytes) per character
    let sentence = "a".repeat(400);
    dawn_web::workers::audio::speak_sentence(
        &ctx,
        &session,
        &cancel,
        &sentence,
        dawn_core::domain::envelope::AudioCodec::Pcm,
    )
    .await;

    let mut chunks = 0;
    let mut saw_end = false;
    while let Some(entry) = ctx.queue.pop() {
        match entry.envelope {
            Envelope::AudioChunk { data, .. } => {
                assert!(!saw_end, "chunk after segment end");
                assert!(data.len() <= 128, "chunk of {} bytes", data.len());
                chunks += 1;
            }
            Envelope::AudioEnd => saw_end = true,
            other => panic!("unexpected envelope: {other:?}"),
        }
    }
    assert!(saw_end);
    assert!(chunks >= 100, "expected many bounded chunks, got {chunks}");
}

#[tokio::test]
async fn command_markup_is_filtered_and_tools_run() {
    let llm = Arc::new(LoopbackLlm::new());
    llm.script("On it. <command>{\"name\":\"light\",\"on\":true}</command>");
    llm.script("The light is on.");
    let bus = Arc::new(MemoryCommandBus::new());

    let ctx = bootstrap_with(
        test_config(),
        Arc::new(MemoryAuthStore::new()),
        Arc::new(MemoryConversationStore::new()),
        Arc::clone(&bus) as Arc<dyn CommandBus>,
        Arc::clone(&llm) as Arc<dyn LlmClient>,
    )
    .unwrap();
    let (mut conn, mut rx) = connect(&ctx);

    protocol::handle_text(&ctx, &mut conn, r#"{"type":"init","payload":{}}"#).await;
    for _ in 0..3 {
        let _ = recv(&mut rx).await;
    }

    // reply to the published command as the device plane would
    let responder = {
        let bus = Arc::clone(&bus);
        tokio::spawn(async move {
            loop {
                let published = bus.published();
                if let Some((_, payload)) = published.last() {
                    let id = payload["request_id"].as_u64().unwrap();
                    bus.complete(id, json!({ "ok": true }));
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
    };

    let query = json!({ "type": "text_query", "payload": { "text": "light on" } });
    protocol::handle_text(&ctx, &mut conn, &query.to_string()).await;

    let mut visible = String::new();
    let mut tool_echo = None;
    let mut stream_ends = Vec::new();
    loop {
        match recv(&mut rx).await {
            Envelope::StreamDelta { text, .. } => visible.push_str(&text),
            Envelope::StreamEnd { reason, .. } => stream_ends.push(reason),
            Envelope::Transcript { speaker, text } if speaker == "tool" => {
                tool_echo = Some(text);
            }
            Envelope::State { state: ServerState::Idle } => break,
            _ => {}
        }
    }
    responder.await.unwrap();

    // the command block never reached the visible stream
    assert!(!visible.contains("<command>"), "visible: {visible}");
    assert!(visible.contains("On it."));
    assert!(visible.contains("The light is on."));
    // first stream ended for a tool round, second completed
    assert_eq!(stream_ends, vec!["tool_follow_up", "complete"]);
    // the device reply was echoed for debugging
    assert!(tool_echo.unwrap().contains("\"ok\":true"));
}
