//! Worker pipelines: one detached task per query.
//!
//! Workers own the blocking externals (LLM, ASR/TTS, command replies) and
//! never touch a socket: every result goes through the response queue. Each
//! worker holds a cancellation token capturing the generation it started
//! under and checks it at every suspension point; a superseded or
//! disconnected worker drops its results on the floor.

pub mod audio;
pub mod tools;

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use dawn_core::domain::chat::ChatMessage;
use dawn_core::domain::envelope::{AudioCodec, CODE_LLM_ERROR, CODE_PROCESSING_ERROR, Envelope, ServerState};
use dawn_core::ports::llm_client::ChatRequest;
use dawn_core::services::command_filter::extract_commands;
use dawn_core::services::{CancelToken, Session};

use crate::state::AppState;
use audio::SentenceStream;

/// Follow-up iterations after tool rounds; a non-convergent model is cut
/// off rather than allowed to spin.
const MAX_FOLLOW_UPS: usize = 5;

/// What the client handed us for this query.
pub enum QueryInput {
    Text(String),
    Audio { data: Vec<u8>, opus: bool },
}

/// Spawn a detached worker for one query.
///
/// The request generation is captured here, synchronously with message
/// processing order, so a `cancel` that arrives after this call always
/// supersedes the spawned worker.
pub fn spawn_query(state: AppState, session: Arc<Session>, input: QueryInput) {
    let cancel = session.begin_request();
    tokio::spawn(run_query(state, session, input, cancel));
}

async fn run_query(
    state: AppState,
    session: Arc<Session>,
    input: QueryInput,
    cancel: CancelToken,
) {
    let started = Instant::now();

    let (text, speak_codec) = match input {
        QueryInput::Text(text) => (text, None),
        QueryInput::Audio { data, opus } => {
            let codec = if opus { AudioCodec::Opus } else { AudioCodec::Pcm };
            match transcribe(&state, codec, &data).await {
                Ok(text) if !text.is_empty() => (text, Some(codec)),
                Ok(_) => {
                    state.queue.push(
                        &session,
                        Envelope::error(CODE_PROCESSING_ERROR, "Nothing transcribed"),
                    );
                    idle(&state, &session);
                    return;
                }
                Err(message) => {
                    state
                        .queue
                        .push(&session, Envelope::error(CODE_PROCESSING_ERROR, &message));
                    idle(&state, &session);
                    return;
                }
            }
        }
    };

    if cancel.is_cancelled() {
        return;
    }

    state.set_state(ServerState::Thinking);
    state.queue.push(
        &session,
        Envelope::State {
            state: ServerState::Thinking,
        },
    );
    state.queue.push(
        &session,
        Envelope::Transcript {
            speaker: "user".to_string(),
            text: text.clone(),
        },
    );
    session.push_history(ChatMessage::user(text));

    let mut speech = speak_codec.map(|_| SentenceStream::new());
    let mut last_usage = dawn_core::domain::llm::TokenUsage::default();

    for iteration in 0..=MAX_FOLLOW_UPS {
        let config = session.llm_config();
        let native_tools = config.native_tool_calling;

        let reply = match stream_completion(
            &state,
            &session,
            &cancel,
            ChatRequest {
                messages: session.history_snapshot(),
                config,
            },
            native_tools,
            speech.as_mut(),
            speak_codec,
        )
        .await
        {
            StreamOutcome::Cancelled => return,
            StreamOutcome::Failed(message) => {
                state
                    .queue
                    .push(&session, Envelope::error(CODE_LLM_ERROR, &message));
                idle(&state, &session);
                return;
            }
            StreamOutcome::Completed(reply) => reply,
        };
        last_usage = reply.usage;
        session.push_history(ChatMessage::assistant(reply.text.clone()));

        let tool_settings = state.settings.tools();
        let commands = if native_tools || !tool_settings.enabled {
            Vec::new()
        } else {
            extract_commands(&reply.text)
        };

        if commands.is_empty() || iteration == MAX_FOLLOW_UPS {
            if iteration == MAX_FOLLOW_UPS && !commands.is_empty() {
                warn!(
                    session_id = session.id(),
                    "follow-up limit reached with pending commands"
                );
            }
            break;
        }

        let results =
            tools::execute_commands(&state, &session, &cancel, &commands, &tool_settings).await;
        if cancel.is_cancelled() {
            return;
        }
        // debug echo of what the tools returned
        state.queue.push(
            &session,
            Envelope::Transcript {
                speaker: "tool".to_string(),
                text: results.clone(),
            },
        );
        session.push_history(ChatMessage::user(format!("Tool results:\n{results}")));
        debug!(session_id = session.id(), iteration, "tool round complete");
    }

    // final flush of any buffered speech
    if let (Some(stream), Some(codec)) = (speech.as_mut(), speak_codec) {
        if let Some(tail) = stream.flush() {
            audio::speak_sentence(&state, &session, &cancel, &tail, codec).await;
        }
    }

    if cancel.is_cancelled() {
        return;
    }

    let config = session.llm_config();
    state.queue.push(
        &session,
        Envelope::ContextUsage {
            used_tokens: last_usage.total(),
            max_tokens: config.context_window,
        },
    );
    state.queue.push(
        &session,
        Envelope::Metrics {
            prompt_tokens: last_usage.prompt_tokens,
            completion_tokens: last_usage.completion_tokens,
            latency_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        },
    );
    idle(&state, &session);
    info!(
        session_id = session.id(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "query complete"
    );
}

fn idle(state: &AppState, session: &Arc<Session>) {
    state.set_state(ServerState::Idle);
    state.queue.push(
        session,
        Envelope::State {
            state: ServerState::Idle,
        },
    );
}

async fn transcribe(
    state: &AppState,
    codec: AudioCodec,
    data: &[u8],
) -> Result<String, String> {
    let samples = state
        .decoder
        .decode_to_pcm(codec, data)
        .await
        .map_err(|e| e.to_string())?;
    state
        .asr
        .transcribe(&samples, 16_000)
        .await
        .map(|t| t.trim().to_string())
        .map_err(|e| e.to_string())
}

enum StreamOutcome {
    Completed(dawn_core::ports::llm_client::LlmReply),
    Cancelled,
    Failed(String),
}

/// Drive one streaming completion: forward filtered deltas, feed the
/// speech stream, and return the full reply.
#[allow(clippy::too_many_arguments)]
async fn stream_completion(
    state: &AppState,
    session: &Arc<Session>,
    cancel: &CancelToken,
    request: ChatRequest,
    native_tools: bool,
    mut speech: Option<&mut SentenceStream>,
    speak_codec: Option<AudioCodec>,
) -> StreamOutcome {
    let stream_id = session.begin_stream();
    session.reset_filter();
    state.queue.push(session, Envelope::StreamStart { stream_id });

    let (tx, mut rx) = mpsc::channel::<String>(32);
    let llm = Arc::clone(&state.llm);
    let call = tokio::spawn(async move { llm.chat_stream(request, tx).await });

    while let Some(delta) = rx.recv().await {
        // the active flag gates emission alongside the cancel token: a
        // cancel clears it immediately, before the generation check lands
        if cancel.is_cancelled() || !session.stream_active() {
            break;
        }
        let visible = if native_tools {
            delta
        } else {
            session.filter_delta(&delta)
        };
        if visible.is_empty() {
            continue;
        }
        session.note_stream_content();
        state.queue.push(
            session,
            Envelope::StreamDelta {
                stream_id,
                text: visible.clone(),
            },
        );
        if let (Some(stream), Some(codec)) = (&mut speech, speak_codec) {
            for sentence in stream.push(&visible) {
                audio::speak_sentence(state, session, cancel, &sentence, codec).await;
            }
        }
    }

    // close the delta channel so a backend still generating after a
    // cancel-break fails its sends instead of blocking on a full channel
    drop(rx);
    let reply = call.await;
    session.end_stream();

    if cancel.is_cancelled() {
        // no further envelopes for this generation
        return StreamOutcome::Cancelled;
    }

    match reply {
        Ok(Ok(reply)) => {
            // a partial non-tag the filter still holds is visible text
            if !native_tools {
                let tail = session.finish_filter();
                if !tail.is_empty() {
                    session.note_stream_content();
                    state.queue.push(
                        session,
                        Envelope::StreamDelta {
                            stream_id,
                            text: tail.clone(),
                        },
                    );
                    if let (Some(stream), Some(codec)) = (&mut speech, speak_codec) {
                        for sentence in stream.push(&tail) {
                            audio::speak_sentence(state, session, cancel, &sentence, codec).await;
                        }
                    }
                }
            }
            let has_tools = !native_tools && !extract_commands(&reply.text).is_empty();
            let reason = if has_tools {
                "tool_follow_up"
            } else if session.stream_had_content() {
                "complete"
            } else {
                "empty"
            };
            state.queue.push(
                session,
                Envelope::StreamEnd {
                    stream_id,
                    reason: reason.to_string(),
                },
            );
            StreamOutcome::Completed(reply)
        }
        Ok(Err(e)) => StreamOutcome::Failed(e.to_string()),
        Err(e) => StreamOutcome::Failed(format!("worker join error: {e}")),
    }
}
