//! Wire encoding: envelopes to WebSocket frames.
//!
//! Text frames are JSON `{type, payload}`; binary frames carry a one-byte
//! opcode followed by the payload. One envelope encodes to at most one
//! frame, preserving the one-write-per-dispatch bound end to end.

use axum::extract::ws::Message;
use serde_json::json;
use tracing::error;

use dawn_core::domain::chat::ChatMessage;
use dawn_core::domain::envelope::Envelope;

// Binary opcodes (first payload byte).
pub const OP_AUDIO_IN: u8 = 0x01;
pub const OP_AUDIO_IN_END: u8 = 0x02;
pub const OP_AUDIO_OUT: u8 = 0x11;
pub const OP_AUDIO_SEGMENT_END: u8 = 0x12;

/// Bound on one outbound JSON frame.
pub const MAX_JSON_FRAME: usize = 16 * 1024;

/// Target size for one history-replay chunk; comfortably under the JSON
/// frame bound with envelope overhead included.
pub const HISTORY_CHUNK_TARGET: usize = 12 * 1024;

/// Encode one envelope as one WebSocket frame.
///
/// Returns `None` (and logs) when a JSON frame would exceed the outbound
/// bound; producers are expected to pre-chunk anything that can grow.
#[must_use]
pub fn encode(envelope: Envelope) -> Option<Message> {
    match envelope {
        Envelope::AudioChunk { data, .. } => {
            let mut frame = Vec::with_capacity(data.len() + 1);
            frame.push(OP_AUDIO_OUT);
            frame.extend_from_slice(&data);
            Some(Message::Binary(frame.into()))
        }
        Envelope::AudioEnd => Some(Message::Binary(vec![OP_AUDIO_SEGMENT_END].into())),
        other => {
            let tag = other.tag();
            let body = json!({ "type": tag, "payload": payload(other) });
            let text = body.to_string();
            if text.len() > MAX_JSON_FRAME {
                error!(tag, bytes = text.len(), "outbound JSON exceeds frame bound, refused");
                return None;
            }
            Some(Message::Text(text.into()))
        }
    }
}

fn payload(envelope: Envelope) -> serde_json::Value {
    match envelope {
        Envelope::State { state } => json!({ "state": state.as_str() }),
        Envelope::Transcript { speaker, text } => json!({ "speaker": speaker, "text": text }),
        Envelope::Error {
            code,
            message,
            recoverable,
        } => json!({ "code": code, "message": message, "recoverable": recoverable }),
        Envelope::SessionToken { token } => json!({ "token": token }),
        Envelope::Config { llm } => json!({ "llm": llm }),
        Envelope::Data { kind, value } => json!({ "kind": kind, "value": value }),
        Envelope::ContextUsage {
            used_tokens,
            max_tokens,
        } => json!({ "used_tokens": used_tokens, "max_tokens": max_tokens }),
        Envelope::StreamStart { stream_id } => json!({ "stream_id": stream_id }),
        Envelope::StreamDelta { stream_id, text } => {
            json!({ "stream_id": stream_id, "text": text })
        }
        Envelope::StreamEnd { stream_id, reason } => {
            json!({ "stream_id": stream_id, "reason": reason })
        }
        Envelope::Metrics {
            prompt_tokens,
            completion_tokens,
            latency_ms,
        } => json!({
            "prompt_tokens": prompt_tokens,
            "completion_tokens": completion_tokens,
            "latency_ms": latency_ms,
        }),
        Envelope::CompactionComplete { removed } => json!({ "removed": removed }),
        // audio variants are handled in encode()
        Envelope::AudioChunk { .. } | Envelope::AudioEnd => serde_json::Value::Null,
    }
}

/// Build the transcript-replay envelopes for a reconnect: one per history
/// message, with oversized contents split at the chunk target so no single
/// frame breaches the outbound bound.
#[must_use]
pub fn replay_envelopes(history: &[ChatMessage]) -> Vec<Envelope> {
    let mut envelopes = Vec::with_capacity(history.len());
    for message in history {
        let speaker = message.role.as_str().to_string();
        if message.content.len() <= HISTORY_CHUNK_TARGET {
            envelopes.push(Envelope::Transcript {
                speaker,
                text: message.content.clone(),
            });
            continue;
        }
        let mut rest = message.content.as_str();
        while !rest.is_empty() {
            let take = chunk_boundary(rest, HISTORY_CHUNK_TARGET);
            envelopes.push(Envelope::Transcript {
                speaker: speaker.clone(),
                text: rest[..take].to_string(),
            });
            rest = &rest[take..];
        }
    }
    envelopes
}

/// Largest split point not exceeding `target` that lands on a char
/// boundary.
fn chunk_boundary(s: &str, target: usize) -> usize {
    if s.len() <= target {
        return s.len();
    }
    let mut cut = target;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    if cut == 0 { s.len() } else { cut }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dawn_core::domain::envelope::ServerState;

    #[test]
    fn test_json_frame_shape() {
        let frame = encode(Envelope::State {
            state: ServerState::Idle,
        })
        .unwrap();
        match frame {
            Message::Text(text) => {
                let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                assert_eq!(value["type"], "state");
                assert_eq!(value["payload"]["state"], "idle");
            }
            _ => panic!("expected text frame"),
        }
    }

    #[test]
    fn test_audio_chunk_opcode() {
        let frame = encode(Envelope::AudioChunk {
            codec: dawn_core::domain::envelope::AudioCodec::Pcm,
            data: vec![1, 2, 3],
        })
        .unwrap();
        match frame {
            Message::Binary(bytes) => assert_eq!(&bytes[..], &[OP_AUDIO_OUT, 1, 2, 3]),
            _ => panic!("expected binary frame"),
        }
    }

    #[test]
    fn test_segment_end_opcode() {
        match encode(Envelope::AudioEnd).unwrap() {
            Message::Binary(bytes) => assert_eq!(&bytes[..], &[OP_AUDIO_SEGMENT_END]),
            _ => panic!("expected binary frame"),
        }
    }

    #[test]
    fn test_oversized_json_refused() {
        let frame = encode(Envelope::Transcript {
            speaker: "assistant".into(),
            text: "x".repeat(MAX_JSON_FRAME + 1),
        });
        assert!(frame.is_none());
    }

    #[test]
    fn test_replay_chunks_oversized_messages() {
        let history = vec![
            ChatMessage::user("short"),
            ChatMessage::assistant("y".repeat(HISTORY_CHUNK_TARGET * 2 + 100)),
        ];
        let envelopes = replay_envelopes(&history);
        assert_eq!(envelopes.len(), 4); // 1 short + 3 chunks
        for env in &envelopes {
            if let Envelope::Transcript { text, .. } = env {
                assert!(text.len() <= HISTORY_CHUNK_TARGET);
            } else {
                panic!("expected transcript envelopes");
            }
        }
        // chunks reassemble to the original
        let reassembled: String = envelopes[1..]
            .iter()
            .map(|e| match e {
                Envelope::Transcript { text, .. } => text.as_str(),
                _ => panic!("expected transcript envelopes"),
            })
            .collect();
        assert_eq!(reassembled.len(), HISTORY_CHUNK_TARGET * 2 + 100);
    }
}
