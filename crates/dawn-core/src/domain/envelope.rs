//! Outbound response envelopes.
//!
//! Every message a worker wants delivered to a client is queued as an
//! [`Envelope`] and dispatched by the outbound loop in `dawn-web`. Workers
//! never write to a socket themselves; the envelope carries owned copies of
//! its payload, which are freed once the frame has been handed to the
//! connection's egress task (or sooner, when the target session is already
//! disconnected at dequeue time).

use serde::{Deserialize, Serialize};

/// Coarse server activity state surfaced to clients and `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    Idle,
    Thinking,
    Responding,
}

impl ServerState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Thinking => "thinking",
            Self::Responding => "responding",
        }
    }
}

/// Audio framing negotiated per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    /// Raw PCM16 LE.
    Pcm,
    /// Opus-framed audio.
    Opus,
}

/// A tagged response variant queued by a worker for delivery.
///
/// Each variant carries only the fields it needs. Audio payloads are already
/// chunked to the configured bound before they are queued; text payloads are
/// bounded by the outbound JSON limit enforced at dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Activity state change (`idle` / `thinking` / `responding`).
    State { state: ServerState },
    /// A transcript line: the echoed user message, or a debug echo of tool
    /// results.
    Transcript { speaker: String, text: String },
    /// A recoverable or terminal error surfaced to the client.
    Error {
        code: String,
        message: String,
        recoverable: bool,
    },
    /// Reconnect token acknowledgment after `init` / `reconnect`.
    SessionToken { token: String },
    /// Snapshot of the session's LLM configuration (handshake replay and
    /// config-change acknowledgments).
    Config { llm: crate::domain::llm::LlmConfig },
    /// Reply payload for a query-type client message (`list_models`,
    /// `list_users`, …). `kind` names the query it answers.
    Data {
        kind: String,
        value: serde_json::Value,
    },
    /// One bounded chunk of synthesized audio.
    AudioChunk { codec: AudioCodec, data: Vec<u8> },
    /// End of one synthesized audio segment (per sentence).
    AudioEnd,
    /// Context window usage after a completed turn.
    ContextUsage { used_tokens: u32, max_tokens: u32 },
    /// A streaming reply began; `stream_id` is strictly increasing per session.
    StreamStart { stream_id: u64 },
    /// One visible token-delta of the active stream.
    StreamDelta { stream_id: u64, text: String },
    /// The active stream finished; `reason` is a stable short string.
    StreamEnd { stream_id: u64, reason: String },
    /// Per-turn latency and token counts for the UI.
    Metrics {
        prompt_tokens: u32,
        completion_tokens: u32,
        latency_ms: u64,
    },
    /// A history-compaction request finished.
    CompactionComplete { removed: usize },
}

impl Envelope {
    /// Stable wire tag for this variant.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::State { .. } => "state",
            Self::Transcript { .. } => "transcript",
            Self::Error { .. } => "error",
            Self::SessionToken { .. } => "session-token",
            Self::Config { .. } => "config",
            Self::Data { .. } => "data",
            Self::AudioChunk { .. } => "audio-chunk",
            Self::AudioEnd => "audio-end",
            Self::ContextUsage { .. } => "context-usage",
            Self::StreamStart { .. } => "stream-start",
            Self::StreamDelta { .. } => "stream-delta",
            Self::StreamEnd { .. } => "stream-end",
            Self::Metrics { .. } => "metrics",
            Self::CompactionComplete { .. } => "compaction-complete",
        }
    }

    /// Shorthand for the common error envelope.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
            recoverable: true,
        }
    }
}

// Stable error codes surfaced to clients.
pub const CODE_LLM_ERROR: &str = "LLM_ERROR";
pub const CODE_PROCESSING_ERROR: &str = "PROCESSING_ERROR";
pub const CODE_MAX_CLIENTS: &str = "MAX_CLIENTS";
pub const CODE_BUFFER_FULL: &str = "BUFFER_FULL";
pub const CODE_RATE_LIMITED: &str = "RATE_LIMITED";
pub const CODE_CSRF_REPLAY: &str = "CSRF_REPLAY";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_are_stable() {
        assert_eq!(Envelope::State { state: ServerState::Idle }.tag(), "state");
        assert_eq!(
            Envelope::StreamDelta { stream_id: 1, text: String::new() }.tag(),
            "stream-delta"
        );
        assert_eq!(Envelope::AudioEnd.tag(), "audio-end");
        assert_eq!(
            Envelope::CompactionComplete { removed: 0 }.tag(),
            "compaction-complete"
        );
    }
}
