//! Per-sentence speech synthesis for the audio pipeline.
//!
//! Visible stream deltas accumulate in a [`SentenceStream`]; every time a
//! sentence completes, it is cleaned, synthesized, encoded to the
//! negotiated codec, and queued as bounded audio chunks followed by a
//! segment-end marker, so playback starts while the reply is still
//! streaming.

use std::sync::Arc;

use tracing::{debug, warn};

use dawn_core::domain::envelope::{AudioCodec, CODE_PROCESSING_ERROR, Envelope};
use dawn_core::services::text_clean::{clean_for_speech, split_sentences};
use dawn_core::services::{CancelToken, Session};

use crate::state::AppState;

/// Accumulates streamed text and yields complete sentences.
pub struct SentenceStream {
    buf: String,
}

impl SentenceStream {
    #[must_use]
    pub fn new() -> Self {
        Self { buf: String::new() }
    }

    /// Append a delta; returns any sentences completed by it. The
    /// (possibly empty) unfinished tail stays buffered.
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.buf.push_str(delta);

        let Some(cut) = last_sentence_boundary(&self.buf) else {
            return Vec::new();
        };
        let complete: String = self.buf.drain(..cut).collect();
        split_sentences(&complete)
    }

    /// Whatever remains when the stream ends.
    pub fn flush(&mut self) -> Option<String> {
        let tail = std::mem::take(&mut self.buf);
        let tail = tail.trim();
        if tail.is_empty() {
            None
        } else {
            Some(tail.to_string())
        }
    }
}

impl Default for SentenceStream {
    fn default() -> Self {
        Self::new()
    }
}

/// Byte index just past the last complete sentence: terminal punctuation
/// followed by whitespace.
fn last_sentence_boundary(text: &str) -> Option<usize> {
    let mut cut = None;
    let mut prev: Option<(usize, char)> = None;
    for (i, c) in text.char_indices() {
        if let Some((pi, pc)) = prev {
            if matches!(pc, '.' | '!' | '?') && c.is_whitespace() {
                cut = Some(pi + pc.len_utf8());
            }
        }
        prev = Some((i, c));
    }
    cut
}

/// Synthesize one sentence and queue it as bounded audio chunks.
///
/// Synthesis failures are reported but recoverable: the text stream
/// already carried the content.
pub async fn speak_sentence(
    state: &AppState,
    session: &Arc<Session>,
    cancel: &CancelToken,
    sentence: &str,
    codec: AudioCodec,
) {
    let spoken = clean_for_speech(sentence);
    if spoken.is_empty() || cancel.is_cancelled() {
        return;
    }

    let samples = match state.tts.synthesize(&spoken).await {
        Ok(samples) => samples,
        Err(e) => {
            warn!(error = %e, "tts synthesis failed");
            state
                .queue
                .push(session, Envelope::error(CODE_PROCESSING_ERROR, &e.to_string()));
            return;
        }
    };

    let encoded = match state.decoder.encode_from_pcm(codec, &samples).await {
        Ok(encoded) => encoded,
        Err(e) => {
            warn!(error = %e, "audio encode failed");
            state
                .queue
                .push(session, Envelope::error(CODE_PROCESSING_ERROR, &e.to_string()));
            return;
        }
    };

    if cancel.is_cancelled() {
        return;
    }

    let chunk_bytes = state.config.audio_chunk_bytes;
    for chunk in encoded.chunks(chunk_bytes) {
        state.queue.push(
            session,
            Envelope::AudioChunk {
                codec,
                data: chunk.to_vec(),
            },
        );
    }
    state.queue.push(session, Envelope::AudioEnd);
    debug!(
        session_id = session.id(),
        bytes = encoded.len(),
        "sentence synthesized"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentences_emerge_as_completed() {
        let mut stream = SentenceStream::new();
        assert!(stream.push("The lamp is ").is_empty());
        let done = stream.push("on now. Anything else");
        assert_eq!(done, vec!["The lamp is on now."]);
        assert_eq!(stream.flush(), Some("Anything else".to_string()));
    }

    #[test]
    fn test_multiple_sentences_in_one_delta() {
        let mut stream = SentenceStream::new();
        let done = stream.push("One. Two! Three? tail");
        assert_eq!(done, vec!["One. Two! Three?"]);
        assert_eq!(stream.flush(), Some("tail".to_string()));
    }

    #[test]
    fn test_decimal_point_not_a_boundary() {
        let mut stream = SentenceStream::new();
        assert!(stream.push("It is 3.5").is_empty());
        assert!(stream.push("0 degrees").is_empty());
        assert_eq!(stream.flush(), Some("It is 3.50 degrees".to_string()));
    }

    #[test]
    fn test_flush_empty() {
        let mut stream = SentenceStream::new();
        assert_eq!(stream.flush(), None);
    }
}
