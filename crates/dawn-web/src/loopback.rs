//! Loopback port implementations for development and tests.
//!
//! The loopback LLM streams a canned (or echoed) reply word by word; the
//! loopback voice engines move bytes without real DSP. They exercise every
//! pipeline seam (streaming, filtering, per-sentence synthesis, chunking)
//! with deterministic output.

use async_trait::async_trait;
use std::sync::Mutex;
use tokio::sync::mpsc;

use dawn_core::domain::envelope::AudioCodec;
use dawn_core::domain::llm::{LlmProvider, TokenUsage};
use dawn_core::ports::audio::{AsrEngine, AudioDecoder, TtsEngine, VoiceError};
use dawn_core::ports::llm_client::{ChatRequest, LlmClient, LlmError, LlmReply};

/// Streams a scripted reply, or echoes the last user message when no script
/// is queued.
pub struct LoopbackLlm {
    scripted: Mutex<Vec<String>>,
}

impl LoopbackLlm {
    #[must_use]
    pub fn new() -> Self {
        Self {
            scripted: Mutex::new(Vec::new()),
        }
    }

    /// Queue the next reply (test hook). Replies are consumed in order.
    pub fn script(&self, reply: impl Into<String>) {
        self.scripted.lock().unwrap().push(reply.into());
    }

    fn next_reply(&self, request: &ChatRequest) -> String {
        let mut scripted = self.scripted.lock().unwrap();
        if scripted.is_empty() {
            let last_user = request
                .messages
                .iter()
                .rev()
                .find(|m| m.role == dawn_core::domain::chat::MessageRole::User)
                .map_or("", |m| m.content.as_str());
            format!("You said: {last_user}")
        } else {
            scripted.remove(0)
        }
    }
}

impl Default for LoopbackLlm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for LoopbackLlm {
    async fn chat_stream(
        &self,
        request: ChatRequest,
        deltas: mpsc::Sender<String>,
    ) -> Result<LlmReply, LlmError> {
        let text = self.next_reply(&request);
        // stream word by word, keeping the separating spaces
        for word in text.split_inclusive(' ') {
            // a closed receiver just means nobody is listening anymore
            let _ = deltas.send(word.to_string()).await;
            tokio::task::yield_now().await;
        }
        let prompt_tokens =
            u32::try_from(request.messages.iter().map(|m| m.content.len() / 4).sum::<usize>())
                .unwrap_or(u32::MAX);
        let completion_tokens = u32::try_from(text.len() / 4).unwrap_or(u32::MAX);
        Ok(LlmReply {
            text,
            usage: TokenUsage {
                prompt_tokens,
                completion_tokens,
            },
        })
    }

    async fn list_models(&self, provider: LlmProvider) -> Result<Vec<String>, LlmError> {
        Ok(match provider {
            LlmProvider::Local => vec!["loopback".to_string()],
            _ => Vec::new(),
        })
    }
}

/// PCM16 passes through; Opus is refused (negotiation should have selected
/// PCM when no Opus codec is wired in).
pub struct PcmPassthrough;

#[async_trait]
impl AudioDecoder for PcmPassthrough {
    async fn decode_to_pcm(
        &self,
        codec: AudioCodec,
        data: &[u8],
    ) -> Result<Vec<i16>, VoiceError> {
        match codec {
            AudioCodec::Pcm => Ok(data
                .chunks_exact(2)
                .map(|c| i16::from_le_bytes([c[0], c[1]]))
                .collect()),
            AudioCodec::Opus => Err(VoiceError::Decode("no opus codec wired".to_string())),
        }
    }

    async fn encode_from_pcm(
        &self,
        codec: AudioCodec,
        samples: &[i16],
    ) -> Result<Vec<u8>, VoiceError> {
        match codec {
            AudioCodec::Pcm => {
                let mut out = Vec::with_capacity(samples.len() * 2);
                for s in samples {
                    out.extend_from_slice(&s.to_le_bytes());
                }
                Ok(out)
            }
            AudioCodec::Opus => Err(VoiceError::Decode("no opus codec wired".to_string())),
        }
    }
}

/// Returns a fixed transcript regardless of the audio handed in.
#[derive(Default)]
pub struct LoopbackAsr {
    transcript: Mutex<String>,
}

impl LoopbackAsr {
    /// Set the transcript the next calls will return (test hook).
    pub fn set_transcript(&self, text: impl Into<String>) {
        *self.transcript.lock().unwrap() = text.into();
    }
}

#[async_trait]
impl AsrEngine for LoopbackAsr {
    async fn transcribe(&self, _samples: &[i16], _sample_rate: u32) -> Result<String, VoiceError> {
        Ok(self.transcript.lock().unwrap().clone())
    }
}

/// Synthesizes silence proportional to the text length (16 samples per
/// character), enough to exercise chunking bounds.
#[derive(Default)]
pub struct LoopbackTts;

#[async_trait]
impl TtsEngine for LoopbackTts {
    async fn synthesize(&self, text: &str) -> Result<Vec<i16>, VoiceError> {
        Ok(vec![0i16; text.len() * 16])
    }
}
