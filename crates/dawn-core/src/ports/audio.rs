//! Audio ports: decode, ASR, and TTS byte-stream contracts.
//!
//! Codec internals are out of scope for the core; these traits fix only the
//! framing the pipelines rely on (PCM16 mono in, PCM16 mono out).

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::envelope::AudioCodec;

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("decode failed: {0}")]
    Decode(String),

    #[error("transcription failed: {0}")]
    Asr(String),

    #[error("synthesis failed: {0}")]
    Tts(String),
}

/// Decodes inbound utterance bytes into PCM16 samples and encodes outbound
/// PCM16 into the negotiated codec.
#[async_trait]
pub trait AudioDecoder: Send + Sync {
    async fn decode_to_pcm(
        &self,
        codec: AudioCodec,
        data: &[u8],
    ) -> Result<Vec<i16>, VoiceError>;

    async fn encode_from_pcm(
        &self,
        codec: AudioCodec,
        samples: &[i16],
    ) -> Result<Vec<u8>, VoiceError>;
}

/// Speech-to-text engine.
#[async_trait]
pub trait AsrEngine: Send + Sync {
    async fn transcribe(&self, samples: &[i16], sample_rate: u32) -> Result<String, VoiceError>;
}

/// Text-to-speech engine. Synthesis is invoked per sentence.
#[async_trait]
pub trait TtsEngine: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<i16>, VoiceError>;
}
