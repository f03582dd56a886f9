//! Text-to-speech: voice catalogue and a thin service over the provider,
//! with an optional local synthesizer used when the provider fails.

pub mod local;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::metrics::{metric_names, MetricsRegistry};

/// Provider voice id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoiceType(pub u32);

impl Default for VoiceType {
    fn default() -> Self {
        VOICES[0].0
    }
}

pub const VOICES: &[(VoiceType, &str)] = &[
    (VoiceType(101001), "Voice 1 (Female)"),
    (VoiceType(101002), "Voice 2 (Female)"),
    (VoiceType(101003), "Voice 3 (Male)"),
    (VoiceType(101004), "Voice 4 (Male)"),
];

/// Synthesizes speech; returns encoded audio (mp3).
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: VoiceType) -> Result<Vec<u8>, SpeechError>;
}

#[derive(Debug)]
pub enum SpeechError {
    EmptyText,
    Unauthorized,
    ApiError(String),
    InvalidAudio(String),
    Timeout,
    /// No synthesizer could be run.
    Unavailable(String),
}

impl std::fmt::Display for SpeechError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpeechError::EmptyText => write!(f, "text is required"),
            SpeechError::Unauthorized => write!(f, "TTS provider rejected credentials"),
            SpeechError::ApiError(msg) => write!(f, "TTS error: {msg}"),
            SpeechError::InvalidAudio(msg) => write!(f, "invalid audio payload: {msg}"),
            SpeechError::Timeout => write!(f, "TTS timeout"),
            SpeechError::Unavailable(msg) => write!(f, "speech unavailable: {msg}"),
        }
    }
}

impl std::error::Error for SpeechError {}

pub struct SpeechService {
    synth: Arc<dyn SpeechSynthesizer>,
    fallback: Option<Arc<dyn SpeechSynthesizer>>,
    metrics: Arc<MetricsRegistry>,
}

impl SpeechService {
    pub fn new(synth: Arc<dyn SpeechSynthesizer>, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            synth,
            fallback: None,
            metrics,
        }
    }

    /// Synthesizer tried when the primary one fails.
    pub fn with_fallback(mut self, fallback: Arc<dyn SpeechSynthesizer>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// On failure of both synthesizers the primary error is returned.
    pub async fn speak(&self, text: &str, voice: VoiceType) -> Result<Vec<u8>, SpeechError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SpeechError::EmptyText);
        }
        let span = self.metrics.span(metric_names::TTS_DONE);
        let primary = match self.synth.synthesize(text, voice).await {
            Ok(audio) => {
                let elapsed_us = span.finish();
                info!(voice = voice.0, bytes = audio.len(), elapsed_us, "speech synthesized");
                return Ok(audio);
            }
            Err(e) => e,
        };
        warn!(error = %primary, voice = voice.0, "speech synthesis failed");

        let Some(fallback) = &self.fallback else {
            return Err(primary);
        };
        match fallback.synthesize(text, voice).await {
            Ok(audio) => {
                let elapsed_us = span.finish();
                info!(bytes = audio.len(), elapsed_us, "speech synthesized by fallback");
                Ok(audio)
            }
            Err(e) => {
                warn!(error = %e, "fallback speech synthesis failed");
                Err(primary)
            }
        }
    }
}
