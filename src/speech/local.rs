//! Offline speech through espeak-ng (or espeak). Produces WAV audio in the
//! configured target language and ignores the provider voice id.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::{SpeechError, SpeechSynthesizer, VoiceType};
use crate::capture::screen::probe_command;

const PROGRAMS: [&str; 2] = ["espeak-ng", "espeak"];

/// espeak voice for a gateway language code.
pub fn espeak_voice(lang: &str) -> &'static str {
    match lang {
        "zh" => "cmn",
        "ja" => "ja",
        "ko" => "ko",
        "fr" => "fr",
        "es" => "es",
        "de" => "de",
        "ru" => "ru",
        _ => "en-us",
    }
}

pub struct LocalSpeech {
    program: Option<&'static str>,
    voice: &'static str,
}

impl LocalSpeech {
    pub fn detect(lang: &str) -> Self {
        let program = PROGRAMS.into_iter().find(|p| probe_command(p));
        if let Some(program) = program {
            info!(program, lang, "local speech synthesizer detected");
        }
        Self {
            program,
            voice: espeak_voice(lang),
        }
    }

    pub fn is_available(&self) -> bool {
        self.program.is_some()
    }
}

#[async_trait]
impl SpeechSynthesizer for LocalSpeech {
    async fn synthesize(&self, text: &str, _voice: VoiceType) -> Result<Vec<u8>, SpeechError> {
        let program = self
            .program
            .ok_or_else(|| SpeechError::Unavailable("espeak-ng / espeak not installed".into()))?;
        let output = Command::new(program)
            .args(["--stdout", "-v", self.voice])
            .arg(text)
            .output()
            .await
            .map_err(|e| SpeechError::Unavailable(format!("failed to run {program}: {e}")))?;

        if !output.status.success() {
            return Err(SpeechError::ApiError(format!(
                "{program} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        if output.stdout.is_empty() {
            return Err(SpeechError::InvalidAudio(format!("{program} produced no audio")));
        }
        debug!(program, bytes = output.stdout.len(), "local speech synthesized");
        Ok(output.stdout)
    }
}
