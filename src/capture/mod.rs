//! Image input: one-shot OCR translation and the periodic auto-capture loop.
//! The loop grabs a frame, recognizes it and translates silently, but only
//! when the recognized text changed since the last cycle.

pub mod screen;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::{metric_names, MetricsRegistry};
use crate::ocr::{OcrEngine, OcrError};
use crate::translate::normalize::suggest_target_lang;
use crate::translate::{TranslateError, Translation, TranslationService, AUTO_LANG};

/// Shown on the live display until the first capture is translated.
pub const WAITING_MESSAGE: &str = "Waiting for translation...";

pub const DEFAULT_CAPTURE_INTERVAL: Duration = Duration::from_secs(2);

/// Produces encoded frames (PNG / JPEG) of whatever is being shared.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn grab(&self) -> Result<Vec<u8>, CaptureError>;
}

#[derive(Debug)]
pub enum CaptureError {
    NoBackendAvailable,
    CaptureFailed(String),
    Io(String),
    Ocr(OcrError),
    Translate(TranslateError),
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::NoBackendAvailable => {
                write!(f, "no screen capture tool available (need grim, maim, or scrot)")
            }
            CaptureError::CaptureFailed(msg) => write!(f, "capture failed: {msg}"),
            CaptureError::Io(msg) => write!(f, "IO error: {msg}"),
            CaptureError::Ocr(e) => write!(f, "{e}"),
            CaptureError::Translate(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CaptureError {}

impl From<OcrError> for CaptureError {
    fn from(e: OcrError) -> Self {
        CaptureError::Ocr(e)
    }
}

impl From<TranslateError> for CaptureError {
    fn from(e: TranslateError) -> Self {
        CaptureError::Translate(e)
    }
}

/// Recognized text and, if there was any, its translation.
#[derive(Debug, Clone, Serialize)]
pub struct ImageTranslation {
    pub text: String,
    pub translation: Option<Translation>,
}

/// OCR an image and translate the result. With `source_lang == "auto"` the
/// target follows the script of the recognized text.
pub async fn translate_image(
    ocr: &dyn OcrEngine,
    service: &TranslationService,
    image: &[u8],
    source_lang: &str,
    target_lang: &str,
    silent: bool,
) -> Result<ImageTranslation, CaptureError> {
    let text = ocr.recognize(image).await?;
    let text = text.trim().to_string();
    if text.is_empty() {
        debug!("no text recognized");
        return Ok(ImageTranslation {
            text,
            translation: None,
        });
    }

    let target = if source_lang == AUTO_LANG {
        suggest_target_lang(&text, target_lang)
    } else {
        target_lang
    };
    let translation = service.translate(&text, source_lang, target, silent).await?;
    Ok(ImageTranslation { text, translation })
}

#[derive(Debug, Clone)]
pub struct AutoCaptureOptions {
    pub interval: Duration,
    pub source_lang: String,
    pub target_lang: String,
}

impl Default for AutoCaptureOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_CAPTURE_INTERVAL,
            source_lang: AUTO_LANG.to_string(),
            target_lang: "zh".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AutoCaptureStats {
    pub cycles: u64,
    pub translated: u64,
    /// Frames with no text or the same text as the previous frame.
    pub unchanged: u64,
    pub failures: u64,
}

/// Run capture → OCR → translate every `options.interval` until `cancel`
/// fires. Cycles never overlap; a failed cycle is logged and the loop
/// carries on.
pub async fn run_auto_capture(
    frames: Arc<dyn FrameSource>,
    ocr: Arc<dyn OcrEngine>,
    service: Arc<TranslationService>,
    options: AutoCaptureOptions,
    cancel: CancellationToken,
    metrics: Arc<MetricsRegistry>,
) -> AutoCaptureStats {
    let mut stats = AutoCaptureStats::default();
    let mut last_text = String::new();
    let mut ticker = tokio::time::interval(options.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    service.display().publish(WAITING_MESSAGE);
    info!(interval_ms = options.interval.as_millis() as u64, "auto-capture started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        stats.cycles += 1;
        let span = metrics.span(metric_names::CAPTURE_CYCLE);
        let outcome = capture_cycle(
            frames.as_ref(),
            ocr.as_ref(),
            &service,
            &options,
            &mut last_text,
        )
        .await;
        span.finish();

        match outcome {
            CycleOutcome::Translated => stats.translated += 1,
            CycleOutcome::Unchanged => stats.unchanged += 1,
            CycleOutcome::Failed => stats.failures += 1,
        }
    }

    info!(
        cycles = stats.cycles,
        translated = stats.translated,
        failures = stats.failures,
        "auto-capture stopped"
    );
    stats
}

enum CycleOutcome {
    Translated,
    Unchanged,
    Failed,
}

async fn capture_cycle(
    frames: &dyn FrameSource,
    ocr: &dyn OcrEngine,
    service: &TranslationService,
    options: &AutoCaptureOptions,
    last_text: &mut String,
) -> CycleOutcome {
    let frame = match frames.grab().await {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "frame capture failed");
            return CycleOutcome::Failed;
        }
    };
    let text = match ocr.recognize(&frame).await {
        Ok(text) => text.trim().to_string(),
        Err(e) => {
            warn!(error = %e, "auto-capture OCR failed");
            return CycleOutcome::Failed;
        }
    };
    if text.is_empty() || text == *last_text {
        return CycleOutcome::Unchanged;
    }

    let target = if options.source_lang == AUTO_LANG {
        suggest_target_lang(&text, &options.target_lang)
    } else {
        options.target_lang.as_str()
    };
    let outcome = match service.translate(&text, &options.source_lang, target, true).await {
        Ok(Some(_)) => CycleOutcome::Translated,
        Ok(None) => CycleOutcome::Unchanged,
        Err(e) => {
            debug!(error = %e, "auto-capture translation failed");
            CycleOutcome::Failed
        }
    };
    *last_text = text;
    outcome
}
