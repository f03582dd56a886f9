//! OCR coordination: the engine interface plus helpers for uploaded images.
//! Recognition itself is delegated to a remote provider.

use async_trait::async_trait;
use base64::Engine as _;
use regex::Regex;
use std::sync::OnceLock;

/// Recognizes text in an encoded image (PNG / JPEG bytes).
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Recognized lines joined with `\n`; empty when nothing was found.
    async fn recognize(&self, image: &[u8]) -> Result<String, OcrError>;
}

#[derive(Debug)]
pub enum OcrError {
    InvalidImage(String),
    Unauthorized,
    ProcessingFailed(String),
    Timeout,
}

impl std::fmt::Display for OcrError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OcrError::InvalidImage(msg) => write!(f, "invalid image: {msg}"),
            OcrError::Unauthorized => write!(f, "OCR provider rejected credentials"),
            OcrError::ProcessingFailed(msg) => write!(f, "OCR failed: {msg}"),
            OcrError::Timeout => write!(f, "OCR timeout"),
        }
    }
}

impl std::error::Error for OcrError {}

fn data_url_prefix() -> &'static Regex {
    static PREFIX: OnceLock<Regex> = OnceLock::new();
    PREFIX.get_or_init(|| {
        Regex::new(r"^data:image/\w+;base64,").expect("data URL pattern is valid")
    })
}

/// Decode an uploaded image given as base64, with or without a
/// `data:image/<fmt>;base64,` prefix.
pub fn decode_image_upload(input: &str) -> Result<Vec<u8>, OcrError> {
    let payload = data_url_prefix().replace(input.trim(), "");
    if payload.is_empty() {
        return Err(OcrError::InvalidImage("image data is required".into()));
    }
    base64::engine::general_purpose::STANDARD
        .decode(payload.as_bytes())
        .map_err(|e| OcrError::InvalidImage(format!("bad base64: {e}")))
}

/// Join detected text fragments into one block, one line per fragment.
pub fn join_detections<I, S>(detections: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    detections
        .into_iter()
        .map(|d| d.as_ref().trim().to_string())
        .filter(|d| !d.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
