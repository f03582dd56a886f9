//! HTTP gateway client for translation, OCR and speech.
//! One pooled reqwest client; each endpoint takes a JSON body and answers
//! with either its payload or `{"error": "..."}`.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::ocr::{join_detections, OcrEngine, OcrError};
use crate::speech::{SpeechError, SpeechSynthesizer, VoiceType};
use crate::translate::{RemoteTranslator, TranslateError};

/// Marker the gateway passes through when source detection fails.
const LANGUAGE_RECOGNITION_MARKER: &str = "LanguageRecognition";

pub struct HttpProvider {
    http: reqwest::Client,
    base_url: String,
    /// Session token sent as the `token` cookie.
    token: Option<String>,
}

/// Transport-level outcome shared by all endpoints.
#[derive(Debug, PartialEq)]
enum ProviderFailure {
    Unauthorized,
    Timeout,
    Api(String),
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranslateResponse {
    translated_text: Option<String>,
}

#[derive(Deserialize)]
struct OcrResponse {
    text: Option<String>,
}

#[derive(Deserialize)]
struct TtsResponse {
    audio: Option<String>,
}

impl HttpProvider {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        token: Option<String>,
    ) -> Result<Self, TranslateError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(timeout)
            .build()
            .map_err(|e| TranslateError::ApiError(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, ProviderFailure> {
        let mut request = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .json(&body);
        if let Some(token) = &self.token {
            request = request.header(reqwest::header::COOKIE, format!("token={token}"));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderFailure::Timeout
            } else {
                ProviderFailure::Api(e.to_string())
            }
        })?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderFailure::Api(format!("read body: {e}")))?;

        if !status.is_success() {
            let failure = failure_from_status(status, &text);
            warn!(path, status = status.as_u16(), ?failure, "provider request failed");
            return Err(failure);
        }
        debug!(path, bytes = text.len(), "provider response");
        serde_json::from_str(&text)
            .map_err(|e| ProviderFailure::Api(format!("malformed response: {e}")))
    }
}

fn failure_from_status(status: StatusCode, body: &str) -> ProviderFailure {
    if status == StatusCode::UNAUTHORIZED {
        return ProviderFailure::Unauthorized;
    }
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .unwrap_or_else(|| {
            format!(
                "unexpected status {status}: {}",
                body.chars().take(200).collect::<String>()
            )
        });
    ProviderFailure::Api(message)
}

fn translate_error(failure: ProviderFailure) -> TranslateError {
    match failure {
        ProviderFailure::Unauthorized => TranslateError::Unauthorized,
        ProviderFailure::Timeout => TranslateError::Timeout,
        ProviderFailure::Api(msg) if msg.contains(LANGUAGE_RECOGNITION_MARKER) => {
            TranslateError::LanguageDetectionFailed(msg)
        }
        ProviderFailure::Api(msg) => TranslateError::ApiError(msg),
    }
}

#[async_trait]
impl RemoteTranslator for HttpProvider {
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, TranslateError> {
        let body = json!({
            "text": text,
            "sourceLang": source_lang,
            "targetLang": target_lang,
        });
        let response: TranslateResponse = self
            .post_json("/api/translate", body)
            .await
            .map_err(translate_error)?;
        Ok(response.translated_text.unwrap_or_default())
    }
}

#[async_trait]
impl OcrEngine for HttpProvider {
    async fn recognize(&self, image: &[u8]) -> Result<String, OcrError> {
        if image.is_empty() {
            return Err(OcrError::InvalidImage("image data is required".into()));
        }
        let body = json!({
            "imageBase64": base64::engine::general_purpose::STANDARD.encode(image),
        });
        let response: OcrResponse = self.post_json("/api/ocr", body).await.map_err(|f| match f {
            ProviderFailure::Unauthorized => OcrError::Unauthorized,
            ProviderFailure::Timeout => OcrError::Timeout,
            ProviderFailure::Api(msg) => OcrError::ProcessingFailed(msg),
        })?;
        Ok(join_detections(response.text.unwrap_or_default().lines()))
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpProvider {
    async fn synthesize(&self, text: &str, voice: VoiceType) -> Result<Vec<u8>, SpeechError> {
        let body = json!({ "text": text, "voiceType": voice });
        let response: TtsResponse = self.post_json("/api/tts", body).await.map_err(|f| match f {
            ProviderFailure::Unauthorized => SpeechError::Unauthorized,
            ProviderFailure::Timeout => SpeechError::Timeout,
            ProviderFailure::Api(msg) => SpeechError::ApiError(msg),
        })?;
        let audio = response
            .audio
            .filter(|a| !a.is_empty())
            .ok_or_else(|| SpeechError::InvalidAudio("response has no audio".into()))?;
        base64::engine::general_purpose::STANDARD
            .decode(audio.as_bytes())
            .map_err(|e| SpeechError::InvalidAudio(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            failure_from_status(StatusCode::UNAUTHORIZED, r#"{"error":"Unauthorized"}"#),
            ProviderFailure::Unauthorized
        );
        assert_eq!(
            failure_from_status(StatusCode::BAD_REQUEST, r#"{"error":"Text too long (max 2000 chars)"}"#),
            ProviderFailure::Api("Text too long (max 2000 chars)".into())
        );
        assert!(matches!(
            failure_from_status(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>"),
            ProviderFailure::Api(msg) if msg.starts_with("unexpected status 502")
        ));
    }

    #[test]
    fn language_recognition_errors_are_distinguished() {
        assert!(matches!(
            translate_error(ProviderFailure::Api(
                "FailedOperation.LanguageRecognitionErr: cannot detect".into()
            )),
            TranslateError::LanguageDetectionFailed(_)
        ));
        assert!(matches!(
            translate_error(ProviderFailure::Api("quota".into())),
            TranslateError::ApiError(_)
        ));
        assert!(matches!(
            translate_error(ProviderFailure::Timeout),
            TranslateError::Timeout
        ));
    }

    #[test]
    fn response_shapes() {
        let r: TranslateResponse = serde_json::from_str(r#"{"translatedText":"你好"}"#).unwrap();
        assert_eq!(r.translated_text.as_deref(), Some("你好"));
        let r: TtsResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert!(r.audio.is_none());
    }

    #[test]
    fn base_url_is_normalized() {
        let p = HttpProvider::new("http://localhost:3000/", Duration::from_secs(5), None).unwrap();
        assert_eq!(p.base_url, "http://localhost:3000");
    }
}
