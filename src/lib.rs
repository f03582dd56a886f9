//! lexibridge: glossary-first translation assistant core.
//! Wires the glossary matcher, remote providers, history and the live
//! display into one `Assistant`.

pub mod capture;
pub mod config;
pub mod events;
pub mod history;
pub mod metrics;
pub mod ocr;
pub mod provider;
pub mod speech;
pub mod translate;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use capture::{AutoCaptureOptions, AutoCaptureStats, CaptureError, FrameSource, ImageTranslation};
use config::AppConfig;
use history::HistoryStore;
use metrics::{MetricSummary, MetricsRegistry};
use ocr::OcrEngine;
use provider::HttpProvider;
use speech::local::LocalSpeech;
use speech::{SpeechError, SpeechService, SpeechSynthesizer, VoiceType};
use translate::bridge::GlossaryBridge;
use translate::cache::TranslationCache;
use translate::glossary::{Glossary, GlossaryError};
use translate::{RemoteTranslator, TranslateError, Translation, TranslationService};

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// `lexibridge=debug` filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("lexibridge=debug")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

#[derive(Debug)]
pub enum StartupError {
    Provider(TranslateError),
    Worker(std::io::Error),
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartupError::Provider(e) => write!(f, "provider client init failed: {e}"),
            StartupError::Worker(e) => write!(f, "matcher worker spawn failed: {e}"),
        }
    }
}

impl std::error::Error for StartupError {}

pub struct Assistant {
    config: AppConfig,
    metrics: Arc<MetricsRegistry>,
    translator: Arc<TranslationService>,
    ocr: Arc<dyn OcrEngine>,
    speech: SpeechService,
    history: Option<Arc<HistoryStore>>,
}

impl Assistant {
    /// Start against the HTTP gateway in `config`. Must run inside a Tokio
    /// runtime.
    pub fn start(config: AppConfig) -> Result<Self, StartupError> {
        let provider = Arc::new(
            HttpProvider::new(
                config.provider_url.clone(),
                config.request_timeout,
                config.provider_token.clone(),
            )
            .map_err(StartupError::Provider)?,
        );
        info!(url = %config.provider_url, "provider client initialized");
        let local = LocalSpeech::detect(&config.target_lang);
        let assistant = Self::with_providers(config, provider.clone(), provider.clone(), provider)?;
        if local.is_available() {
            Ok(assistant.with_speech_fallback(Arc::new(local)))
        } else {
            Ok(assistant)
        }
    }

    pub fn with_providers(
        config: AppConfig,
        remote: Arc<dyn RemoteTranslator>,
        ocr: Arc<dyn OcrEngine>,
        synth: Arc<dyn SpeechSynthesizer>,
    ) -> Result<Self, StartupError> {
        let metrics = Arc::new(MetricsRegistry::new());
        let bridge = GlossaryBridge::spawn(config.matcher, config.match_timeout, Arc::clone(&metrics))
            .map_err(StartupError::Worker)?;
        let cache = Arc::new(TranslationCache::new(config.cache_capacity, config.cache_ttl));

        let mut service = TranslationService::new(Arc::new(bridge), remote, Arc::clone(&metrics))
            .with_cache(cache)
            .with_max_text_chars(config.max_text_chars);

        let history = match HistoryStore::open(&config.history_db) {
            Ok(store) => {
                if let Some(days) = config.history_retention_days {
                    store.cleanup_older_than_days(days);
                }
                service = service.with_history(Arc::new(store.for_user(config.user_id.clone())));
                Some(store)
            }
            Err(e) => {
                warn!(error = %e, "history store unavailable, history disabled");
                None
            }
        };

        Ok(Self {
            speech: SpeechService::new(synth, Arc::clone(&metrics)),
            translator: Arc::new(service),
            ocr,
            history,
            metrics,
            config,
        })
    }

    /// Synthesizer used when the speech provider fails.
    pub fn with_speech_fallback(mut self, fallback: Arc<dyn SpeechSynthesizer>) -> Self {
        self.speech = self.speech.with_fallback(fallback);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn translator(&self) -> &Arc<TranslationService> {
        &self.translator
    }

    pub fn history(&self) -> Option<&Arc<HistoryStore>> {
        self.history.as_ref()
    }

    /// Merge `glossary` into the matcher. Fire-and-forget.
    pub fn load_glossary(&self, glossary: Glossary) -> bool {
        self.translator.bridge().load_glossary(glossary)
    }

    /// Import a JSON or SQLite glossary file and merge it into the matcher.
    /// A rejected file leaves the current glossary untouched.
    pub fn import_glossary(&self, path: &Path) -> Result<usize, GlossaryError> {
        let glossary = translate::import::load_glossary_file(path)?;
        let imported = glossary.len();
        self.load_glossary(glossary);
        Ok(imported)
    }

    pub async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Option<Translation>, TranslateError> {
        self.translator.translate(text, source_lang, target_lang, false).await
    }

    /// Translate an uploaded image (base64, optionally as a data URL).
    pub async fn translate_upload(
        &self,
        upload: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<ImageTranslation, CaptureError> {
        let image = ocr::decode_image_upload(upload)?;
        let span = self.metrics.span(metrics::metric_names::OCR_DONE);
        let result = capture::translate_image(
            self.ocr.as_ref(),
            &self.translator,
            &image,
            source_lang,
            target_lang,
            false,
        )
        .await;
        span.finish();
        result
    }

    pub async fn speak(&self, text: &str, voice: VoiceType) -> Result<Vec<u8>, SpeechError> {
        self.speech.speak(text, voice).await
    }

    /// Spawn the auto-capture loop with the configured interval and
    /// languages. Stops when `cancel` fires.
    pub fn start_auto_capture(
        &self,
        frames: Arc<dyn FrameSource>,
        cancel: CancellationToken,
    ) -> JoinHandle<AutoCaptureStats> {
        let options = AutoCaptureOptions {
            interval: self.config.capture_interval,
            source_lang: self.config.source_lang.clone(),
            target_lang: self.config.target_lang.clone(),
        };
        tokio::spawn(capture::run_auto_capture(
            frames,
            Arc::clone(&self.ocr),
            Arc::clone(&self.translator),
            options,
            cancel,
            Arc::clone(&self.metrics),
        ))
    }

    pub fn metrics_summary(&self) -> BTreeMap<String, MetricSummary> {
        self.metrics.summary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ocr::OcrError;

    struct Fake;

    #[async_trait]
    impl RemoteTranslator for Fake {
        async fn translate(&self, text: &str, _: &str, target: &str) -> Result<String, TranslateError> {
            Ok(format!("{target}:{text}"))
        }
    }

    #[async_trait]
    impl OcrEngine for Fake {
        async fn recognize(&self, image: &[u8]) -> Result<String, OcrError> {
            Ok(String::from_utf8_lossy(image).into_owned())
        }
    }

    #[async_trait]
    impl SpeechSynthesizer for Fake {
        async fn synthesize(&self, text: &str, _: VoiceType) -> Result<Vec<u8>, SpeechError> {
            Ok(text.as_bytes().to_vec())
        }
    }

    fn assistant(dir: &tempfile::TempDir) -> Assistant {
        let config = AppConfig {
            history_db: dir.path().join("history.db"),
            ..AppConfig::default()
        };
        let fake = Arc::new(Fake);
        Assistant::with_providers(config, fake.clone(), fake.clone(), fake).unwrap()
    }

    #[tokio::test]
    async fn imported_glossary_answers_before_remote() {
        let dir = tempfile::tempdir().unwrap();
        let assistant = assistant(&dir);
        let path = dir.path().join("terms.json");
        std::fs::write(&path, r#"{"Settings": "设置"}"#).unwrap();

        assert_eq!(assistant.import_glossary(&path).unwrap(), 1);
        assistant.translator().bridge().wait_for_loads().await;

        let t = assistant.translate("Settings", "en", "zh").await.unwrap().unwrap();
        assert_eq!(t.translated_text, "设置");
        let t = assistant.translate("Back", "en", "zh").await.unwrap().unwrap();
        assert_eq!(t.translated_text, "zh:Back");

        let history = assistant.history().unwrap();
        history.flush().await;
        assert_eq!(history.query_recent("local", 10).len(), 2);
    }

    #[tokio::test]
    async fn rejected_import_keeps_glossary() {
        let dir = tempfile::tempdir().unwrap();
        let assistant = assistant(&dir);
        assistant.load_glossary([("cat", "猫")].into_iter().collect());
        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "[1, 2]").unwrap();

        assert!(assistant.import_glossary(&bad).is_err());
        assistant.translator().bridge().wait_for_loads().await;
        let t = assistant.translate("cat", "en", "zh").await.unwrap().unwrap();
        assert_eq!(t.translated_text, "猫");
    }

    #[tokio::test]
    async fn upload_is_recognized_and_translated() {
        let dir = tempfile::tempdir().unwrap();
        let assistant = assistant(&dir);
        // "hello" in base64
        let out = assistant
            .translate_upload("data:image/png;base64,aGVsbG8=", "auto", "en")
            .await
            .unwrap();
        assert_eq!(out.text, "hello");
        assert_eq!(out.translation.unwrap().translated_text, "zh:hello");
        assert!(assistant.metrics_summary().contains_key(metrics::metric_names::OCR_DONE));
    }

    #[tokio::test]
    async fn speak_returns_audio() {
        let dir = tempfile::tempdir().unwrap();
        let assistant = assistant(&dir);
        assert_eq!(assistant.speak("hi", VoiceType::default()).await.unwrap(), b"hi");
    }

    struct Mute;

    #[async_trait]
    impl SpeechSynthesizer for Mute {
        async fn synthesize(&self, _: &str, _: VoiceType) -> Result<Vec<u8>, SpeechError> {
            Err(SpeechError::Timeout)
        }
    }

    #[tokio::test]
    async fn speech_falls_back_when_provider_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            history_db: dir.path().join("history.db"),
            ..AppConfig::default()
        };
        let fake = Arc::new(Fake);
        let assistant = Assistant::with_providers(config, fake.clone(), fake.clone(), Arc::new(Mute))
            .unwrap();
        assert!(matches!(
            assistant.speak("hi", VoiceType::default()).await,
            Err(SpeechError::Timeout)
        ));

        let assistant = assistant.with_speech_fallback(fake);
        assert_eq!(assistant.speak("hi", VoiceType::default()).await.unwrap(), b"hi");
    }

    #[tokio::test]
    async fn retention_purges_old_history_at_startup() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("history.db");
        {
            let store = HistoryStore::open(&db).unwrap();
            store.record(history::HistoryRecord {
                request_id: "old".into(),
                user_id: "local".into(),
                source_text: "cat".into(),
                translated_text: "猫".into(),
                source_lang: "en".into(),
                target_lang: "zh".into(),
                method: "Exact".into(),
                created_at: 0,
            });
            store.flush().await;
        }

        let config = AppConfig {
            history_db: db,
            history_retention_days: Some(30),
            ..AppConfig::default()
        };
        let fake = Arc::new(Fake);
        let assistant = Assistant::with_providers(config, fake.clone(), fake.clone(), fake).unwrap();
        assert!(assistant.history().unwrap().query_recent("local", 10).is_empty());
    }
}
