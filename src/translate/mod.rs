//! Translation orchestration.
//! Every request goes to the glossary bridge first; only text the glossary
//! cannot fully resolve reaches the remote translator.

pub mod bridge;
pub mod cache;
pub mod glossary;
pub mod import;
pub mod matcher;
pub mod normalize;
pub mod worker;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::events::{EventBus, LiveDisplay, TranslationEvent};
use crate::history::UserHistory;
use crate::metrics::{metric_names, MetricsRegistry};
use bridge::GlossaryBridge;
use cache::TranslationCache;
use matcher::{MatchMethod, MatchResult};
use normalize::{detect_language, infer_lang_from_script};

/// Source language value that asks the provider to detect it.
pub const AUTO_LANG: &str = "auto";

/// Longest text the translation gateway accepts.
pub const DEFAULT_MAX_TEXT_CHARS: usize = 2000;

pub const LANGUAGES: &[(&str, &str)] = &[
    ("zh", "Chinese (Simplified)"),
    ("en", "English"),
    ("ja", "Japanese"),
    ("ko", "Korean"),
    ("fr", "French"),
    ("es", "Spanish"),
    ("de", "German"),
    ("ru", "Russian"),
];

/// Whether `code` is one of the `LANGUAGES` the gateway translates between.
pub fn is_supported_language(code: &str) -> bool {
    LANGUAGES.iter().any(|&(c, _)| c == code)
}

/// Machine translation backend.
#[async_trait]
pub trait RemoteTranslator: Send + Sync {
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, TranslateError>;
}

#[derive(Debug)]
pub enum TranslateError {
    ApiError(String),
    Unauthorized,
    /// The provider could not detect the source language.
    LanguageDetectionFailed(String),
    Timeout,
    InvalidInput(String),
}

impl std::fmt::Display for TranslateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TranslateError::ApiError(msg) => write!(f, "API error: {msg}"),
            TranslateError::Unauthorized => write!(f, "translation provider rejected credentials"),
            TranslateError::LanguageDetectionFailed(msg) => {
                write!(f, "source language detection failed: {msg}")
            }
            TranslateError::Timeout => write!(f, "translation timeout"),
            TranslateError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
        }
    }
}

impl std::error::Error for TranslateError {}

/// Where a translation came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranslationOrigin {
    Glossary {
        method: MatchMethod,
    },
    Remote {
        /// Glossary terms were substituted before the remote call.
        substituted: bool,
        cached: bool,
        /// Language used for the retry after auto-detection failed.
        retried_lang: Option<String>,
    },
}

impl TranslationOrigin {
    /// Label stored in history.
    pub fn method_label(&self) -> String {
        match self {
            TranslationOrigin::Glossary { method } => method.to_string(),
            TranslationOrigin::Remote { .. } => "remote".to_string(),
        }
    }
}

/// Finished translation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Translation {
    pub request_id: String,
    /// Trimmed input as the user gave it, before any substitution.
    pub source_text: String,
    pub translated_text: String,
    pub source_lang: String,
    pub source_lang_detected: Option<String>,
    pub target_lang: String,
    pub origin: TranslationOrigin,
    pub elapsed_ms: f64,
}

/// Glossary-first translation with remote fallback.
pub struct TranslationService {
    bridge: Arc<GlossaryBridge>,
    remote: Arc<dyn RemoteTranslator>,
    cache: Option<Arc<TranslationCache>>,
    history: Option<Arc<UserHistory>>,
    display: LiveDisplay,
    events: EventBus,
    metrics: Arc<MetricsRegistry>,
    max_text_chars: usize,
}

impl TranslationService {
    pub fn new(
        bridge: Arc<GlossaryBridge>,
        remote: Arc<dyn RemoteTranslator>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            bridge,
            remote,
            cache: None,
            history: None,
            display: LiveDisplay::new(),
            events: EventBus::default(),
            metrics,
            max_text_chars: DEFAULT_MAX_TEXT_CHARS,
        }
    }

    pub fn with_cache(mut self, cache: Arc<TranslationCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_history(mut self, history: Arc<UserHistory>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_max_text_chars(mut self, max: usize) -> Self {
        self.max_text_chars = max;
        self
    }

    pub fn bridge(&self) -> &Arc<GlossaryBridge> {
        &self.bridge
    }

    pub fn display(&self) -> &LiveDisplay {
        &self.display
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Translate `text`. Whitespace-only input is a no-op (`Ok(None)`).
    /// A `silent` request (auto-capture) raises no started/failed events and
    /// logs at debug.
    pub async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
        silent: bool,
    ) -> Result<Option<Translation>, TranslateError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        let request_id = uuid::Uuid::new_v4().to_string();
        let span = self.metrics.span(metric_names::TRANSLATE_DONE);
        if !silent {
            self.events.emit(TranslationEvent::TranslateStarted {
                request_id: request_id.clone(),
            });
        }

        let resolved = match self.resolve(trimmed, source_lang, target_lang, silent).await {
            Ok(resolved) => resolved,
            Err(e) => {
                if silent {
                    debug!(request_id = %request_id, error = %e, "silent translation failed");
                } else {
                    warn!(request_id = %request_id, error = %e, "translation failed");
                    self.events.emit(TranslationEvent::TranslateError {
                        request_id,
                        error: e.to_string(),
                    });
                }
                return Err(e);
            }
        };

        let source_lang_detected = match (&resolved.origin, source_lang) {
            (TranslationOrigin::Remote { retried_lang: Some(lang), .. }, _) => Some(lang.clone()),
            (_, AUTO_LANG) => detect_language(trimmed),
            _ => None,
        };

        let translation = Translation {
            request_id,
            source_text: trimmed.to_string(),
            translated_text: resolved.translated,
            source_lang: source_lang.to_string(),
            source_lang_detected,
            target_lang: target_lang.to_string(),
            origin: resolved.origin,
            elapsed_ms: span.finish() / 1000.0,
        };
        self.deliver(&translation, silent);
        Ok(Some(translation))
    }

    async fn resolve(
        &self,
        trimmed: &str,
        source_lang: &str,
        target_lang: &str,
        silent: bool,
    ) -> Result<Resolved, TranslateError> {
        let (remote_text, substituted) = match self.bridge.submit(trimmed, silent).await {
            Some(MatchResult::Full { translated, method }) => {
                return Ok(Resolved {
                    translated,
                    origin: TranslationOrigin::Glossary { method },
                });
            }
            Some(MatchResult::Partial { text, .. }) => (text, true),
            Some(MatchResult::NoMatch) => (trimmed.to_string(), false),
            None => {
                debug!("no glossary verdict, falling back to remote translation");
                (trimmed.to_string(), false)
            }
        };

        let chars = remote_text.chars().count();
        if chars > self.max_text_chars {
            return Err(TranslateError::InvalidInput(format!(
                "text too long ({chars} chars, max {})",
                self.max_text_chars
            )));
        }

        let cache_key = TranslationCache::compute_key(source_lang, target_lang, &remote_text);
        if let Some(cached) = self.cache.as_ref().and_then(|c| c.get(&cache_key)) {
            debug!(substituted, "translation cache hit");
            return Ok(Resolved {
                translated: cached,
                origin: TranslationOrigin::Remote {
                    substituted,
                    cached: true,
                    retried_lang: None,
                },
            });
        }

        let (translated, retried_lang) = self
            .translate_remote(&remote_text, trimmed, source_lang, target_lang)
            .await?;
        if let Some(cache) = &self.cache {
            cache.insert(cache_key, translated.clone());
        }

        Ok(Resolved {
            translated,
            origin: TranslationOrigin::Remote {
                substituted,
                cached: false,
                retried_lang: retried_lang.map(str::to_string),
            },
        })
    }

    /// One remote call, plus a single retry with a script-inferred source
    /// language when auto-detection failed. The retry's own error is never
    /// surfaced; the caller sees the original detection failure.
    async fn translate_remote(
        &self,
        text: &str,
        original: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<(String, Option<&'static str>), TranslateError> {
        let span = self.metrics.span(metric_names::REMOTE_TRANSLATE);

        let result = match self.remote.translate(text, source_lang, target_lang).await {
            Err(TranslateError::LanguageDetectionFailed(msg)) if source_lang == AUTO_LANG => {
                match infer_lang_from_script(original) {
                    Some(lang) => {
                        warn!(lang, "source detection failed, retrying with inferred language");
                        match self.remote.translate(text, lang, target_lang).await {
                            Ok(translated) => Ok((translated, Some(lang))),
                            Err(retry_err) => {
                                warn!(lang, error = %retry_err, "retry with inferred language failed");
                                Err(TranslateError::LanguageDetectionFailed(msg))
                            }
                        }
                    }
                    None => Err(TranslateError::LanguageDetectionFailed(msg)),
                }
            }
            other => other.map(|translated| (translated, None)),
        };

        let elapsed_us = span.finish();
        let (translated, retried) = result?;
        if translated.trim().is_empty() {
            return Err(TranslateError::ApiError("provider returned an empty translation".into()));
        }
        debug!(elapsed_us, chars = translated.chars().count(), "remote translation done");
        Ok((translated, retried))
    }

    fn deliver(&self, translation: &Translation, silent: bool) {
        if let Some(history) = &self.history {
            let source_lang = translation
                .source_lang_detected
                .as_deref()
                .unwrap_or(&translation.source_lang);
            history.record(
                &translation.request_id,
                &translation.source_text,
                &translation.translated_text,
                source_lang,
                &translation.target_lang,
                &translation.origin.method_label(),
            );
        }
        self.display.publish(translation.translated_text.clone());

        if silent {
            debug!(
                request_id = %translation.request_id,
                method = %translation.origin.method_label(),
                elapsed_ms = translation.elapsed_ms,
                "silent translation complete"
            );
        } else {
            info!(
                request_id = %translation.request_id,
                method = %translation.origin.method_label(),
                elapsed_ms = translation.elapsed_ms,
                "translation complete"
            );
        }
        self.events.emit(TranslationEvent::TranslateComplete {
            translation: translation.clone(),
        });
    }
}

struct Resolved {
    translated: String,
    origin: TranslationOrigin,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryStore;
    use crate::translate::bridge::DEFAULT_MATCH_TIMEOUT;
    use crate::translate::glossary::Glossary;
    use crate::translate::matcher::MatcherConfig;
    use crossbeam_channel as cb;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Clone, Copy, PartialEq)]
    enum Mode {
        Echo,
        /// Detection fails for "auto", succeeds otherwise.
        FailAuto,
        /// Detection always fails.
        FailDetection,
        FailApi,
    }

    struct FakeRemote {
        mode: Mode,
        calls: Mutex<Vec<(String, String, String)>>,
    }

    impl FakeRemote {
        fn new(mode: Mode) -> Arc<Self> {
            Arc::new(Self {
                mode,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, String, String)> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl RemoteTranslator for FakeRemote {
        async fn translate(
            &self,
            text: &str,
            source_lang: &str,
            target_lang: &str,
        ) -> Result<String, TranslateError> {
            self.calls
                .lock()
                .push((text.to_string(), source_lang.to_string(), target_lang.to_string()));
            match self.mode {
                Mode::FailAuto if source_lang == AUTO_LANG => Err(
                    TranslateError::LanguageDetectionFailed("LanguageRecognitionErr".into()),
                ),
                Mode::FailDetection => Err(TranslateError::LanguageDetectionFailed(
                    "LanguageRecognitionErr".into(),
                )),
                Mode::FailApi => Err(TranslateError::ApiError("quota exceeded".into())),
                _ => Ok(format!("[{target_lang}] {text}")),
            }
        }
    }

    async fn service_with(
        entries: &[(&str, &str)],
        remote: Arc<FakeRemote>,
    ) -> TranslationService {
        let metrics = Arc::new(MetricsRegistry::new());
        let bridge = GlossaryBridge::spawn(
            MatcherConfig::default(),
            DEFAULT_MATCH_TIMEOUT,
            Arc::clone(&metrics),
        )
        .unwrap();
        bridge.load_glossary(entries.iter().copied().collect::<Glossary>());
        bridge.wait_for_loads().await;
        TranslationService::new(Arc::new(bridge), remote, metrics)
    }

    #[tokio::test]
    async fn full_glossary_match_skips_remote() {
        let remote = FakeRemote::new(Mode::Echo);
        let service = service_with(&[("Hello World", "你好世界")], remote.clone()).await;

        let t = service
            .translate("  hello   world  ", AUTO_LANG, "zh", false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(t.translated_text, "你好世界");
        assert_eq!(t.source_text, "hello   world");
        assert_eq!(
            t.origin,
            TranslationOrigin::Glossary {
                method: MatchMethod::Normalized
            }
        );
        assert!(remote.calls().is_empty());
        assert_eq!(service.display().current().as_deref(), Some("你好世界"));
    }

    #[tokio::test]
    async fn partial_match_sends_substituted_text() {
        let remote = FakeRemote::new(Mode::Echo);
        let service = service_with(&[("foo", "F"), ("bar", "B")], remote.clone()).await;

        let t = service
            .translate("foobar baz foo", "en", "zh", false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(remote.calls(), [("FB baz F".into(), "en".into(), "zh".into())]);
        assert_eq!(t.translated_text, "[zh] FB baz F");
        assert_eq!(t.source_text, "foobar baz foo");
        assert!(matches!(
            t.origin,
            TranslationOrigin::Remote { substituted: true, cached: false, .. }
        ));
    }

    #[tokio::test]
    async fn no_match_uses_trimmed_original_and_caches() {
        let remote = FakeRemote::new(Mode::Echo);
        let service = service_with(&[("cat", "猫")], remote.clone())
            .await
            .with_cache(Arc::new(TranslationCache::new(16, Duration::from_secs(60))));

        let first = service.translate("  dog  ", "en", "zh", false).await.unwrap().unwrap();
        let second = service.translate("dog", "en", "zh", false).await.unwrap().unwrap();
        assert_eq!(first.translated_text, "[zh] dog");
        assert_eq!(second.translated_text, "[zh] dog");
        assert_eq!(remote.calls().len(), 1);
        assert!(matches!(second.origin, TranslationOrigin::Remote { cached: true, .. }));
    }

    #[tokio::test]
    async fn whitespace_input_is_a_no_op() {
        let remote = FakeRemote::new(Mode::Echo);
        let service = service_with(&[], remote.clone()).await;
        assert!(service.translate(" \n\t ", AUTO_LANG, "zh", false).await.unwrap().is_none());
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_auto_detection_retries_with_script_language() {
        let remote = FakeRemote::new(Mode::FailAuto);
        let service = service_with(&[], remote.clone()).await;

        let t = service
            .translate("good morning", AUTO_LANG, "zh", false)
            .await
            .unwrap()
            .unwrap();
        let calls = remote.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].1, "en");
        assert_eq!(t.source_lang_detected.as_deref(), Some("en"));
        assert!(matches!(
            t.origin,
            TranslationOrigin::Remote { retried_lang: Some(ref lang), .. } if lang == "en"
        ));
    }

    #[tokio::test]
    async fn retry_failure_surfaces_original_error() {
        let remote = FakeRemote::new(Mode::FailDetection);
        let service = service_with(&[], remote.clone()).await;
        let err = service
            .translate("こんにちは", AUTO_LANG, "zh", false)
            .await
            .unwrap_err();
        assert!(matches!(err, TranslateError::LanguageDetectionFailed(_)));
        assert_eq!(remote.calls()[1].1, "ja");

        // Nothing to infer from: no retry.
        let remote = FakeRemote::new(Mode::FailDetection);
        let service = service_with(&[], remote.clone()).await;
        assert!(service.translate("¿¡", AUTO_LANG, "zh", false).await.is_err());
        assert_eq!(remote.calls().len(), 1);
    }

    #[tokio::test]
    async fn explicit_source_never_retries() {
        let remote = FakeRemote::new(Mode::FailDetection);
        let service = service_with(&[], remote.clone()).await;
        assert!(service.translate("hello", "en", "zh", false).await.is_err());
        assert_eq!(remote.calls().len(), 1);
    }

    #[tokio::test]
    async fn bridge_timeout_falls_back_to_remote() {
        let (cmd_tx, _cmd_rx) = cb::unbounded();
        let (_reply_tx, reply_rx) = cb::unbounded();
        let metrics = Arc::new(MetricsRegistry::new());
        let bridge = GlossaryBridge::connect(
            cmd_tx,
            reply_rx,
            Duration::from_millis(50),
            Arc::clone(&metrics),
        )
        .unwrap();
        let remote = FakeRemote::new(Mode::Echo);
        let service = TranslationService::new(Arc::new(bridge), remote.clone(), metrics);

        let t = service.translate("hello", "en", "ja", false).await.unwrap().unwrap();
        assert_eq!(t.translated_text, "[ja] hello");
        assert_eq!(remote.calls().len(), 1);
    }

    #[tokio::test]
    async fn overlong_text_is_rejected_before_remote() {
        let remote = FakeRemote::new(Mode::Echo);
        let service = service_with(&[], remote.clone()).await.with_max_text_chars(4);
        assert!(matches!(
            service.translate("hello", "en", "zh", false).await,
            Err(TranslateError::InvalidInput(_))
        ));
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn silent_requests_emit_only_completions() {
        let remote = FakeRemote::new(Mode::FailApi);
        let service = service_with(&[("cat", "猫")], remote).await;
        let mut events = service.events().subscribe();

        assert!(service.translate("dog", "en", "zh", true).await.is_err());
        service.translate("cat", "en", "zh", true).await.unwrap();
        assert!(matches!(
            events.try_recv(),
            Ok(TranslationEvent::TranslateComplete { .. })
        ));
        assert!(events.try_recv().is_err());

        assert!(service.translate("dog", "en", "zh", false).await.is_err());
        assert!(matches!(events.try_recv(), Ok(TranslationEvent::TranslateStarted { .. })));
        assert!(matches!(events.try_recv(), Ok(TranslationEvent::TranslateError { .. })));
    }

    #[tokio::test]
    async fn translations_are_recorded_in_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::open(&dir.path().join("history.db")).unwrap();
        let remote = FakeRemote::new(Mode::Echo);
        let service = service_with(&[("cat", "猫")], remote)
            .await
            .with_history(Arc::new(store.for_user("alice")));

        service.translate("cat", "en", "zh", false).await.unwrap();
        service.translate("cat", "en", "zh", false).await.unwrap();
        service.translate("dog", "en", "zh", false).await.unwrap();
        store.flush().await;

        let recent = store.query_recent("alice", 10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].record.translated_text, "[zh] dog");
        assert_eq!(recent[0].record.method, "remote");
        assert_eq!(recent[1].record.method, "Exact");
    }
}
