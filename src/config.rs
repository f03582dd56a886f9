//! Runtime configuration from `LEXIBRIDGE_*` environment variables.
//! Unset variables keep their defaults; set-but-invalid ones are errors.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capture::DEFAULT_CAPTURE_INTERVAL;
use crate::translate::bridge::DEFAULT_MATCH_TIMEOUT;
use crate::translate::matcher::MatcherConfig;
use crate::translate::{is_supported_language, AUTO_LANG, DEFAULT_MAX_TEXT_CHARS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub variable: String,
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "environment variable '{}': {}", self.variable, self.message)
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Gateway serving /api/translate, /api/ocr and /api/tts.
    pub provider_url: String,
    pub provider_token: Option<String>,
    #[serde(with = "millis")]
    pub request_timeout: Duration,
    #[serde(with = "millis")]
    pub match_timeout: Duration,
    pub matcher: MatcherConfig,
    pub max_text_chars: usize,
    pub cache_capacity: usize,
    #[serde(with = "millis")]
    pub cache_ttl: Duration,
    pub history_db: PathBuf,
    /// Records older than this many days are purged at startup.
    pub history_retention_days: Option<u32>,
    pub user_id: String,
    #[serde(with = "millis")]
    pub capture_interval: Duration,
    pub source_lang: String,
    pub target_lang: String,
    /// Glossary file loaded at startup (JSON or SQLite).
    pub glossary_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider_url: "http://localhost:3000".into(),
            provider_token: None,
            request_timeout: Duration::from_secs(30),
            match_timeout: DEFAULT_MATCH_TIMEOUT,
            matcher: MatcherConfig::default(),
            max_text_chars: DEFAULT_MAX_TEXT_CHARS,
            cache_capacity: 512,
            cache_ttl: Duration::from_secs(600),
            history_db: PathBuf::from("lexibridge-history.db"),
            history_retention_days: None,
            user_id: "local".into(),
            capture_interval: DEFAULT_CAPTURE_INTERVAL,
            source_lang: "auto".into(),
            target_lang: "zh".into(),
            glossary_path: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(url) = get("LEXIBRIDGE_PROVIDER_URL") {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(invalid("LEXIBRIDGE_PROVIDER_URL", format!("'{url}' is not an http(s) URL")));
            }
            config.provider_url = url;
        }
        config.provider_token = get("LEXIBRIDGE_TOKEN");

        if let Some(ms) = parse_var::<u64>(&get, "LEXIBRIDGE_REQUEST_TIMEOUT_MS")? {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&get, "LEXIBRIDGE_MATCH_TIMEOUT_MS")? {
            config.match_timeout = Duration::from_millis(ms);
        }
        if let Some(len) = parse_var::<usize>(&get, "LEXIBRIDGE_FUZZY_MIN_LEN")? {
            config.matcher.min_fuzzy_len = len;
        }
        if let Some(ratio) = parse_var::<f64>(&get, "LEXIBRIDGE_FUZZY_MIN_RATIO")? {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(invalid("LEXIBRIDGE_FUZZY_MIN_RATIO", "must be between 0 and 1"));
            }
            config.matcher.min_ratio = ratio;
        }
        if let Some(max) = parse_var::<usize>(&get, "LEXIBRIDGE_MAX_TEXT_CHARS")? {
            config.max_text_chars = max;
        }
        if let Some(cap) = parse_var::<usize>(&get, "LEXIBRIDGE_CACHE_CAPACITY")? {
            config.cache_capacity = cap;
        }
        if let Some(secs) = parse_var::<u64>(&get, "LEXIBRIDGE_CACHE_TTL_SECS")? {
            config.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(path) = get("LEXIBRIDGE_HISTORY_DB") {
            config.history_db = PathBuf::from(path);
        }
        if let Some(days) = parse_var::<u32>(&get, "LEXIBRIDGE_HISTORY_RETENTION_DAYS")? {
            config.history_retention_days = Some(days);
        }
        if let Some(user) = get("LEXIBRIDGE_USER") {
            config.user_id = user;
        }
        if let Some(ms) = parse_var::<u64>(&get, "LEXIBRIDGE_CAPTURE_INTERVAL_MS")? {
            if ms == 0 {
                return Err(invalid("LEXIBRIDGE_CAPTURE_INTERVAL_MS", "must be positive"));
            }
            config.capture_interval = Duration::from_millis(ms);
        }
        if let Some(lang) = get("LEXIBRIDGE_SOURCE_LANG") {
            if lang != AUTO_LANG && !is_supported_language(&lang) {
                return Err(invalid("LEXIBRIDGE_SOURCE_LANG", format!("unsupported language '{lang}'")));
            }
            config.source_lang = lang;
        }
        if let Some(lang) = get("LEXIBRIDGE_TARGET_LANG") {
            if !is_supported_language(&lang) {
                return Err(invalid("LEXIBRIDGE_TARGET_LANG", format!("unsupported language '{lang}'")));
            }
            config.target_lang = lang;
        }
        config.glossary_path = get("LEXIBRIDGE_GLOSSARY").map(PathBuf::from);

        Ok(config)
    }
}

fn parse_var<T>(get: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| invalid(name, format!("'{raw}': {e}"))),
        None => Ok(None),
    }
}

fn invalid(variable: &str, message: impl Into<String>) -> ConfigError {
    ConfigError {
        variable: variable.to_string(),
        message: message.into(),
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
