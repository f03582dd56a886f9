//! Outbound notifications: a broadcast of translation lifecycle events and
//! the latest-result feed for a floating display surface.

use serde::Serialize;
use tokio::sync::{broadcast, watch};

use crate::translate::Translation;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum TranslationEvent {
    /// Shown as a loading indicator; never sent for silent requests.
    TranslateStarted { request_id: String },
    TranslateComplete { translation: Translation },
    /// Never sent for silent requests.
    TranslateError { request_id: String, error: String },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TranslationEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Dropped silently when nobody is subscribed.
    pub fn emit(&self, event: TranslationEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TranslationEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Latest text for a picture-in-picture style display.
#[derive(Clone)]
pub struct LiveDisplay {
    tx: watch::Sender<Option<String>>,
}

impl LiveDisplay {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub fn publish(&self, text: impl Into<String>) {
        let text = text.into();
        self.tx.send_if_modified(|current| {
            if current.as_deref() == Some(text.as_str()) {
                false
            } else {
                *current = Some(text);
                true
            }
        });
    }

    pub fn current(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.tx.subscribe()
    }
}

impl Default for LiveDisplay {
    fn default() -> Self {
        Self::new()
    }
}
