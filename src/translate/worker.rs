//! Matcher worker: a dedicated OS thread that owns the glossary and its
//! index and answers match requests one at a time, in FIFO order.
//! The only way in is a `WorkerCommand`; the only way out is a `WorkerReply`.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel as cb;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::glossary::Glossary;
use super::matcher::{MatchMethod, MatchResult, MatcherConfig, MatcherEngine};
use crate::metrics::{metric_names, MetricsRegistry};

/// Caller → worker messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerCommand {
    LoadGlossary { glossary: Glossary },
    FindMatch { id: u64, text: String, silent: bool },
    Shutdown,
}

/// Worker → caller messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerReply {
    LoadComplete { count: usize },
    MatchFound { id: u64, translated: String, method: MatchMethod },
    SubstitutionDone { id: u64, text: String, method: MatchMethod },
    NoMatch { id: u64 },
}

impl WorkerReply {
    pub fn for_request(id: u64, result: MatchResult) -> Self {
        match result {
            MatchResult::Full { translated, method } => WorkerReply::MatchFound {
                id,
                translated,
                method,
            },
            MatchResult::Partial { text, method } => {
                WorkerReply::SubstitutionDone { id, text, method }
            }
            MatchResult::NoMatch => WorkerReply::NoMatch { id },
        }
    }

    /// Correlation id, or None for load acknowledgements.
    pub fn id(&self) -> Option<u64> {
        match self {
            WorkerReply::LoadComplete { .. } => None,
            WorkerReply::MatchFound { id, .. }
            | WorkerReply::SubstitutionDone { id, .. }
            | WorkerReply::NoMatch { id } => Some(*id),
        }
    }

    pub fn into_match_result(self) -> Option<MatchResult> {
        match self {
            WorkerReply::LoadComplete { .. } => None,
            WorkerReply::MatchFound {
                translated, method, ..
            } => Some(MatchResult::Full { translated, method }),
            WorkerReply::SubstitutionDone { text, method, .. } => {
                Some(MatchResult::Partial { text, method })
            }
            WorkerReply::NoMatch { .. } => Some(MatchResult::NoMatch),
        }
    }
}

/// Spawn the matcher worker thread. It exits on `Shutdown`, when every
/// command sender is dropped, or when nobody listens for replies anymore.
pub fn spawn_matcher_worker(
    config: MatcherConfig,
    commands: cb::Receiver<WorkerCommand>,
    replies: cb::Sender<WorkerReply>,
    metrics: Arc<MetricsRegistry>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("glossary-matcher".into())
        .spawn(move || {
            let mut engine = MatcherEngine::new(config);
            for command in commands.iter() {
                let Some(reply) = handle_command(&mut engine, command, &metrics) else {
                    break;
                };
                if replies.send(reply).is_err() {
                    debug!("reply channel closed, matcher worker exiting");
                    return;
                }
            }
            info!("matcher worker exiting");
        })
}

fn handle_command(
    engine: &mut MatcherEngine,
    command: WorkerCommand,
    metrics: &Arc<MetricsRegistry>,
) -> Option<WorkerReply> {
    match command {
        WorkerCommand::LoadGlossary { glossary } => {
            let span = metrics.span(metric_names::GLOSSARY_LOAD);
            let incoming = glossary.len();
            let count = engine.load(glossary);
            let elapsed_us = span.finish();
            info!(
                incoming,
                total = count,
                generation = engine.generation(),
                elapsed_us,
                "glossary index rebuilt"
            );
            Some(WorkerReply::LoadComplete { count })
        }
        WorkerCommand::FindMatch { id, text, silent } => {
            let span = metrics.span(metric_names::MATCH);
            let result = engine.match_text(&text);
            let elapsed_us = span.finish();
            let outcome = match &result {
                MatchResult::Full { method, .. } | MatchResult::Partial { method, .. } => {
                    method.to_string()
                }
                MatchResult::NoMatch => "none".to_string(),
            };
            if silent {
                debug!(id, method = %outcome, elapsed_us, "glossary match");
            } else {
                info!(id, method = %outcome, elapsed_us, "glossary match");
            }
            Some(WorkerReply::for_request(id, result))
        }
        WorkerCommand::Shutdown => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn start() -> (cb::Sender<WorkerCommand>, cb::Receiver<WorkerReply>, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = cb::unbounded();
        let (reply_tx, reply_rx) = cb::unbounded();
        let handle = spawn_matcher_worker(
            MatcherConfig::default(),
            cmd_rx,
            reply_tx,
            Arc::new(MetricsRegistry::new()),
        )
        .unwrap();
        (cmd_tx, reply_rx, handle)
    }

    fn recv(rx: &cb::Receiver<WorkerReply>) -> WorkerReply {
        rx.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn message_shapes_match_wire_contract() {
        let cmd = WorkerCommand::FindMatch {
            id: 7,
            text: "hi".into(),
            silent: true,
        };
        assert_eq!(
            serde_json::to_value(&cmd).unwrap(),
            serde_json::json!({"type": "FIND_MATCH", "id": 7, "text": "hi", "silent": true})
        );

        let load = WorkerCommand::LoadGlossary {
            glossary: [("a", "b")].into_iter().collect(),
        };
        assert_eq!(
            serde_json::to_value(&load).unwrap(),
            serde_json::json!({"type": "LOAD_GLOSSARY", "glossary": {"a": "b"}})
        );

        let reply = WorkerReply::MatchFound {
            id: 7,
            translated: "x".into(),
            method: MatchMethod::FuzzyTextInKey,
        };
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            serde_json::json!({"type": "MATCH_FOUND", "id": 7, "translated": "x", "method": "Fuzzy (OCR in Key)"})
        );

        let parsed: WorkerReply =
            serde_json::from_str(r#"{"type":"SUBSTITUTION_DONE","id":3,"text":"t","method":"Substitution"}"#)
                .unwrap();
        assert_eq!(parsed.id(), Some(3));
    }

    #[test]
    fn requests_before_and_after_reload_see_whole_generations() {
        let (tx, rx, handle) = start();
        tx.send(WorkerCommand::LoadGlossary {
            glossary: [("cat", "猫"), ("dog", "狗")].into_iter().collect(),
        })
        .unwrap();
        tx.send(WorkerCommand::FindMatch { id: 1, text: "cat and dog".into(), silent: false })
            .unwrap();
        tx.send(WorkerCommand::LoadGlossary {
            glossary: [("cat", "ネコ"), ("dog", "イヌ")].into_iter().collect(),
        })
        .unwrap();
        tx.send(WorkerCommand::FindMatch { id: 2, text: "cat and dog".into(), silent: true })
            .unwrap();

        assert_eq!(recv(&rx), WorkerReply::LoadComplete { count: 2 });
        assert_eq!(
            recv(&rx),
            WorkerReply::SubstitutionDone {
                id: 1,
                text: "猫 and 狗".into(),
                method: MatchMethod::Substitution
            }
        );
        assert_eq!(recv(&rx), WorkerReply::LoadComplete { count: 2 });
        assert_eq!(
            recv(&rx),
            WorkerReply::SubstitutionDone {
                id: 2,
                text: "ネコ and イヌ".into(),
                method: MatchMethod::Substitution
            }
        );

        tx.send(WorkerCommand::Shutdown).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn empty_worker_answers_no_match() {
        let (tx, rx, handle) = start();
        tx.send(WorkerCommand::FindMatch { id: 9, text: "hello".into(), silent: false })
            .unwrap();
        assert_eq!(recv(&rx), WorkerReply::NoMatch { id: 9 });
        drop(tx);
        handle.join().unwrap();
    }
}
