//! Async bridge between callers and the matcher worker.
//! Every request carries a fresh correlation id; a router thread hands each
//! reply to the caller still waiting on that id and drops the rest. A caller
//! that times out simply stops waiting; its late reply is discarded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel as cb;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use super::glossary::Glossary;
use super::matcher::{MatchResult, MatcherConfig};
use super::worker::{spawn_matcher_worker, WorkerCommand, WorkerReply};
use crate::metrics::{metric_names, MetricsRegistry};

/// Default time a caller waits for a match reply.
pub const DEFAULT_MATCH_TIMEOUT: Duration = Duration::from_secs(5);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<MatchResult>>>>;

/// Progress of fire-and-forget glossary loads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStatus {
    /// Loads acknowledged by the worker.
    pub completed: u64,
    /// Glossary size reported by the latest acknowledgement.
    pub entries: usize,
}

pub struct GlossaryBridge {
    commands: cb::Sender<WorkerCommand>,
    pending: PendingMap,
    next_id: AtomicU64,
    loads_requested: AtomicU64,
    load_status: watch::Receiver<LoadStatus>,
    timeout: Duration,
    metrics: Arc<MetricsRegistry>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl GlossaryBridge {
    /// Spawn a matcher worker thread and connect to it.
    pub fn spawn(
        config: MatcherConfig,
        timeout: Duration,
        metrics: Arc<MetricsRegistry>,
    ) -> std::io::Result<Self> {
        let (cmd_tx, cmd_rx) = cb::unbounded();
        let (reply_tx, reply_rx) = cb::unbounded();
        let handle = spawn_matcher_worker(config, cmd_rx, reply_tx, Arc::clone(&metrics))?;
        let bridge = Self::connect(cmd_tx, reply_rx, timeout, metrics)?;
        *bridge.worker.lock() = Some(handle);
        info!(timeout_ms = timeout.as_millis() as u64, "glossary bridge started");
        Ok(bridge)
    }

    /// Connect to any worker speaking the command/reply protocol.
    pub fn connect(
        commands: cb::Sender<WorkerCommand>,
        replies: cb::Receiver<WorkerReply>,
        timeout: Duration,
        metrics: Arc<MetricsRegistry>,
    ) -> std::io::Result<Self> {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (status_tx, status_rx) = watch::channel(LoadStatus::default());

        let router_pending = Arc::clone(&pending);
        std::thread::Builder::new()
            .name("glossary-reply-router".into())
            .spawn(move || route_replies(replies, router_pending, status_tx))?;

        Ok(Self {
            commands,
            pending,
            next_id: AtomicU64::new(0),
            loads_requested: AtomicU64::new(0),
            load_status: status_rx,
            timeout,
            metrics,
            worker: Mutex::new(None),
        })
    }

    /// Send a glossary to the worker without waiting for the rebuild.
    /// Requests submitted meanwhile are served by the old or the new index.
    pub fn load_glossary(&self, glossary: Glossary) -> bool {
        let entries = glossary.len();
        match self.commands.send(WorkerCommand::LoadGlossary { glossary }) {
            Ok(()) => {
                let requested = self.loads_requested.fetch_add(1, Ordering::SeqCst) + 1;
                debug!(entries, requested, "glossary load queued");
                true
            }
            Err(_) => {
                warn!("matcher worker gone, glossary load dropped");
                false
            }
        }
    }

    /// Ask the worker to match `text`. Returns None if no reply arrived in
    /// time (or the worker is gone); `Some(NoMatch)` is a real verdict.
    pub async fn submit(&self, text: &str, silent: bool) -> Option<MatchResult> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        let command = WorkerCommand::FindMatch {
            id,
            text: text.to_string(),
            silent,
        };
        if self.commands.send(command).is_err() {
            warn!(id, "matcher worker gone, skipping glossary match");
            return None;
        }

        let span = self.metrics.span(metric_names::BRIDGE_WAIT);
        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => {
                span.finish();
                Some(result)
            }
            Ok(Err(_)) => {
                warn!(id, "reply router stopped before answering");
                None
            }
            Err(_) => {
                self.metrics
                    .record(metric_names::BRIDGE_TIMEOUT, span.elapsed_us());
                warn!(
                    id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "glossary match timed out, abandoning request"
                );
                None
            }
        }
    }

    /// Number of loads sent so far.
    pub fn loads_requested(&self) -> u64 {
        self.loads_requested.load(Ordering::SeqCst)
    }

    pub fn load_status(&self) -> LoadStatus {
        *self.load_status.borrow()
    }

    /// Wait until every load sent so far has been acknowledged.
    pub async fn wait_for_loads(&self) -> LoadStatus {
        let target = self.loads_requested();
        let mut rx = self.load_status.clone();
        let status = match rx.wait_for(|status| status.completed >= target).await {
            Ok(status) => *status,
            Err(_) => self.load_status(),
        };
        status
    }

    /// Requests still waiting for a reply.
    pub fn in_flight(&self) -> usize {
        self.pending.lock().len()
    }
}

impl Drop for GlossaryBridge {
    /// Joins the worker only outside a Tokio runtime. Inside one the worker
    /// is detached and exits on its own once it reads `Shutdown`.
    fn drop(&mut self) {
        let _ = self.commands.send(WorkerCommand::Shutdown);
        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        if tokio::runtime::Handle::try_current().is_err() {
            let _ = handle.join();
        } else {
            debug!("bridge dropped inside runtime, detaching matcher worker");
        }
    }
}

/// Removes a request from the pending map when the caller stops waiting,
/// whether it got an answer, timed out, or was dropped.
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

fn route_replies(
    replies: cb::Receiver<WorkerReply>,
    pending: PendingMap,
    status: watch::Sender<LoadStatus>,
) {
    for reply in replies.iter() {
        if let WorkerReply::LoadComplete { count } = reply {
            status.send_modify(|s| {
                s.completed += 1;
                s.entries = count;
            });
            info!(entries = count, "glossary load complete");
            continue;
        }

        let Some(id) = reply.id() else { continue };
        let waiter = pending.lock().remove(&id);
        match (waiter, reply.into_match_result()) {
            (Some(tx), Some(result)) => {
                // The caller may have given up between remove and send.
                let _ = tx.send(result);
            }
            _ => debug!(id, "discarding reply for abandoned request"),
        }
    }
    debug!("reply channel closed, router exiting");
}
