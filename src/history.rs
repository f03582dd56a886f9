//! Per-user translation history with async batch writing.
//! Records go through a channel and are flushed to SQLite every 300ms, so
//! the translate path never waits on disk I/O.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// A single translation history record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub request_id: String,
    pub user_id: String,
    pub source_text: String,
    pub translated_text: String,
    pub source_lang: String,
    pub target_lang: String,
    /// Glossary match method, or "remote".
    pub method: String,
    pub created_at: i64,
}

/// A stored record with its row id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub id: i64,
    #[serde(flatten)]
    pub record: HistoryRecord,
}

enum HistoryCommand {
    Record(HistoryRecord),
    Flush(oneshot::Sender<()>),
}

pub struct HistoryStore {
    tx: mpsc::UnboundedSender<HistoryCommand>,
    /// Direct DB connection for reads and deletes.
    read_conn: Mutex<Connection>,
}

impl HistoryStore {
    /// Open (or create) the history database and spawn the flush task.
    /// Must be called inside a Tokio runtime.
    pub fn open(db_path: &Path) -> Result<Arc<Self>, String> {
        let read_conn = open_conn(db_path)?;
        read_conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS history (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    request_id TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    source_text TEXT NOT NULL,
                    translated_text TEXT NOT NULL,
                    source_lang TEXT NOT NULL,
                    target_lang TEXT NOT NULL,
                    method TEXT NOT NULL,
                    created_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_history_user_created
                    ON history(user_id, created_at);",
            )
            .map_err(|e| format!("create history table failed: {e}"))?;

        let write_conn = open_conn(db_path)?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(flush_loop(rx, write_conn));

        info!(path = %db_path.display(), "history store opened with batch writer");

        Ok(Arc::new(Self {
            tx,
            read_conn: Mutex::new(read_conn),
        }))
    }

    /// Queue a record for the next batch. Never blocks.
    pub fn record(&self, entry: HistoryRecord) {
        if self.tx.send(HistoryCommand::Record(entry)).is_err() {
            warn!("history channel closed, record dropped");
        }
    }

    /// Wait until everything queued so far is on disk.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(HistoryCommand::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Handle that records on behalf of one user.
    pub fn for_user(self: &Arc<Self>, user_id: impl Into<String>) -> UserHistory {
        UserHistory {
            store: Arc::clone(self),
            user_id: user_id.into(),
            last: Mutex::new(None),
        }
    }

    /// A user's records, newest first.
    pub fn query_recent(&self, user_id: &str, limit: usize) -> Vec<HistoryEntry> {
        let conn = self.read_conn.lock();
        let mut stmt = match conn.prepare(
            "SELECT id, request_id, user_id, source_text, translated_text,
                    source_lang, target_lang, method, created_at
             FROM history WHERE user_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2",
        ) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "history query prepare failed");
                return Vec::new();
            }
        };

        let rows = stmt.query_map(params![user_id, limit as i64], |row| {
            Ok(HistoryEntry {
                id: row.get(0)?,
                record: HistoryRecord {
                    request_id: row.get(1)?,
                    user_id: row.get(2)?,
                    source_text: row.get(3)?,
                    translated_text: row.get(4)?,
                    source_lang: row.get(5)?,
                    target_lang: row.get(6)?,
                    method: row.get(7)?,
                    created_at: row.get(8)?,
                },
            })
        });

        match rows {
            Ok(iter) => iter.filter_map(|r| r.ok()).collect(),
            Err(e) => {
                warn!(error = %e, "history query failed");
                Vec::new()
            }
        }
    }

    /// Delete one record if it belongs to `user_id`. Ok(false) when the row
    /// is missing or owned by someone else.
    pub fn delete(&self, user_id: &str, id: i64) -> Result<bool, String> {
        let conn = self.read_conn.lock();
        let owner: Option<String> = conn
            .query_row("SELECT user_id FROM history WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|e| format!("history lookup failed: {e}"))?;

        if owner.as_deref() != Some(user_id) {
            debug!(id, "history delete refused: not found or not owned");
            return Ok(false);
        }
        conn.execute("DELETE FROM history WHERE id = ?1", params![id])
            .map_err(|e| format!("history delete failed: {e}"))?;
        Ok(true)
    }

    /// Delete history older than the given number of days.
    pub fn cleanup_older_than_days(&self, days: u32) -> usize {
        let conn = self.read_conn.lock();
        let cutoff = now_unix() - (days as i64 * 86400);
        match conn.execute("DELETE FROM history WHERE created_at <= ?1", params![cutoff]) {
            Ok(count) => {
                if count > 0 {
                    info!(removed = count, days, "history cleanup");
                }
                count
            }
            Err(e) => {
                warn!(error = %e, "history cleanup failed");
                0
            }
        }
    }
}

/// Records translations for one user, skipping an exact repeat of that
/// user's most recent pair.
pub struct UserHistory {
    store: Arc<HistoryStore>,
    user_id: String,
    last: Mutex<Option<(String, String)>>,
}

impl UserHistory {
    /// Returns false when the record was skipped as a repeat or empty.
    pub fn record(
        &self,
        request_id: &str,
        source_text: &str,
        translated_text: &str,
        source_lang: &str,
        target_lang: &str,
        method: &str,
    ) -> bool {
        if source_text.is_empty() || translated_text.is_empty() {
            return false;
        }
        {
            let mut last = self.last.lock();
            if let Some((src, tgt)) = last.as_ref() {
                if src == source_text && tgt == translated_text {
                    return false;
                }
            }
            *last = Some((source_text.to_string(), translated_text.to_string()));
        }
        self.store.record(HistoryRecord {
            request_id: request_id.to_string(),
            user_id: self.user_id.clone(),
            source_text: source_text.to_string(),
            translated_text: translated_text.to_string(),
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
            method: method.to_string(),
            created_at: now_unix(),
        });
        true
    }
}

fn open_conn(db_path: &Path) -> Result<Connection, String> {
    let conn = Connection::open(db_path)
        .map_err(|e| format!("failed to open history DB: {e}"))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
        .map_err(|e| format!("PRAGMA failed: {e}"))?;
    Ok(conn)
}

async fn flush_loop(mut rx: mpsc::UnboundedReceiver<HistoryCommand>, conn: Connection) {
    let flush_interval = Duration::from_millis(300);
    let mut buffer: Vec<HistoryRecord> = Vec::with_capacity(32);
    let mut waiters: Vec<oneshot::Sender<()>> = Vec::new();

    loop {
        tokio::select! {
            _ = tokio::time::sleep(flush_interval) => {}
            msg = rx.recv() => match msg {
                Some(HistoryCommand::Record(record)) => buffer.push(record),
                Some(HistoryCommand::Flush(done)) => waiters.push(done),
                None => {
                    if !buffer.is_empty() {
                        flush_batch(&conn, &buffer);
                    }
                    info!("history flush loop exiting (channel closed)");
                    return;
                }
            }
        }

        while let Ok(command) = rx.try_recv() {
            match command {
                HistoryCommand::Record(record) => buffer.push(record),
                HistoryCommand::Flush(done) => waiters.push(done),
            }
        }

        if !buffer.is_empty() {
            flush_batch(&conn, &buffer);
            buffer.clear();
        }
        for done in waiters.drain(..) {
            let _ = done.send(());
        }
    }
}

/// Batch-insert records within one transaction.
fn flush_batch(conn: &Connection, records: &[HistoryRecord]) {
    let start = std::time::Instant::now();

    if let Err(e) = conn.execute_batch("BEGIN TRANSACTION") {
        warn!(error = %e, "history batch begin failed");
        return;
    }

    let mut stmt = match conn.prepare_cached(
        "INSERT INTO history
         (request_id, user_id, source_text, translated_text,
          source_lang, target_lang, method, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    ) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "history batch prepare failed");
            let _ = conn.execute_batch("ROLLBACK");
            return;
        }
    };

    for record in records {
        if let Err(e) = stmt.execute(params![
            record.request_id,
            record.user_id,
            record.source_text,
            record.translated_text,
            record.source_lang,
            record.target_lang,
            record.method,
            record.created_at,
        ]) {
            warn!(error = %e, request_id = %record.request_id, "history insert failed");
        }
    }
    drop(stmt);

    if let Err(e) = conn.execute_batch("COMMIT") {
        warn!(error = %e, "history batch commit failed");
    } else {
        debug!(
            count = records.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "history batch flushed"
        );
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
