mod conflict;
mod error;
mod locks;
mod mutations;
mod queries;
mod store;

pub use error::{Conflict, EngineError};
pub use locks::{ParticipantGuard, ParticipantLocks};
pub use store::{Filter, InMemoryStore, MeetingStore};

use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

struct WalAppend {
    event: Event,
    response: oneshot::Sender<io::Result<()>>,
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first append arrives.
/// 2. Drain all immediately available appends (the batch window).
/// 3. Single flush_sync for the whole batch.
/// 4. On success, publish the batch to `memory` in WAL order.
/// 5. Respond to all senders with the shared result.
///
/// Publishing from here makes WAL order and in-memory order the same, so a
/// replay restores exactly the order readers saw.
async fn wal_writer_loop(
    mut wal: Wal,
    memory: Arc<InMemoryStore>,
    mut rx: mpsc::Receiver<WalAppend>,
) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while let Ok(next) = rx.try_recv() {
            batch.push(next);
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        match &result {
            Ok(()) => {
                memory
                    .push_all(batch.iter().map(|append| StoredMeeting::from(append.event.clone())))
                    .await;
            }
            Err(e) => tracing::error!("WAL flush of {} records failed: {e}", batch.len()),
        }
        respond_batch(batch, &result);
    }
    tracing::debug!("WAL writer stopped after {} appends", wal.appended());
}

fn flush_batch(wal: &mut Wal, batch: &[WalAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for append in batch {
        if let Err(e) = wal.append_buffered(&append.event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<WalAppend>, result: &io::Result<()>) {
    for append in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = append.response.send(r);
    }
}

// ── Durable store ────────────────────────────────────────

/// `InMemoryStore` whose inserts are made durable in a WAL before they
/// become visible. Replays the WAL on open.
pub struct WalStore {
    memory: Arc<InMemoryStore>,
    wal_tx: mpsc::Sender<WalAppend>,
}

impl WalStore {
    /// Must be called inside a tokio runtime: spawns the WAL writer task.
    pub fn open(wal_path: &Path) -> io::Result<Self> {
        let events = Wal::recover(wal_path)?;
        let restored = events.len();
        let memory = Arc::new(InMemoryStore::from_documents(
            events.into_iter().map(StoredMeeting::from),
        ));
        tracing::debug!("replayed {restored} meetings from {}", wal_path.display());

        let wal = Wal::open(wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, memory.clone(), wal_rx));

        Ok(Self { memory, wal_tx })
    }

    /// Write event to WAL via the background group-commit writer. The event
    /// is visible to `find` once this returns `Ok`.
    async fn wal_append(&self, event: Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalAppend { event, response: tx })
            .await
            .map_err(|_| EngineError::Store("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Store("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Store(format!("WAL write failed: {e}")))
    }
}

#[async_trait]
impl MeetingStore for WalStore {
    async fn find(
        &self,
        filter: &Filter,
        limit: Option<usize>,
    ) -> Result<Vec<StoredMeeting>, EngineError> {
        self.memory.find(filter, limit).await
    }

    async fn insert(&self, meeting: Meeting) -> Result<Ulid, EngineError> {
        self.memory.ensure_capacity().await?;
        let doc_id = Ulid::new();
        self.wal_append(Event::MeetingInserted { doc_id, meeting }).await?;
        Ok(doc_id)
    }
}

// ── Engine ───────────────────────────────────────────────

/// Conflict checking, meeting creation and the read queries, over any
/// `MeetingStore`.
pub struct Engine {
    store: Arc<dyn MeetingStore>,
    locks: ParticipantLocks,
    mode: ConflictMode,
}

impl Engine {
    /// Engine over a WAL-backed store at `wal_path`.
    pub fn new(wal_path: &Path, mode: ConflictMode) -> io::Result<Self> {
        let store = WalStore::open(wal_path)?;
        Ok(Self::with_store(Arc::new(store), mode))
    }

    pub fn with_store(store: Arc<dyn MeetingStore>, mode: ConflictMode) -> Self {
        Self {
            store,
            locks: ParticipantLocks::new(),
            mode,
        }
    }

    pub fn mode(&self) -> ConflictMode {
        self.mode
    }
}
