mod allocation;
mod error;
mod ledger;
mod queries;
mod store;
mod validate;

pub use error::EngineError;
pub use store::Snapshot;

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard};
use tracing::{error, info, warn};
use ulid::Ulid;

use crate::auth::AuthorizationCodes;
use crate::limits::{WAL_RETRY_ATTEMPTS, WAL_RETRY_BASE_DELAY_MS};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::topology::Topology;
use crate::wal::Wal;

use store::OccupancyStore;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    /// Rewrite the log from the writer's own snapshot.
    Compact {
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Fold the durable events into the writer's snapshot.
/// 6. Respond to all senders.
///
/// The snapshot only ever holds events that reached disk, so compaction
/// rewrites exactly the durable state without touching engine locks.
async fn wal_writer_loop(mut wal: Wal, mut snapshot: Snapshot, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
                    }
                }

                commit_batch(&mut wal, &mut snapshot, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, &mut snapshot, other);
                }
            }
            other => handle_non_append(&mut wal, &mut snapshot, other),
        }
    }
}

fn commit_batch(
    wal: &mut Wal,
    snapshot: &mut Snapshot,
    batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>,
) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if result.is_ok() {
        for (event, _) in batch.iter() {
            snapshot.apply(event);
        }
    }
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &mut [(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if let Err(e) = &result {
        // Callers are told the whole batch failed, so none of it may stay on disk.
        if let Err(rollback) = wal.rollback() {
            error!("WAL rollback after failed batch ({e}) also failed: {rollback}");
        }
    }
    result
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, snapshot: &mut Snapshot, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { response } => {
            let events = snapshot.to_events();
            let result = wal.compact(&events);
            if result.is_ok() {
                info!("compacted WAL {} to {} events", wal.path().display(), events.len());
            }
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            commit_batch(wal, snapshot, &mut vec![(event, response)]);
        }
    }
}

/// Bed allocation and payment ledger.
///
/// Every mutation follows the same shape: take the locks it needs (booking
/// first, then bed cells in coordinate order), validate, append one event to
/// the WAL, apply it in memory, publish it on the notify hub.
pub struct Engine {
    pub(super) topology: Arc<Topology>,
    pub(super) store: OccupancyStore,
    pub(super) payments: DashMap<Ulid, Payment>,
    pub(super) codes: AuthorizationCodes,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start its writer task. Must run inside a Tokio runtime.
    pub fn new(
        wal_path: PathBuf,
        topology: Arc<Topology>,
        codes: AuthorizationCodes,
        notify: Arc<NotifyHub>,
    ) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let snapshot = Snapshot::from_events(&events);

        let store = OccupancyStore::load(&topology, &snapshot);
        let payments = snapshot
            .payments
            .iter()
            .map(|(id, p)| (*id, p.clone()))
            .collect();
        info!(
            "replayed {} events: {} bookings, {} payments",
            events.len(),
            snapshot.bookings.len(),
            snapshot.payments.len()
        );
        if codes.is_empty() {
            warn!("no payment authorization codes configured; every payment will be rejected");
        }

        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, snapshot, wal_rx));

        let engine = Self {
            topology,
            store,
            payments,
            codes,
            wal_tx,
            notify,
        };
        engine.publish_occupancy();
        Ok(engine)
    }

    /// Cut the engine off from its WAL writer, as if the writer task had died.
    #[cfg(test)]
    pub(crate) fn detach_wal_writer(&mut self) {
        let (wal_tx, _) = mpsc::channel(1);
        self.wal_tx = wal_tx;
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_send(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::StorageUnavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::StorageUnavailable("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::StorageUnavailable(e.to_string()))
    }

    /// `wal_send` with bounded exponential backoff on storage failures.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let mut attempt = 1;
        loop {
            match self.wal_send(event).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < WAL_RETRY_ATTEMPTS => {
                    let delay = WAL_RETRY_BASE_DELAY_MS << (attempt - 1);
                    warn!("WAL append attempt {attempt} failed: {e}; retrying in {delay}ms");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Acquire a booking's write lock. Fails with `NotFound` if the booking is
    /// unknown or was released while we waited for the lock.
    pub(super) async fn lock_booking(
        &self,
        id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<Booking>, EngineError> {
        let shared = self.store.get_booking(&id).ok_or(EngineError::NotFound(id))?;
        let guard = shared.clone().write_owned().await;
        match self.store.get_booking(&id) {
            Some(current) if Arc::ptr_eq(&current, &shared) => Ok(guard),
            _ => Err(EngineError::NotFound(id)),
        }
    }

    pub(super) fn check_coordinate(&self, coordinate: &Coordinate) -> Result<(), EngineError> {
        if self.topology.contains(coordinate) {
            Ok(())
        } else {
            Err(EngineError::InvalidCoordinate(*coordinate))
        }
    }

    pub(super) fn publish_occupancy(&self) {
        metrics::gauge!(crate::observability::BEDS_OCCUPIED).set(self.store.occupied_count() as f64);
    }

    /// Ask the writer to rewrite the WAL from its current durable state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { response: tx })
            .await
            .map_err(|_| EngineError::StorageUnavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::StorageUnavailable("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::StorageUnavailable(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Run a mutation on its own task so that dropping the caller's future cannot
/// split the WAL append from the in-memory apply. Records operation metrics.
pub(super) async fn run_detached<T, F>(op: &'static str, fut: F) -> Result<T, EngineError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, EngineError>> + Send + 'static,
{
    let started = Instant::now();
    let result = match tokio::spawn(fut).await {
        Ok(result) => result,
        Err(e) => Err(EngineError::Internal(format!("{op} task failed: {e}"))),
    };
    crate::observability::record_operation(op, started, &result);
    result
}
