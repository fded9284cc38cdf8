mod availability;
mod conflict;
mod effects;
mod error;
mod lifecycle;
mod mutations;
mod pricing;
mod promotion;
mod queries;
mod store;

pub use availability::{compute_slots, slot_starts, within_hours};
pub use error::{EngineError, ErrorKind};
pub use lifecycle::{RefundDecision, can_transition, refund_for};
pub use pricing::{deposit_for, quote};
pub use promotion::{discount_for, is_redeemable};
pub use store::{Booked, StaffDay};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use tokio::sync::{Mutex, OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::collab::Collaborators;
use crate::config::EngineConfig;
use crate::model::*;
use crate::wal::Wal;

use store::{BookingStore, Locked};

pub type SharedStaffDay = Arc<RwLock<StaffDay>>;
pub type SharedPromotion = Arc<Mutex<Promotion>>;

/// How often an unversioned caller re-resolves an appointment that moved
/// while it waited for the lock.
const LOCK_RETRIES: usize = 3;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task owning the WAL. Appends that arrive while a flush is being
/// prepared share a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                commit_batch(&mut wal, &mut batch);
                if let Some(cmd) = deferred {
                    handle_non_append(&mut wal, cmd);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush of {} events failed: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after a failed append so no half-written batch lingers in the buffer.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

// ── Engine ───────────────────────────────────────────────

/// All scheduling state of one business, rebuilt from its WAL on start.
pub struct Engine {
    pub business_id: Ulid,
    store: BookingStore,
    wal_tx: mpsc::Sender<WalCommand>,
    collab: Collaborators,
    config: Arc<EngineConfig>,
    /// Held shared by every mutation from its first lock to its WAL append;
    /// compaction takes it exclusively so the snapshot matches the log.
    commit_gate: RwLock<()>,
    /// Serializes catalog upserts so WAL order matches apply order.
    catalog_lock: Mutex<()>,
}

/// Borrow locked staff-days for `BookingStore::apply`.
fn locked_days(guards: &mut [OwnedRwLockWriteGuard<StaffDay>]) -> Locked<'_> {
    Locked {
        days: guards.iter_mut().map(|g| &mut **g).collect(),
        promotion: None,
    }
}

impl Engine {
    pub fn new(
        business_id: Ulid,
        wal_path: PathBuf,
        collab: Collaborators,
        config: Arc<EngineConfig>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            business_id,
            store: BookingStore::new(),
            wal_tx,
            collab,
            config,
            commit_gate: RwLock::new(()),
            catalog_lock: Mutex::new(()),
        };
        for event in &events {
            engine.replay_event(event)?;
        }
        if !events.is_empty() {
            tracing::info!("business {business_id}: replayed {} WAL events", events.len());
        }
        Ok(engine)
    }

    /// Apply one logged event. Nothing else can see the engine yet, so every
    /// lock is taken with `try_*` and never waits (this may run inside an async
    /// context, where blocking lock calls would panic).
    fn replay_event(&self, event: &Event) -> io::Result<()> {
        let shared: Vec<SharedStaffDay> = BookingStore::days_touched(event)
            .into_iter()
            .map(|(staff_id, date)| self.store.staff_day(staff_id, date))
            .collect();
        let mut days = Vec::with_capacity(shared.len());
        for day in &shared {
            days.push(
                day.try_write()
                    .map_err(|_| io::Error::other("replay: staff-day already locked"))?,
            );
        }
        let promotion = self.store.promotion_touched(event);
        let mut promotion_guard = match &promotion {
            Some(p) => Some(
                p.try_lock()
                    .map_err(|_| io::Error::other("replay: promotion already locked"))?,
            ),
            None => None,
        };
        let locked = Locked {
            days: days.iter_mut().map(|g| &mut **g).collect(),
            promotion: promotion_guard.as_deref_mut(),
        };
        self.store.apply(event, locked);
        Ok(())
    }

    pub(crate) fn now(&self) -> NaiveDateTime {
        self.collab.clock.now()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn require_business(&self) -> Result<Arc<Business>, EngineError> {
        self.store.business().ok_or(EngineError::NotFound(self.business_id))
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append then apply. The caller holds every lock the event needs.
    async fn persist_and_apply(&self, event: &Event, locked: Locked<'_>) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply(event, locked);
        Ok(())
    }

    /// Lock the staff-day holding appointment `id` (plus `also`, when given)
    /// and return a fresh read taken under those locks.
    ///
    /// Locks are taken in `(staff, date)` order. With `expected_version` set,
    /// any change since the caller's read fails with `Stale`; without it, an
    /// appointment that moved to another date while we waited is re-resolved.
    async fn lock_appointment(
        &self,
        id: Ulid,
        also: Option<NaiveDate>,
        expected_version: Option<u64>,
    ) -> Result<(Appointment, Vec<OwnedRwLockWriteGuard<StaffDay>>), EngineError> {
        for _ in 0..LOCK_RETRIES {
            let seen = self.store.appointment(&id).ok_or(EngineError::NotFound(id))?;
            if let Some(v) = expected_version
                && seen.version != v
            {
                return Err(EngineError::Stale(id));
            }

            let mut keys = vec![(seen.staff_id, seen.date)];
            if let Some(date) = also {
                keys.push((seen.staff_id, date));
            }
            keys.sort();
            keys.dedup();
            let mut guards = Vec::with_capacity(keys.len());
            for (staff_id, date) in keys {
                guards.push(self.store.staff_day(staff_id, date).write_owned().await);
            }

            let current = self.store.appointment(&id).ok_or(EngineError::NotFound(id))?;
            if current.date == seen.date {
                if let Some(v) = expected_version
                    && current.version != v
                {
                    return Err(EngineError::Stale(id));
                }
                return Ok((current, guards));
            }
            if expected_version.is_some() {
                return Err(EngineError::Stale(id));
            }
        }
        Err(EngineError::Stale(id))
    }
}
