mod assign;
mod availability;
mod conflict;
mod dispatch;
mod error;
mod mutations;
mod queries;
mod store;

pub use assign::{day_load, pick_least_loaded, rank_by_load};
pub use availability::{AvailabilityReport, RejectReason, RejectedSlot, classify_slots, slot_starts};
pub use conflict::{MAX_SUGGESTIONS, find_conflict, suggest_slots};
pub use dispatch::{DispatchReport, SinkReport};
pub use error::EngineError;
pub use mutations::{
    BlockRequest, BookingReceipt, CancelOutcome, CancelRequest, FinishRequest, NewBooking,
    NoShowReport, RescheduleRequest,
};
pub use queries::{AssignmentPreview, AssignmentQuery, AvailabilityQuery};
pub use store::{Claim, DaySchedule, LedgerKey, SlotEntry, SlotKind, Store};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc, oneshot};

use crate::clock::CivilClock;
use crate::model::*;
use crate::notify::WebhookSender;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
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

/// Owns the journal. Appends that queue up while a flush is running are
/// written together and share one fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
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

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            tracing::error!(error = %e, batch = batch.len(), "journal flush failed");
        }
        for (_, tx) in batch {
            let _ = tx.send(match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            });
        }

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
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
    // Flush even after an append error so stale bytes don't ride along with the next batch.
    let flush_result = wal.flush_sync();
    match append_err {
        Some(e) => Err(e),
        None => flush_result,
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.compact(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// The booking engine: journaled state plus the clock and the outbound sender.
pub struct Engine {
    pub store: Store,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) clock: Arc<dyn CivilClock>,
    pub(super) sender: Arc<dyn WebhookSender>,
    /// Mutations hold this shared across append + apply; compaction takes it
    /// exclusively so the snapshot matches the journal it replaces.
    compact_gate: RwLock<()>,
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        clock: Arc<dyn CivilClock>,
        sender: Arc<dyn WebhookSender>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: Store::new(),
            wal_tx,
            clock,
            sender,
            compact_gate: RwLock::new(()),
        };

        // Nothing else can see these locks yet, so try_write always succeeds.
        // blocking_write would panic here since replay may run inside the runtime.
        for event in &events {
            match event {
                Event::BookingCreated { booking } | Event::BookingUpdated { booking } => {
                    if let Some(previous) = engine.store.booking(&booking.id)
                        && previous.date != booking.date
                    {
                        let old_day = engine.store.day(previous.date);
                        old_day
                            .try_write()
                            .expect("replay: uncontended write")
                            .remove(booking.id);
                    }
                    let day = engine.store.day(booking.date);
                    let mut guard = day.try_write().expect("replay: uncontended write");
                    engine.store.put_booking(booking.clone(), &mut guard);
                }
                Event::TimeBlocked { block } => {
                    let day = engine.store.day(block.date);
                    let mut guard = day.try_write().expect("replay: uncontended write");
                    engine.store.apply_block(event, &mut guard);
                }
                Event::BlockRemoved { id } => {
                    if let Some(block) = engine.store.block(id) {
                        let day = engine.store.day(block.date);
                        let mut guard = day.try_write().expect("replay: uncontended write");
                        engine.store.apply_block(event, &mut guard);
                    }
                }
                other => engine.store.apply(other),
            }
        }
        tracing::info!(
            path = %wal_path.display(),
            events = events.len(),
            bookings = engine.store.booking_count(),
            "journal replayed"
        );

        Ok(engine)
    }

    pub fn clock(&self) -> &dyn CivilClock {
        self.clock.as_ref()
    }

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

    /// Journal a non-booking event, then apply it.
    pub(super) async fn persist_and_apply(&self, event: Event) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        self.wal_append(&event).await?;
        self.store.apply(&event);
        Ok(())
    }

    /// Journal a booking snapshot, then place it on `day`. When the booking
    /// moved, `from` is the day it is leaving. Caller holds both write locks.
    pub(super) async fn persist_booking(
        &self,
        booking: Booking,
        created: bool,
        from: Option<&mut DaySchedule>,
        day: &mut DaySchedule,
    ) -> Result<(), EngineError> {
        let event = if created {
            Event::BookingCreated { booking: booking.clone() }
        } else {
            Event::BookingUpdated { booking: booking.clone() }
        };
        let _gate = self.compact_gate.read().await;
        self.wal_append(&event).await?;
        if let Some(from) = from {
            from.remove(booking.id);
        }
        self.store.put_booking(booking, day);
        Ok(())
    }

    /// Journal a block event, then apply it to `day`. Caller holds its write lock.
    pub(super) async fn persist_block(&self, event: Event, day: &mut DaySchedule) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        self.wal_append(&event).await?;
        self.store.apply_block(&event, day);
        Ok(())
    }

    /// Rewrite the journal as the minimal event set for the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.compact_gate.write().await;
        let events = self.store.snapshot();
        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        tracing::info!(events = count, "journal compacted");
        Ok(())
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
