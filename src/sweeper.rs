use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDateTime, Timelike};
use serde::Serialize;
use tracing::{info, warn};
use ulid::Ulid;

use crate::engine::{Engine, NoShowReport};
use crate::model::*;

const FOLLOWUP_3D_MESSAGE: &str = "Feedback request about your appointment";
const FOLLOWUP_21D_MESSAGE: &str = "Time to book again: it has been 21 days";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepOutcome {
    Sent,
    Failed,
    /// Every sink was already covered by the ledger.
    AlreadySent,
    /// No sink is configured for this event.
    NoSink,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepDetail {
    pub booking_id: Ulid,
    pub client_name: String,
    pub date: CivilDate,
    pub time: CivilTime,
    pub outcome: SweepOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PassReport {
    pub enabled: bool,
    pub eligible: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    pub details: Vec<SweepDetail>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub ran_at: NaiveDateTime,
    pub reminder_24h: PassReport,
    pub reminder_2h: PassReport,
    pub followup_3d: PassReport,
    pub followup_21d: PassReport,
}

impl SweepReport {
    pub fn total_sent(&self) -> usize {
        self.passes().iter().map(|p| p.sent).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.passes().iter().map(|p| p.failed).sum()
    }

    fn passes(&self) -> [&PassReport; 4] {
        [
            &self.reminder_24h,
            &self.reminder_2h,
            &self.followup_3d,
            &self.followup_21d,
        ]
    }
}

/// Run the four reminder and follow-up passes once.
///
/// Passes are independent and each is gated by its own toggle. Bookings within
/// a pass go one at a time; the notification ledger makes a repeated or
/// concurrent sweep a no-op for anything already delivered.
pub async fn sweep_reminders(engine: &Engine) -> SweepReport {
    let started = Instant::now();
    let now = engine.clock().now();
    let today = CivilDate(now.date());
    let settings = engine.store.settings();
    let toggles = &settings.webhook;

    let reminder_24h = if toggles.reminder_24h {
        let due: Vec<Booking> = engine
            .store
            .bookings_on(today.add_days(1))
            .into_iter()
            .filter(|b| b.status.is_pending())
            .collect();
        run_pass(engine, EventKind::Reminder24h, due, |_| {}).await
    } else {
        PassReport::default()
    };

    let reminder_2h = if toggles.reminder_2h {
        let window = settings.reminder_2h_window;
        let due: Vec<Booking> = engine
            .store
            .bookings_on(today)
            .into_iter()
            .filter(|b| b.status.is_pending())
            .filter(|b| window.contains((b.starts_at() - now).num_minutes()))
            .collect();
        run_pass(engine, EventKind::Reminder2h, due, |_| {}).await
    } else {
        PassReport::default()
    };

    let followup_3d = if toggles.followup_3d {
        let due = attended_on(engine, today.add_days(-3));
        run_pass(engine, EventKind::Followup3d, due, |p| {
            p.follow_up = Some(FollowUpInfo {
                sent_on: today,
                days_after: 3,
                message: FOLLOWUP_3D_MESSAGE.into(),
            });
        })
        .await
    } else {
        PassReport::default()
    };

    let followup_21d = if toggles.followup_21d {
        let due = attended_on(engine, today.add_days(-21));
        run_pass(engine, EventKind::Followup21d, due, |p| {
            p.follow_up = Some(FollowUpInfo {
                sent_on: today,
                days_after: 21,
                message: FOLLOWUP_21D_MESSAGE.into(),
            });
        })
        .await
    } else {
        PassReport::default()
    };

    let report = SweepReport {
        ran_at: now,
        reminder_24h,
        reminder_2h,
        followup_3d,
        followup_21d,
    };
    metrics::counter!(crate::observability::SWEEP_RUNS_TOTAL, "kind" => "reminders").increment(1);
    metrics::histogram!(crate::observability::SWEEP_DURATION_SECONDS, "kind" => "reminders")
        .record(started.elapsed().as_secs_f64());
    info!(
        sent = report.total_sent(),
        failed = report.total_failed(),
        "reminder sweep finished"
    );
    report
}

pub async fn sweep_no_shows(engine: &Engine) -> NoShowReport {
    let started = Instant::now();
    let report = engine.mark_no_shows().await;
    metrics::counter!(crate::observability::SWEEP_RUNS_TOTAL, "kind" => "no_shows").increment(1);
    metrics::histogram!(crate::observability::SWEEP_DURATION_SECONDS, "kind" => "no_shows")
        .record(started.elapsed().as_secs_f64());
    if report.marked > 0 || !report.errors.is_empty() {
        info!(marked = report.marked, errors = report.errors.len(), "no-show sweep finished");
    }
    report
}

fn attended_on(engine: &Engine, date: CivilDate) -> Vec<Booking> {
    engine
        .store
        .bookings_on(date)
        .into_iter()
        .filter(|b| b.status == Status::Completed && b.attendance == Attendance::Present)
        .collect()
}

async fn run_pass(
    engine: &Engine,
    event: EventKind,
    due: Vec<Booking>,
    decorate: impl Fn(&mut WebhookPayload),
) -> PassReport {
    let mut report = PassReport {
        enabled: true,
        eligible: due.len(),
        ..PassReport::default()
    };
    for booking in due {
        let mut payload = WebhookPayload::for_booking(event, &booking);
        decorate(&mut payload);
        let dispatched = engine.dispatch(&booking, &payload).await;

        let outcome = if dispatched.sent() > 0 {
            report.sent += 1;
            SweepOutcome::Sent
        } else if dispatched.failed() > 0 {
            report.failed += 1;
            warn!(booking_id = %booking.id, event = event.as_str(), "sweep delivery failed");
            SweepOutcome::Failed
        } else if !dispatched.skipped.is_empty() {
            report.skipped += 1;
            SweepOutcome::AlreadySent
        } else {
            report.skipped += 1;
            SweepOutcome::NoSink
        };
        report.details.push(SweepDetail {
            booking_id: booking.id,
            client_name: booking.client_name,
            date: booking.date,
            time: booking.start,
            outcome,
        });
    }
    report
}

/// In-process timer for deployments without an external scheduler. Runs both
/// sweeps on every tick whose civil hour falls inside `hours` (inclusive).
pub async fn run_sweeper(engine: Arc<Engine>, every: Duration, hours: (u32, u32)) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let hour = engine.clock().now().hour();
        if hour < hours.0 || hour > hours.1 {
            tracing::debug!(hour, "outside sweep window");
            continue;
        }
        sweep_reminders(&engine).await;
        sweep_no_shows(&engine).await;
    }
}

/// Compact the journal whenever enough appends have piled up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => {
                metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
            }
            Err(e) => tracing::error!(error = %e, "journal compaction failed"),
        }
    }
}
