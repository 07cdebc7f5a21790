use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedRwLockWriteGuard;
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::assign::{day_load, pick_least_loaded};
use super::conflict::{find_conflict, suggest_slots};
use super::dispatch::DispatchReport;
use super::store::DaySchedule;
use super::{Engine, EngineError};

// ── Requests ─────────────────────────────────────────────

/// Inbound booking request. Every field is optional on the wire so that
/// missing ones can be reported together.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewBooking {
    pub client_name: Option<String>,
    pub phone: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub service_ids: Vec<String>,
    pub package_ids: Vec<String>,
    /// Professional id or a fragment of their name. Absent means round-robin.
    pub professional: Option<String>,
    pub notes: Option<String>,
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CancelRequest {
    pub reason: Option<String>,
    pub actor: ActorRole,
    pub force: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RescheduleRequest {
    pub date: Option<String>,
    pub time: Option<String>,
}

/// Takes `[start, end)` out of one professional's day.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BlockRequest {
    /// Professional id or a fragment of their name.
    pub professional: Option<String>,
    pub date: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FinishRequest {
    /// Final amount charged, in currency units.
    pub final_value: Option<f64>,
    pub notes: Option<String>,
}

// ── Results ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct BookingReceipt {
    pub booking: Booking,
    pub notifications: DispatchReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelOutcome {
    pub booking: Booking,
    pub record: CancellationRecord,
    pub notifications: DispatchReport,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NoShowReport {
    pub checked: usize,
    pub marked: usize,
    pub errors: Vec<String>,
}

struct Draft {
    client_name: String,
    phone: String,
    client_id: Option<String>,
    date: CivilDate,
    start: CivilTime,
    services: Vec<BookedService>,
    packages: Vec<Package>,
    professional: Option<String>,
    notes: Option<String>,
}

/// Write locks for a booking's current day and, when it is moving, its target day.
enum DayLocks {
    Same(OwnedRwLockWriteGuard<DaySchedule>),
    Pair {
        from: OwnedRwLockWriteGuard<DaySchedule>,
        to: OwnedRwLockWriteGuard<DaySchedule>,
    },
}

fn required(value: Option<String>, field: &str, errors: &mut Vec<String>) -> Option<String> {
    match value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        Some(v) => Some(v),
        None => {
            errors.push(format!("{field} is required"));
            None
        }
    }
}

fn check_len(value: Option<&str>, max: usize, field: &str, errors: &mut Vec<String>) {
    if let Some(v) = value
        && v.len() > max
    {
        errors.push(format!("{field} exceeds {max} characters"));
    }
}

fn parse_ids(raw: &[String], kind: &str, errors: &mut Vec<String>) -> Vec<Ulid> {
    raw.iter()
        .filter_map(|s| match s.trim().parse::<Ulid>() {
            Ok(id) => Some(id),
            Err(_) => {
                errors.push(format!("invalid {kind} id '{s}'"));
                None
            }
        })
        .collect()
}

fn parse_date_time(
    date: Option<String>,
    time: Option<String>,
    errors: &mut Vec<String>,
) -> Option<(CivilDate, CivilTime)> {
    let date = required(date, "date", errors).and_then(|d| {
        d.parse::<CivilDate>()
            .map_err(|e| errors.push(e))
            .ok()
    });
    let time = required(time, "time", errors).and_then(|t| {
        t.parse::<CivilTime>()
            .map_err(|e| errors.push(e))
            .ok()
    });
    date.zip(time)
}

fn amount_to_cents(amount: f64) -> Option<Cents> {
    (amount.is_finite() && amount >= 0.0).then(|| (amount * 100.0).round() as Cents)
}

fn hours_until(start: NaiveDateTime, now: NaiveDateTime) -> f64 {
    (start - now).num_seconds() as f64 / 3600.0
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

impl Engine {
    // ── Booking lifecycle ────────────────────────────────

    pub async fn create_booking(&self, req: NewBooking) -> Result<BookingReceipt, EngineError> {
        let draft = self.validate_new_booking(req)?;
        let settings = self.store.settings();

        let day = self.store.day(draft.date);
        let mut guard = day.write_owned().await;
        if guard.len() >= MAX_BOOKINGS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many bookings on this day"));
        }

        let (professional, assignment) = match draft.professional.as_deref() {
            Some(key) => (self.resolve_professional(key)?, "explicit"),
            None => {
                let active = self.store.active_professionals();
                let chosen = pick_least_loaded(&active, &day_load(&guard))
                    .cloned()
                    .ok_or(EngineError::NoActiveProfessionals)?;
                (chosen, "round_robin")
            }
        };

        let duration = total_duration(draft.services.iter().map(|s| s.duration_minutes));
        let window = Window::new(draft.start.minutes(), duration);
        if let Some(hit) = find_conflict(&guard, professional.id, &window, None) {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            warn!(professional = %professional.name, date = %draft.date, time = %draft.start, conflicting = %hit.id, "booking conflict");
            return Err(EngineError::Conflict {
                professional: professional.name,
                date: draft.date,
                start: draft.start,
                conflicting: hit.id,
                kind: hit.kind,
                suggestions: suggest_slots(hit.window.end, settings.closing_for(draft.date)),
            });
        }

        let now = self.clock.now();
        let mut booking = Booking {
            id: Ulid::new(),
            client_name: draft.client_name,
            phone: draft.phone,
            client_id: draft.client_id,
            professional_id: professional.id,
            professional_name: professional.name,
            date: draft.date,
            start: draft.start,
            total_value: draft.services.iter().map(|s| s.price).sum::<Cents>()
                + draft.packages.iter().map(|p| p.total_value).sum::<Cents>(),
            services: draft.services,
            packages: draft.packages.iter().map(|p| p.name.clone()).collect(),
            status: Status::Scheduled,
            attendance: Attendance::Unknown,
            notes: draft.notes,
            created_at: now,
            updated_at: now,
            checked_in_at: None,
            checked_out_at: None,
            service_minutes: None,
        };
        if !booking.packages.is_empty() {
            booking.append_note(&format!("PACKAGE: {} (1st session)", booking.packages.join(", ")));
        }

        self.persist_booking(booking.clone(), true, None, &mut guard).await?;
        drop(guard);

        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL, "assignment" => assignment)
            .increment(1);
        info!(booking_id = %booking.id, professional = %booking.professional_name, date = %booking.date, time = %booking.start, assignment, "booking created");

        let payload = WebhookPayload::for_booking(EventKind::Created, &booking);
        let notifications = self.dispatch(&booking, &payload).await;
        Ok(BookingReceipt {
            booking,
            notifications,
        })
    }

    pub async fn cancel_booking(
        &self,
        id: Ulid,
        req: CancelRequest,
    ) -> Result<CancelOutcome, EngineError> {
        let mut errors = Vec::new();
        check_len(req.reason.as_deref(), MAX_REASON_LEN, "reason", &mut errors);
        if !errors.is_empty() {
            return Err(EngineError::Validation(errors));
        }

        let (booking, mut guard) = self.lock_booking(id).await?;
        if booking.status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                id,
                from: booking.status,
                action: "cancel",
            });
        }

        let now = self.clock.now();
        let deadline = self.store.settings().cancellation_deadline_hours;
        let hours = hours_until(booking.starts_at(), now);
        let on_time = hours >= deadline as f64;
        if req.actor == ActorRole::Client && !req.force && !on_time {
            metrics::counter!(crate::observability::CANCELLATIONS_REFUSED_TOTAL).increment(1);
            warn!(booking_id = %id, hours_remaining = hours, minimum_hours = deadline, "client cancellation past deadline");
            return Err(EngineError::DeadlineNotMet {
                hours_remaining: hours,
                minimum_hours: deadline,
            });
        }

        let reason = req
            .reason
            .clone()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        let record = CancellationRecord {
            booking_id: id,
            actor: req.actor,
            reason: reason.clone().unwrap_or_else(|| "No reason given".into()),
            hours_notice: hours.max(0.0),
            permitted: req.actor != ActorRole::Client || on_time,
            client_name: booking.client_name.clone(),
            phone: booking.phone.clone(),
            professional_name: booking.professional_name.clone(),
            date: booking.date,
            start: booking.start,
            value: booking.total_value,
            canceled_at: now,
        };
        self.persist_and_apply(Event::CancellationRecorded {
            record: record.clone(),
        })
        .await?;

        let mut updated = booking;
        updated.status = Status::Canceled;
        updated.attendance = Attendance::Absent;
        updated.updated_at = now;
        updated.append_note(&format!(
            "CANCELED: {} ({})",
            reason.as_deref().unwrap_or("no reason"),
            req.actor.as_str()
        ));
        self.persist_booking(updated.clone(), false, None, &mut guard).await?;
        drop(guard);

        metrics::counter!(crate::observability::BOOKINGS_CANCELED_TOTAL, "actor" => req.actor.as_str())
            .increment(1);
        info!(booking_id = %id, actor = req.actor.as_str(), hours_notice = hours, "booking canceled");

        let mut payload = WebhookPayload::for_booking(EventKind::Canceled, &updated);
        payload.cancellation = Some(CancellationInfo {
            actor: req.actor,
            reason,
            hours_notice: format!("{hours:.1}"),
        });
        let notifications = self.dispatch(&updated, &payload).await;
        Ok(CancelOutcome {
            booking: updated,
            record,
            notifications,
        })
    }

    pub async fn reschedule_booking(
        &self,
        id: Ulid,
        req: RescheduleRequest,
    ) -> Result<BookingReceipt, EngineError> {
        let mut errors = Vec::new();
        let target = parse_date_time(req.date, req.time, &mut errors);
        let Some((date, start)) = target.filter(|_| errors.is_empty()) else {
            return Err(EngineError::Validation(errors));
        };

        let (booking, mut locks) = self.lock_booking_move(id, date).await?;
        if booking.status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                id,
                from: booking.status,
                action: "reschedule",
            });
        }

        let window = Window::new(start.minutes(), booking.duration());
        let target_day: &DaySchedule = match &locks {
            DayLocks::Same(g) => &**g,
            DayLocks::Pair { to, .. } => &**to,
        };
        if matches!(locks, DayLocks::Pair { .. }) && target_day.len() >= MAX_BOOKINGS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many bookings on this day"));
        }
        if let Some(hit) = find_conflict(target_day, booking.professional_id, &window, Some(id)) {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            warn!(booking_id = %id, date = %date, time = %start, conflicting = %hit.id, "reschedule conflict");
            return Err(EngineError::Conflict {
                professional: booking.professional_name.clone(),
                date,
                start,
                conflicting: hit.id,
                kind: hit.kind,
                suggestions: suggest_slots(hit.window.end, self.store.settings().closing_for(date)),
            });
        }

        let (previous_date, previous_time) = (booking.date, booking.start);
        let mut updated = booking;
        updated.date = date;
        updated.start = start;
        updated.status = Status::Scheduled;
        updated.updated_at = self.clock.now();
        match &mut locks {
            DayLocks::Same(g) => self.persist_booking(updated.clone(), false, None, g).await?,
            DayLocks::Pair { from, to } => {
                self.persist_booking(updated.clone(), false, Some(&mut **from), to).await?
            }
        }
        drop(locks);
        info!(booking_id = %id, from = %previous_date, to = %date, time = %start, "booking rescheduled");

        let mut payload = WebhookPayload::for_booking(EventKind::Rescheduled, &updated);
        payload.reschedule = Some(RescheduleInfo {
            previous_date,
            previous_time,
        });
        let notifications = self.dispatch(&updated, &payload).await;
        Ok(BookingReceipt {
            booking: updated,
            notifications,
        })
    }

    pub async fn confirm_booking(&self, id: Ulid) -> Result<BookingReceipt, EngineError> {
        let booking = self
            .transition(id, "confirm", |s| s == Status::Scheduled, |b, _| {
                b.status = Status::Confirmed;
            })
            .await?;
        let payload = WebhookPayload::for_booking(EventKind::Confirmed, &booking);
        let notifications = self.dispatch(&booking, &payload).await;
        Ok(BookingReceipt {
            booking,
            notifications,
        })
    }

    pub async fn check_in(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.transition(id, "check in", |s| s.is_pending(), |b, now| {
            b.status = Status::InProgress;
            b.attendance = Attendance::Present;
            b.checked_in_at = Some(now);
        })
        .await
    }

    pub async fn finish_booking(&self, id: Ulid, req: FinishRequest) -> Result<Booking, EngineError> {
        let mut errors = Vec::new();
        check_len(req.notes.as_deref(), MAX_NOTES_LEN, "notes", &mut errors);
        let final_value = match req.final_value {
            Some(v) => match amount_to_cents(v) {
                Some(c) => Some(c),
                None => {
                    errors.push("final_value must be a non-negative amount".into());
                    None
                }
            },
            None => None,
        };
        if !errors.is_empty() {
            return Err(EngineError::Validation(errors));
        }

        self.transition(id, "finish", |s| !s.is_terminal(), move |b, now| {
            b.status = Status::Completed;
            b.attendance = Attendance::Present;
            b.checked_out_at = Some(now);
            b.service_minutes = b
                .checked_in_at
                .map(|at| (now - at).num_minutes().max(0) as Minutes);
            if let Some(value) = final_value {
                b.total_value = value;
            }
            if let Some(notes) = req.notes.filter(|n| !n.trim().is_empty()) {
                b.notes = Some(notes);
            }
        })
        .await
    }

    /// Attended closes the booking as completed; absent cancels it as a no-show.
    pub async fn record_attendance(
        &self,
        id: Ulid,
        attended: bool,
        notes: Option<String>,
    ) -> Result<Booking, EngineError> {
        let mut errors = Vec::new();
        check_len(notes.as_deref(), MAX_NOTES_LEN, "notes", &mut errors);
        if !errors.is_empty() {
            return Err(EngineError::Validation(errors));
        }
        let notes = notes.filter(|n| !n.trim().is_empty());

        self.transition(id, "record attendance for", |s| !s.is_terminal(), move |b, now| {
            if attended {
                b.status = Status::Completed;
                b.attendance = Attendance::Present;
                b.checked_in_at = b.checked_in_at.or(Some(now));
                if let Some(notes) = notes {
                    b.notes = Some(notes);
                }
            } else {
                b.status = Status::Canceled;
                b.attendance = Attendance::Absent;
                b.append_note("No-show: client did not attend");
                if let Some(notes) = notes {
                    b.append_note(&notes);
                }
            }
        })
        .await
    }

    /// Cancel every pending booking whose start plus the tolerance has passed.
    /// Per-booking failures are collected, not fatal.
    pub async fn mark_no_shows(&self) -> NoShowReport {
        let now = self.clock.now();
        let tolerance = chrono::Duration::minutes(self.store.settings().no_show_tolerance_minutes as i64);
        let overdue = |b: &Booking| b.status.is_pending() && b.starts_at() + tolerance < now;

        let pending: Vec<Booking> = self
            .store
            .all_bookings()
            .into_iter()
            .filter(|b| b.status.is_pending())
            .collect();
        let mut report = NoShowReport {
            checked: pending.len(),
            ..NoShowReport::default()
        };

        for booking in pending.iter().filter(|b| overdue(b)) {
            match self.mark_no_show(booking.id, now, tolerance).await {
                Ok(true) => {
                    report.marked += 1;
                    info!(booking_id = %booking.id, date = %booking.date, time = %booking.start, "marked as no-show");
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(booking_id = %booking.id, error = %e, "no-show marking failed");
                    report.errors.push(format!("{}: {e}", booking.client_name));
                }
            }
        }
        report
    }

    /// Re-checked under the day lock; `false` if the booking changed meanwhile.
    async fn mark_no_show(
        &self,
        id: Ulid,
        now: NaiveDateTime,
        tolerance: chrono::Duration,
    ) -> Result<bool, EngineError> {
        let (current, mut guard) = self.lock_booking(id).await?;
        if !current.status.is_pending() || current.starts_at() + tolerance >= now {
            return Ok(false);
        }
        let mut updated = current;
        updated.status = Status::Canceled;
        updated.attendance = Attendance::Absent;
        updated.updated_at = now;
        updated.append_note("No-show");
        self.persist_booking(updated, false, None, &mut guard).await?;
        Ok(true)
    }

    // ── Time blocks ──────────────────────────────────────

    pub async fn block_time(&self, req: BlockRequest) -> Result<TimeBlock, EngineError> {
        let mut errors = Vec::new();
        let professional = required(req.professional, "professional", &mut errors);
        let date = required(req.date, "date", &mut errors)
            .and_then(|d| d.parse::<CivilDate>().map_err(|e| errors.push(e)).ok());
        let start = required(req.start, "start", &mut errors)
            .and_then(|t| t.parse::<CivilTime>().map_err(|e| errors.push(e)).ok());
        let end = required(req.end, "end", &mut errors)
            .and_then(|t| t.parse::<CivilTime>().map_err(|e| errors.push(e)).ok());
        let reason = required(req.reason, "reason", &mut errors);
        check_len(professional.as_deref(), MAX_NAME_LEN, "professional", &mut errors);
        check_len(reason.as_deref(), MAX_REASON_LEN, "reason", &mut errors);
        if let (Some(start), Some(end)) = (start, end)
            && end <= start
        {
            errors.push("end must be after start".into());
        }
        let (Some(professional), Some(date), Some(start), Some(end), Some(reason)) =
            (professional, date, start, end, reason)
        else {
            return Err(EngineError::Validation(errors));
        };
        if !errors.is_empty() {
            return Err(EngineError::Validation(errors));
        }
        let professional = self.resolve_professional(&professional)?;

        let day = self.store.day(date);
        let mut guard = day.write_owned().await;
        if guard.len() >= MAX_BOOKINGS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many bookings on this day"));
        }
        let block = TimeBlock {
            id: Ulid::new(),
            professional_id: professional.id,
            professional_name: professional.name,
            date,
            start,
            end,
            reason,
            created_at: self.clock.now(),
        };
        if let Some(hit) = find_conflict(&guard, block.professional_id, &block.window(), None) {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            warn!(professional = %block.professional_name, date = %date, start = %start, conflicting = %hit.id, "time block conflict");
            return Err(EngineError::Conflict {
                professional: block.professional_name,
                date,
                start,
                conflicting: hit.id,
                kind: hit.kind,
                suggestions: Vec::new(),
            });
        }

        self.persist_block(Event::TimeBlocked { block: block.clone() }, &mut guard)
            .await?;
        metrics::counter!(crate::observability::TIME_BLOCKS_TOTAL).increment(1);
        info!(block_id = %block.id, professional = %block.professional_name, date = %date, start = %start, end = %end, "time blocked");
        Ok(block)
    }

    /// Give a blocked stretch back to the schedule.
    pub async fn unblock_time(&self, id: Ulid) -> Result<TimeBlock, EngineError> {
        let not_found = || EngineError::NotFound(format!("time block {id}"));
        let block = self.store.block(&id).ok_or_else(not_found)?;
        let day = self.store.day(block.date);
        let mut guard = day.write_owned().await;
        // Another request may have removed it while we waited for the lock.
        let block = self.store.block(&id).ok_or_else(not_found)?;
        self.persist_block(Event::BlockRemoved { id }, &mut guard).await?;
        info!(block_id = %id, professional = %block.professional_name, date = %block.date, "time unblocked");
        Ok(block)
    }

    // ── Reference data ───────────────────────────────────

    pub async fn upsert_professional(
        &self,
        id: Ulid,
        name: String,
        active: bool,
    ) -> Result<Professional, EngineError> {
        let name = name.trim().to_string();
        let mut errors = Vec::new();
        if name.is_empty() {
            errors.push("name is required".into());
        }
        check_len(Some(&name), MAX_NAME_LEN, "name", &mut errors);
        if !errors.is_empty() {
            return Err(EngineError::Validation(errors));
        }
        if self.store.professional(&id).is_none()
            && self.store.professional_count() >= MAX_PROFESSIONALS
        {
            return Err(EngineError::LimitExceeded("too many professionals"));
        }
        let professional = Professional { id, name, active };
        self.persist_and_apply(Event::ProfessionalUpserted {
            professional: professional.clone(),
        })
        .await?;
        info!(professional_id = %id, name = %professional.name, active, "professional saved");
        Ok(professional)
    }

    pub async fn upsert_service(&self, service: Service) -> Result<Service, EngineError> {
        let mut errors = Vec::new();
        if service.name.trim().is_empty() {
            errors.push("name is required".into());
        }
        check_len(Some(&service.name), MAX_NAME_LEN, "name", &mut errors);
        if service.price < 0 {
            errors.push("price must not be negative".into());
        }
        match service.duration_minutes {
            Some(0) => errors.push("duration_minutes must be positive".into()),
            Some(m) if m > CivilTime::MINUTES_PER_DAY => errors.push(format!(
                "duration_minutes must not exceed {}",
                CivilTime::MINUTES_PER_DAY
            )),
            _ => {}
        }
        if !errors.is_empty() {
            return Err(EngineError::Validation(errors));
        }
        if self.store.service(&service.id).is_none() && self.store.service_count() >= MAX_SERVICES {
            return Err(EngineError::LimitExceeded("too many services"));
        }
        self.persist_and_apply(Event::ServiceUpserted {
            service: service.clone(),
        })
        .await?;
        Ok(service)
    }

    pub async fn upsert_package(&self, package: Package) -> Result<Package, EngineError> {
        let mut errors = Vec::new();
        if package.name.trim().is_empty() {
            errors.push("name is required".into());
        }
        check_len(Some(&package.name), MAX_NAME_LEN, "name", &mut errors);
        if package.total_value < 0 {
            errors.push("total_value must not be negative".into());
        }
        if !errors.is_empty() {
            return Err(EngineError::Validation(errors));
        }
        if self.store.package(&package.id).is_none() && self.store.package_count() >= MAX_PACKAGES {
            return Err(EngineError::LimitExceeded("too many packages"));
        }
        self.persist_and_apply(Event::PackageUpserted {
            package: package.clone(),
        })
        .await?;
        Ok(package)
    }

    pub async fn update_settings(&self, settings: Settings) -> Result<Settings, EngineError> {
        let mut errors = Vec::new();
        for (i, day) in settings.business_hours.days.iter().enumerate() {
            if day.active && day.open >= day.close {
                errors.push(format!("business_hours.days[{i}]: open must be before close"));
            }
        }
        if let Some(url) = settings.webhook.url.as_deref().filter(|u| !u.is_empty()) {
            if !is_http_url(url) {
                errors.push("webhook.url must be an http(s) URL".into());
            }
            check_len(Some(url), MAX_URL_LEN, "webhook.url", &mut errors);
        }
        if settings.reminder_2h_window.width_minutes == 0 {
            errors.push("reminder_2h_window.width_minutes must be positive".into());
        }
        if !errors.is_empty() {
            return Err(EngineError::Validation(errors));
        }
        self.persist_and_apply(Event::SettingsUpdated {
            settings: settings.clone(),
        })
        .await?;
        info!("settings updated");
        Ok(settings)
    }

    pub async fn set_professional_webhook(
        &self,
        webhook: ProfessionalWebhook,
    ) -> Result<ProfessionalWebhook, EngineError> {
        if self.store.professional(&webhook.professional_id).is_none() {
            return Err(EngineError::NotFound(format!(
                "professional {}",
                webhook.professional_id
            )));
        }
        let mut errors = Vec::new();
        if !is_http_url(&webhook.url) {
            errors.push("url must be an http(s) URL".into());
        }
        check_len(Some(&webhook.url), MAX_URL_LEN, "url", &mut errors);
        if !errors.is_empty() {
            return Err(EngineError::Validation(errors));
        }
        self.persist_and_apply(Event::ProfessionalWebhookSet {
            webhook: webhook.clone(),
        })
        .await?;
        info!(professional_id = %webhook.professional_id, active = webhook.active, "professional webhook saved");
        Ok(webhook)
    }

    // ── Helpers ──────────────────────────────────────────

    fn validate_new_booking(&self, req: NewBooking) -> Result<Draft, EngineError> {
        let mut errors = Vec::new();
        let client_name = required(req.client_name, "client_name", &mut errors);
        let phone = required(req.phone, "phone", &mut errors);
        let when = parse_date_time(req.date, req.time, &mut errors);
        if req.service_ids.is_empty() && req.package_ids.is_empty() {
            errors.push("at least one service_id or package_id is required".into());
        }
        if req.service_ids.len() + req.package_ids.len() > MAX_ITEMS_PER_BOOKING {
            errors.push(format!("at most {MAX_ITEMS_PER_BOOKING} services and packages per booking"));
        }
        check_len(client_name.as_deref(), MAX_NAME_LEN, "client_name", &mut errors);
        check_len(phone.as_deref(), MAX_PHONE_LEN, "phone", &mut errors);
        check_len(req.notes.as_deref(), MAX_NOTES_LEN, "notes", &mut errors);
        check_len(req.professional.as_deref(), MAX_NAME_LEN, "professional", &mut errors);
        let service_ids = parse_ids(&req.service_ids, "service", &mut errors);
        let package_ids = parse_ids(&req.package_ids, "package", &mut errors);

        let (Some(client_name), Some(phone), Some((date, start))) = (client_name, phone, when)
        else {
            return Err(EngineError::Validation(errors));
        };
        if !errors.is_empty() {
            return Err(EngineError::Validation(errors));
        }

        let services = service_ids
            .iter()
            .map(|id| match self.store.service(id) {
                Some(s) if s.active => Ok(BookedService {
                    service_id: s.id,
                    name: s.name,
                    price: s.price,
                    duration_minutes: s.duration_minutes,
                }),
                _ => Err(EngineError::NotFound(format!("service {id}"))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        let packages = package_ids
            .iter()
            .map(|id| match self.store.package(id) {
                Some(p) if p.active => Ok(p),
                _ => Err(EngineError::NotFound(format!("package {id}"))),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Draft {
            client_name,
            phone,
            client_id: req.client_id.filter(|c| !c.trim().is_empty()),
            date,
            start,
            services,
            packages,
            professional: req.professional.map(|p| p.trim().to_string()).filter(|p| !p.is_empty()),
            notes: req.notes.filter(|n| !n.trim().is_empty()),
        })
    }

    /// An id must name an active professional; anything else is matched as a
    /// case-insensitive name fragment and must single one out.
    pub(super) fn resolve_professional(&self, key: &str) -> Result<Professional, EngineError> {
        let not_found = || EngineError::NotFound(format!("professional '{key}'"));
        if let Ok(id) = key.parse::<Ulid>() {
            return self
                .store
                .professional(&id)
                .filter(|p| p.active)
                .ok_or_else(not_found);
        }
        let needle = key.to_lowercase();
        let matches: Vec<Professional> = self
            .store
            .active_professionals()
            .into_iter()
            .filter(|p| p.name.to_lowercase().contains(&needle))
            .collect();
        match matches.as_slice() {
            [only] => Ok(only.clone()),
            [] => Err(not_found()),
            many => many
                .iter()
                .find(|p| p.name.to_lowercase() == needle)
                .cloned()
                .ok_or_else(not_found),
        }
    }

    /// Lock the day a booking currently sits on and return a fresh copy of it.
    /// Retries if the booking moved while the lock was being acquired.
    pub(super) async fn lock_booking(
        &self,
        id: Ulid,
    ) -> Result<(Booking, OwnedRwLockWriteGuard<DaySchedule>), EngineError> {
        loop {
            let seen = self
                .store
                .booking(&id)
                .ok_or_else(|| EngineError::booking_not_found(id))?;
            let guard = self.store.day(seen.date).write_owned().await;
            let current = self
                .store
                .booking(&id)
                .ok_or_else(|| EngineError::booking_not_found(id))?;
            if current.date == guard.date {
                return Ok((current, guard));
            }
        }
    }

    /// Like `lock_booking`, also locking `target` when it differs. Two days
    /// are always locked in date order.
    async fn lock_booking_move(
        &self,
        id: Ulid,
        target: CivilDate,
    ) -> Result<(Booking, DayLocks), EngineError> {
        loop {
            let seen = self
                .store
                .booking(&id)
                .ok_or_else(|| EngineError::booking_not_found(id))?;
            let locks = if seen.date == target {
                DayLocks::Same(self.store.day(target).write_owned().await)
            } else {
                let from_day = self.store.day(seen.date);
                let to_day = self.store.day(target);
                if seen.date < target {
                    let from = from_day.write_owned().await;
                    let to = to_day.write_owned().await;
                    DayLocks::Pair { from, to }
                } else {
                    let to = to_day.write_owned().await;
                    let from = from_day.write_owned().await;
                    DayLocks::Pair { from, to }
                }
            };
            let current = self
                .store
                .booking(&id)
                .ok_or_else(|| EngineError::booking_not_found(id))?;
            let held = match &locks {
                DayLocks::Same(g) => g.date,
                DayLocks::Pair { from, .. } => from.date,
            };
            if current.date == held {
                return Ok((current, locks));
            }
        }
    }

    /// Guarded status change: lock, check `allowed`, mutate, journal.
    async fn transition<F>(
        &self,
        id: Ulid,
        action: &'static str,
        allowed: impl Fn(Status) -> bool,
        apply: F,
    ) -> Result<Booking, EngineError>
    where
        F: FnOnce(&mut Booking, NaiveDateTime),
    {
        let (booking, mut guard) = self.lock_booking(id).await?;
        if !allowed(booking.status) {
            return Err(EngineError::InvalidTransition {
                id,
                from: booking.status,
                action,
            });
        }
        let now = self.clock.now();
        let mut updated = booking;
        apply(&mut updated, now);
        updated.updated_at = now;
        self.persist_booking(updated.clone(), false, None, &mut guard).await?;
        info!(booking_id = %id, action, status = %updated.status, "booking updated");
        Ok(updated)
    }
}
