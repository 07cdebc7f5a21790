use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::*;

use super::assign::{day_load, rank_by_load};
use super::availability::{AvailabilityReport, classify_slots};
use super::conflict::find_conflict;
use super::{Engine, EngineError};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AvailabilityQuery {
    pub date: Option<String>,
    pub professional: Option<String>,
    pub service_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AssignmentQuery {
    pub date: Option<String>,
    pub time: Option<String>,
    /// Defaults to one slot.
    pub duration_minutes: Option<Minutes>,
}

/// Who round robin would hand a booking to, without booking anything.
#[derive(Debug, Clone, Serialize)]
pub struct AssignmentPreview {
    pub professional_id: Ulid,
    pub professional_name: String,
    pub bookings_that_day: usize,
    pub checked: usize,
}

impl Engine {
    pub fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.store
            .booking(&id)
            .ok_or_else(|| EngineError::booking_not_found(id))
    }

    pub fn bookings_on(&self, date: &str) -> Result<Vec<Booking>, EngineError> {
        let date: CivilDate = date.parse().map_err(EngineError::invalid)?;
        Ok(self.store.bookings_on(date))
    }

    pub fn notifications_for(&self, id: Ulid) -> Result<Vec<NotificationRecord>, EngineError> {
        self.get_booking(id)?;
        Ok(self.store.notifications_for(&id))
    }

    pub fn cancellation_for(&self, id: Ulid) -> Result<Option<CancellationRecord>, EngineError> {
        self.get_booking(id)?;
        Ok(self.store.cancellation(&id))
    }

    pub fn blocks_on(&self, date: &str) -> Result<Vec<TimeBlock>, EngineError> {
        let date: CivilDate = date.parse().map_err(EngineError::invalid)?;
        Ok(self.store.blocks_on(date))
    }

    pub fn list_professionals(&self) -> Vec<Professional> {
        self.store.professionals()
    }

    pub fn settings(&self) -> Settings {
        self.store.settings()
    }

    /// Open slots on a date for the requested duration. Unknown service ids
    /// are ignored; with none recognised the default slot length applies.
    pub async fn availability(&self, query: AvailabilityQuery) -> Result<AvailabilityReport, EngineError> {
        let raw_date = query
            .date
            .filter(|d| !d.trim().is_empty())
            .ok_or_else(|| EngineError::invalid("date is required"))?;
        let date: CivilDate = raw_date.parse().map_err(EngineError::invalid)?;

        let settings = self.store.settings();
        let hours = *settings.business_hours.for_day(date.weekday());
        if !hours.active {
            return Err(EngineError::BusinessClosed(date));
        }

        let durations: Vec<Option<Minutes>> = query
            .service_ids
            .iter()
            .filter_map(|s| s.trim().parse::<Ulid>().ok())
            .filter_map(|id| self.store.service(&id))
            .map(|s| s.duration_minutes)
            .collect();
        let duration = total_duration(durations);

        let professionals = match query.professional.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => vec![self.resolve_professional(key)?],
            _ => self.store.active_professionals(),
        };
        if professionals.is_empty() {
            return Err(EngineError::NoActiveProfessionals);
        }

        let day = self.store.day(date);
        let schedule = day.read().await;
        let (available, rejected) = classify_slots(
            &schedule,
            &hours,
            &professionals,
            duration,
            self.clock.now(),
            settings.booking_lead_minutes,
        );
        drop(schedule);

        Ok(AvailabilityReport {
            date,
            weekday: weekday_name(date.weekday()),
            opens: hours.open,
            closes: hours.close,
            duration_minutes: duration,
            professionals: professionals.into_iter().map(|p| p.name).collect(),
            available,
            rejected,
        })
    }

    /// First free professional for `[time, time + duration)`, least loaded
    /// first, ties in listing order.
    pub async fn preview_assignment(&self, query: AssignmentQuery) -> Result<AssignmentPreview, EngineError> {
        let mut errors = Vec::new();
        let date = match query.date.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            Some(d) => d.parse::<CivilDate>().map_err(|e| errors.push(e)).ok(),
            None => {
                errors.push("date is required".into());
                None
            }
        };
        let start = match query.time.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            Some(t) => t.parse::<CivilTime>().map_err(|e| errors.push(e)).ok(),
            None => {
                errors.push("time is required".into());
                None
            }
        };
        let duration = query.duration_minutes.unwrap_or(DEFAULT_SERVICE_MINUTES);
        if duration == 0 || duration > CivilTime::MINUTES_PER_DAY {
            errors.push(format!(
                "duration_minutes must be between 1 and {}",
                CivilTime::MINUTES_PER_DAY
            ));
        }
        let (Some(date), Some(start)) = (date, start) else {
            return Err(EngineError::Validation(errors));
        };
        if !errors.is_empty() {
            return Err(EngineError::Validation(errors));
        }

        let active = self.store.active_professionals();
        if active.is_empty() {
            return Err(EngineError::NoActiveProfessionals);
        }
        let window = Window::new(start.minutes(), duration);
        let day = self.store.day(date);
        let schedule = day.read().await;
        let load = day_load(&schedule);
        let free = rank_by_load(&active, &load)
            .into_iter()
            .find(|p| find_conflict(&schedule, p.id, &window, None).is_none())
            .cloned();
        drop(schedule);

        let professional = free.ok_or(EngineError::AllProfessionalsBusy {
            date,
            start,
            checked: active.len(),
        })?;
        Ok(AssignmentPreview {
            bookings_that_day: load.get(&professional.id).copied().unwrap_or(0),
            professional_id: professional.id,
            professional_name: professional.name,
            checked: active.len(),
        })
    }
}
