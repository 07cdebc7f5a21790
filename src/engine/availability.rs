use chrono::{Duration, NaiveDateTime};
use serde::Serialize;

use crate::model::*;

use super::conflict::find_conflict;
use super::store::DaySchedule;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RejectReason {
    #[serde(rename = "too soon")]
    TooSoon,
    #[serde(rename = "all professionals busy")]
    AllBusy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedSlot {
    pub time: CivilTime,
    pub reason: RejectReason,
}

#[derive(Debug, Clone, Serialize)]
pub struct AvailabilityReport {
    pub date: CivilDate,
    pub weekday: &'static str,
    pub opens: CivilTime,
    pub closes: CivilTime,
    pub duration_minutes: Minutes,
    pub professionals: Vec<String>,
    pub available: Vec<CivilTime>,
    pub rejected: Vec<RejectedSlot>,
}

/// Slot starts from `open` in cadence steps while before `close`.
pub fn slot_starts(open: CivilTime, close: CivilTime) -> Vec<CivilTime> {
    (open.minutes()..close.minutes())
        .step_by(SLOT_STEP_MINUTES as usize)
        .filter_map(CivilTime::from_minutes)
        .collect()
}

/// Classify every slot of an open day. A slot is available when at least one
/// of `professionals` has no booking intersecting `[slot, slot + duration)`.
pub fn classify_slots(
    day: &DaySchedule,
    hours: &DayHours,
    professionals: &[Professional],
    duration: Minutes,
    now: NaiveDateTime,
    lead_minutes: Minutes,
) -> (Vec<CivilTime>, Vec<RejectedSlot>) {
    let earliest = now + Duration::minutes(lead_minutes as i64);
    let mut available = Vec::new();
    let mut rejected = Vec::new();

    for slot in slot_starts(hours.open, hours.close) {
        if day.date.at(slot) < earliest {
            rejected.push(RejectedSlot {
                time: slot,
                reason: RejectReason::TooSoon,
            });
            continue;
        }
        let window = Window::new(slot.minutes(), duration);
        let free = professionals
            .iter()
            .any(|p| find_conflict(day, p.id, &window, None).is_none());
        if free {
            available.push(slot);
        } else {
            rejected.push(RejectedSlot {
                time: slot,
                reason: RejectReason::AllBusy,
            });
        }
    }

    (available, rejected)
}
