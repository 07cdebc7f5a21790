use std::sync::Mutex;

use chrono::{Duration, FixedOffset, NaiveDateTime, Utc};

use crate::model::CivilDate;

/// Source of venue-local wall time. All scheduling arithmetic runs in this frame.
pub trait CivilClock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    fn today(&self) -> CivilDate {
        CivilDate(self.now().date())
    }
}

/// Real time shifted by a fixed UTC offset (the venue does not observe DST).
pub struct FixedOffsetClock {
    offset: FixedOffset,
}

impl FixedOffsetClock {
    pub fn new(offset_minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(offset_minutes * 60).map(|offset| Self { offset })
    }
}

impl CivilClock for FixedOffsetClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.offset).naive_local()
    }
}

/// Settable clock for tests and replays.
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(|p| p.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *guard += by;
    }
}

impl CivilClock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CivilTime;

    #[test]
    fn manual_clock_advances() {
        let start = CivilDate::from_ymd(2025, 12, 10)
            .unwrap()
            .at(CivilTime::hm(23, 30).unwrap());
        let clock = ManualClock::new(start);
        clock.advance(Duration::minutes(45));
        assert_eq!(clock.today(), CivilDate::from_ymd(2025, 12, 11).unwrap());
        assert_eq!(CivilTime::of(&clock.now()).to_string(), "00:15");
    }

    #[test]
    fn offset_clock_rejects_out_of_range() {
        assert!(FixedOffsetClock::new(-180).is_some());
        assert!(FixedOffsetClock::new(24 * 60).is_none());
    }
}
