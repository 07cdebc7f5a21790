use ulid::Ulid;

use crate::model::*;

use super::store::{DaySchedule, SlotEntry};

/// Most alternatives offered back on a 409.
pub const MAX_SUGGESTIONS: usize = 6;

/// First booking or block of `professional_id` whose window intersects
/// `window`. `ignore` skips the booking being moved.
pub fn find_conflict(
    day: &DaySchedule,
    professional_id: Ulid,
    window: &Window,
    ignore: Option<Ulid>,
) -> Option<SlotEntry> {
    day.overlapping(window)
        .find(|e| e.professional_id == professional_id && Some(e.id) != ignore)
        .copied()
}

/// Slot starts after a conflicting booking ends: its end rounded up to the
/// slot cadence, then stepped, stopping before `closing`.
pub fn suggest_slots(conflict_end: Minutes, closing: CivilTime) -> Vec<CivilTime> {
    let step = SLOT_STEP_MINUTES;
    let Some(first) = conflict_end.div_ceil(step).checked_mul(step) else {
        return Vec::new();
    };
    (0..MAX_SUGGESTIONS as u32)
        .map(|i| first.saturating_add(i * step))
        .take_while(|m| *m < closing.minutes())
        .filter_map(CivilTime::from_minutes)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::store::SlotKind;

    fn day_with(entries: &[(Ulid, Minutes, Minutes)]) -> (DaySchedule, Vec<Ulid>) {
        let mut day = DaySchedule::new(CivilDate::from_ymd(2025, 12, 11).unwrap());
        let mut ids = Vec::new();
        for (pro, start, dur) in entries {
            let id = Ulid::new();
            ids.push(id);
            day.insert(SlotEntry {
                id,
                professional_id: *pro,
                window: Window::new(*start, *dur),
                kind: SlotKind::Booking,
            });
        }
        (day, ids)
    }

    #[test]
    fn overlap_with_same_professional_conflicts() {
        let p = Ulid::new();
        let (day, ids) = day_with(&[(p, 600, 30)]);
        let hit = find_conflict(&day, p, &Window::new(615, 30), None);
        assert_eq!(hit.map(|e| e.id), Some(ids[0]));
    }

    #[test]
    fn back_to_back_is_not_a_conflict() {
        let p = Ulid::new();
        let (day, _) = day_with(&[(p, 600, 30)]);
        assert!(find_conflict(&day, p, &Window::new(630, 30), None).is_none());
        assert!(find_conflict(&day, p, &Window::new(570, 30), None).is_none());
    }

    #[test]
    fn other_professionals_do_not_conflict() {
        let (p, q) = (Ulid::new(), Ulid::new());
        let (day, _) = day_with(&[(q, 600, 60)]);
        assert!(find_conflict(&day, p, &Window::new(600, 30), None).is_none());
    }

    #[test]
    fn moved_booking_ignores_itself() {
        let p = Ulid::new();
        let (day, ids) = day_with(&[(p, 600, 60)]);
        assert!(find_conflict(&day, p, &Window::new(630, 30), Some(ids[0])).is_none());
    }

    #[test]
    fn long_booking_starting_earlier_is_found() {
        let p = Ulid::new();
        let (day, ids) = day_with(&[(p, 540, 120), (p, 700, 30)]);
        let hit = find_conflict(&day, p, &Window::new(630, 15), None).unwrap();
        assert_eq!(hit.id, ids[0]);
        assert_eq!(hit.window.end, 660);
    }

    #[test]
    fn suggestions_round_up_and_stop_at_closing() {
        let closing = CivilTime::hm(19, 0).unwrap();
        let render = |v: Vec<CivilTime>| v.iter().map(|t| t.to_string()).collect::<Vec<_>>();

        assert_eq!(
            render(suggest_slots(630, closing)),
            ["10:30", "11:00", "11:30", "12:00", "12:30", "13:00"]
        );
        assert_eq!(render(suggest_slots(645, closing))[0], "11:00");
        assert_eq!(render(suggest_slots(17 * 60 + 40, closing)), ["18:00", "18:30"]);
        assert!(suggest_slots(19 * 60, closing).is_empty());
        assert!(suggest_slots(Minutes::MAX, closing).is_empty());
    }

    #[test]
    fn blocks_conflict_like_bookings() {
        let p = Ulid::new();
        let mut day = DaySchedule::new(CivilDate::from_ymd(2025, 12, 11).unwrap());
        let lunch = Ulid::new();
        day.insert(SlotEntry {
            id: lunch,
            professional_id: p,
            window: Window { start: 720, end: 780 },
            kind: SlotKind::Block,
        });
        let hit = find_conflict(&day, p, &Window::new(750, 30), None).unwrap();
        assert_eq!((hit.id, hit.kind), (lunch, SlotKind::Block));
        assert!(find_conflict(&day, p, &Window::new(780, 30), None).is_none());
    }
}
