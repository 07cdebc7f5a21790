use std::collections::HashMap;

use ulid::Ulid;

use crate::model::Professional;

use super::store::{DaySchedule, SlotKind};

/// Slot-holding bookings per professional on one day. Time blocks are not load.
pub fn day_load(day: &DaySchedule) -> HashMap<Ulid, usize> {
    let mut counts = HashMap::new();
    for entry in day.entries().iter().filter(|e| e.kind == SlotKind::Booking) {
        *counts.entry(entry.professional_id).or_insert(0) += 1;
    }
    counts
}

/// Least-loaded professional; ties go to the first in listing order.
pub fn pick_least_loaded<'a>(
    active: &'a [Professional],
    load: &HashMap<Ulid, usize>,
) -> Option<&'a Professional> {
    // min_by_key returns the first of equal minima.
    active
        .iter()
        .min_by_key(|p| load.get(&p.id).copied().unwrap_or(0))
}

/// Every professional from least to most loaded, ties in listing order.
pub fn rank_by_load<'a>(
    active: &'a [Professional],
    load: &HashMap<Ulid, usize>,
) -> Vec<&'a Professional> {
    let mut ranked: Vec<&Professional> = active.iter().collect();
    ranked.sort_by_key(|p| load.get(&p.id).copied().unwrap_or(0));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pros(n: usize) -> Vec<Professional> {
        (0..n)
            .map(|i| Professional {
                id: Ulid::new(),
                name: format!("P{i}"),
                active: true,
            })
            .collect()
    }

    fn load(pros: &[Professional], counts: &[usize]) -> HashMap<Ulid, usize> {
        pros.iter().zip(counts).map(|(p, c)| (p.id, *c)).collect()
    }

    #[test]
    fn picks_minimum_count() {
        let p = pros(3);
        let chosen = pick_least_loaded(&p, &load(&p, &[0, 2, 1])).unwrap();
        assert_eq!(chosen.id, p[0].id);
        let chosen = pick_least_loaded(&p, &load(&p, &[3, 2, 1])).unwrap();
        assert_eq!(chosen.id, p[2].id);
    }

    #[test]
    fn ties_go_to_listing_order() {
        let p = pros(2);
        let chosen = pick_least_loaded(&p, &load(&p, &[1, 1])).unwrap();
        assert_eq!(chosen.id, p[0].id);
    }

    #[test]
    fn missing_counts_are_zero() {
        let p = pros(2);
        let chosen = pick_least_loaded(&p, &load(&p[..1], &[1])).unwrap();
        assert_eq!(chosen.id, p[1].id);
    }

    #[test]
    fn ranking_is_stable_on_ties() {
        let p = pros(4);
        let ranked = rank_by_load(&p, &load(&p, &[2, 1, 2, 1]));
        let names: Vec<&str> = ranked.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["P1", "P3", "P0", "P2"]);
    }

    #[test]
    fn blocks_are_not_counted_as_load() {
        use crate::engine::store::SlotEntry;
        use crate::model::{CivilDate, Window};

        let p = pros(1);
        let mut day = DaySchedule::new(CivilDate::from_ymd(2025, 12, 11).unwrap());
        for (start, kind) in [(540, SlotKind::Booking), (720, SlotKind::Block)] {
            day.insert(SlotEntry {
                id: Ulid::new(),
                professional_id: p[0].id,
                window: Window::new(start, 30),
                kind,
            });
        }
        assert_eq!(day_load(&day)[&p[0].id], 1);
    }

    #[test]
    fn empty_listing_picks_nobody() {
        assert!(pick_least_loaded(&[], &HashMap::new()).is_none());
    }
}
