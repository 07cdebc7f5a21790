use std::sync::{Arc, RwLock as StdRwLock};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Booking,
    Block,
}

/// One occupied window on a day's schedule. `id` is the booking or block id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotEntry {
    pub id: Ulid,
    pub professional_id: Ulid,
    pub window: Window,
    pub kind: SlotKind,
}

/// Every slot-holding booking and time block on one civil day, sorted by start.
/// The write lock on this is the serialization point for booking decisions.
#[derive(Debug, Clone)]
pub struct DaySchedule {
    pub date: CivilDate,
    entries: Vec<SlotEntry>,
}

impl DaySchedule {
    pub fn new(date: CivilDate) -> Self {
        Self {
            date,
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[SlotEntry] {
        &self.entries
    }

    pub fn insert(&mut self, entry: SlotEntry) {
        let pos = self
            .entries
            .partition_point(|e| e.window.start <= entry.window.start);
        self.entries.insert(pos, entry);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<SlotEntry> {
        let pos = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(pos))
    }

    /// Entries whose window intersects `query`, across all professionals.
    pub fn overlapping<'a>(&'a self, query: &'a Window) -> impl Iterator<Item = &'a SlotEntry> + 'a {
        let hi = self.entries.partition_point(|e| e.window.start < query.end);
        self.entries[..hi].iter().filter(move |e| e.window.overlaps(query))
    }

    /// Drop any entry for `booking` and re-insert it if it still holds its slot.
    pub fn place(&mut self, booking: &Booking) {
        self.remove(booking.id);
        if booking.status.occupies_slot() && booking.date == self.date {
            self.insert(SlotEntry {
                id: booking.id,
                professional_id: booking.professional_id,
                window: booking.window(),
                kind: SlotKind::Booking,
            });
        }
    }

    pub fn place_block(&mut self, block: &TimeBlock) {
        self.remove(block.id);
        if block.date == self.date {
            self.insert(SlotEntry {
                id: block.id,
                professional_id: block.professional_id,
                window: block.window(),
                kind: SlotKind::Block,
            });
        }
    }
}

pub type SharedDay = Arc<RwLock<DaySchedule>>;

/// Key of the notification ledger: one claim per event per booking, shared by all sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LedgerKey {
    pub booking_id: Ulid,
    pub event: EventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    InFlight,
    Sent,
    Failed,
}

/// In-memory state rebuilt from the journal.
pub struct Store {
    bookings: DashMap<Ulid, Booking>,
    days: DashMap<CivilDate, SharedDay>,
    /// Listing order is the round-robin tie-break, so this stays a Vec.
    professionals: StdRwLock<Vec<Professional>>,
    services: DashMap<Ulid, Service>,
    packages: DashMap<Ulid, Package>,
    settings: StdRwLock<Settings>,
    webhooks: DashMap<Ulid, ProfessionalWebhook>,
    blocks: DashMap<Ulid, TimeBlock>,
    cancellations: DashMap<Ulid, CancellationRecord>,
    notifications: DashMap<Ulid, Vec<NotificationRecord>>,
    ledger: DashMap<LedgerKey, Claim>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            bookings: DashMap::new(),
            days: DashMap::new(),
            professionals: StdRwLock::new(Vec::new()),
            services: DashMap::new(),
            packages: DashMap::new(),
            settings: StdRwLock::new(Settings::default()),
            webhooks: DashMap::new(),
            blocks: DashMap::new(),
            cancellations: DashMap::new(),
            notifications: DashMap::new(),
            ledger: DashMap::new(),
        }
    }

    // ── Bookings ─────────────────────────────────────────────

    pub fn booking(&self, id: &Ulid) -> Option<Booking> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    pub fn bookings_on(&self, date: CivilDate) -> Vec<Booking> {
        let mut out: Vec<Booking> = self
            .bookings
            .iter()
            .filter(|e| e.date == date)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|b| (b.start, b.id));
        out
    }

    pub fn all_bookings(&self) -> Vec<Booking> {
        self.bookings.iter().map(|e| e.value().clone()).collect()
    }

    pub fn booking_count(&self) -> usize {
        self.bookings.len()
    }

    pub fn day(&self, date: CivilDate) -> SharedDay {
        self.days
            .entry(date)
            .or_insert_with(|| Arc::new(RwLock::new(DaySchedule::new(date))))
            .value()
            .clone()
    }

    /// Overwrite the booking snapshot. Caller holds the write lock of `day`.
    pub fn put_booking(&self, booking: Booking, day: &mut DaySchedule) {
        day.place(&booking);
        self.bookings.insert(booking.id, booking);
    }

    // ── Time blocks ──────────────────────────────────────────

    pub fn block(&self, id: &Ulid) -> Option<TimeBlock> {
        self.blocks.get(id).map(|e| e.value().clone())
    }

    pub fn blocks_on(&self, date: CivilDate) -> Vec<TimeBlock> {
        let mut out: Vec<TimeBlock> = self
            .blocks
            .iter()
            .filter(|e| e.date == date)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|b| (b.start, b.id));
        out
    }

    /// Apply a block event to `day`. Caller holds the write lock of the
    /// block's day.
    pub fn apply_block(&self, event: &Event, day: &mut DaySchedule) {
        match event {
            Event::TimeBlocked { block } => {
                day.place_block(block);
                self.blocks.insert(block.id, block.clone());
            }
            Event::BlockRemoved { id } => {
                day.remove(*id);
                self.blocks.remove(id);
            }
            _ => {}
        }
    }

    // ── Reference data ───────────────────────────────────────

    pub fn professionals(&self) -> Vec<Professional> {
        read(&self.professionals).clone()
    }

    pub fn active_professionals(&self) -> Vec<Professional> {
        read(&self.professionals)
            .iter()
            .filter(|p| p.active)
            .cloned()
            .collect()
    }

    pub fn professional(&self, id: &Ulid) -> Option<Professional> {
        read(&self.professionals).iter().find(|p| p.id == *id).cloned()
    }

    pub fn professional_count(&self) -> usize {
        read(&self.professionals).len()
    }

    pub fn service(&self, id: &Ulid) -> Option<Service> {
        self.services.get(id).map(|e| e.value().clone())
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    pub fn package(&self, id: &Ulid) -> Option<Package> {
        self.packages.get(id).map(|e| e.value().clone())
    }

    pub fn package_count(&self) -> usize {
        self.packages.len()
    }

    pub fn settings(&self) -> Settings {
        read(&self.settings).clone()
    }

    pub fn professional_webhook(&self, professional_id: &Ulid) -> Option<ProfessionalWebhook> {
        self.webhooks.get(professional_id).map(|e| e.value().clone())
    }

    // ── Records ──────────────────────────────────────────────

    pub fn cancellation(&self, booking_id: &Ulid) -> Option<CancellationRecord> {
        self.cancellations.get(booking_id).map(|e| e.value().clone())
    }

    pub fn notifications_for(&self, booking_id: &Ulid) -> Vec<NotificationRecord> {
        self.notifications
            .get(booking_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    // ── Notification ledger ──────────────────────────────────

    /// Atomically take the right to deliver `key`. `false` means another
    /// attempt already owns it or the ledger rules it out.
    pub fn try_claim(&self, key: LedgerKey) -> bool {
        let policy = key.event.dedup();
        if policy == Dedup::Never {
            return true;
        }
        match self.ledger.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(Claim::InFlight);
                true
            }
            Entry::Occupied(mut slot) => {
                if policy == Dedup::UntilSent && *slot.get() == Claim::Failed {
                    slot.insert(Claim::InFlight);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn settle(&self, key: LedgerKey, status: DeliveryStatus) {
        if key.event.dedup() == Dedup::Never {
            return;
        }
        self.ledger.insert(key, claim_for(status));
    }

    pub fn claim(&self, key: &LedgerKey) -> Option<Claim> {
        self.ledger.get(key).map(|e| *e.value())
    }

    // ── Event application ────────────────────────────────────

    /// Apply an event that touches no day schedule. Booking snapshots go
    /// through `put_booking` and blocks through `apply_block`, under the day lock.
    pub fn apply(&self, event: &Event) {
        match event {
            Event::ProfessionalUpserted { professional } => {
                let mut list = write(&self.professionals);
                match list.iter_mut().find(|p| p.id == professional.id) {
                    Some(existing) => *existing = professional.clone(),
                    None => list.push(professional.clone()),
                }
            }
            Event::ServiceUpserted { service } => {
                self.services.insert(service.id, service.clone());
            }
            Event::PackageUpserted { package } => {
                self.packages.insert(package.id, package.clone());
            }
            Event::SettingsUpdated { settings } => {
                *write(&self.settings) = settings.clone();
            }
            Event::ProfessionalWebhookSet { webhook } => {
                self.webhooks.insert(webhook.professional_id, webhook.clone());
            }
            Event::CancellationRecorded { record } => {
                self.cancellations.insert(record.booking_id, record.clone());
            }
            Event::NotificationRecorded { record } => {
                let key = LedgerKey {
                    booking_id: record.booking_id,
                    event: record.event,
                };
                if key.event.dedup() != Dedup::Never {
                    // A sent record is never downgraded by a later failure.
                    let claim = claim_for(record.status);
                    self.ledger
                        .entry(key)
                        .and_modify(|c| {
                            if *c != Claim::Sent {
                                *c = claim;
                            }
                        })
                        .or_insert(claim);
                }
                self.notifications
                    .entry(record.booking_id)
                    .or_default()
                    .push(record.clone());
            }
            Event::BookingCreated { .. }
            | Event::BookingUpdated { .. }
            | Event::TimeBlocked { .. }
            | Event::BlockRemoved { .. } => {}
        }
    }

    /// Minimal event list that rebuilds the current state.
    pub fn snapshot(&self) -> Vec<Event> {
        let mut events = Vec::new();
        events.push(Event::SettingsUpdated {
            settings: self.settings(),
        });
        for professional in self.professionals() {
            events.push(Event::ProfessionalUpserted { professional });
        }
        for e in self.services.iter() {
            events.push(Event::ServiceUpserted {
                service: e.value().clone(),
            });
        }
        for e in self.packages.iter() {
            events.push(Event::PackageUpserted {
                package: e.value().clone(),
            });
        }
        for e in self.webhooks.iter() {
            events.push(Event::ProfessionalWebhookSet {
                webhook: e.value().clone(),
            });
        }
        let mut bookings = self.all_bookings();
        bookings.sort_by_key(|b| b.id);
        for booking in bookings {
            events.push(Event::BookingCreated { booking });
        }
        let mut blocks: Vec<TimeBlock> = self.blocks.iter().map(|e| e.value().clone()).collect();
        blocks.sort_by_key(|b| b.id);
        for block in blocks {
            events.push(Event::TimeBlocked { block });
        }
        for e in self.cancellations.iter() {
            events.push(Event::CancellationRecorded {
                record: e.value().clone(),
            });
        }
        for e in self.notifications.iter() {
            for record in e.value() {
                events.push(Event::NotificationRecorded {
                    record: record.clone(),
                });
            }
        }
        events
    }
}

fn claim_for(status: DeliveryStatus) -> Claim {
    match status {
        DeliveryStatus::Sent => Claim::Sent,
        DeliveryStatus::Failed => Claim::Failed,
    }
}

fn read<T>(lock: &StdRwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|p| p.into_inner())
}

fn write<T>(lock: &StdRwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|p| p.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(event: EventKind) -> LedgerKey {
        LedgerKey {
            booking_id: Ulid::new(),
            event,
        }
    }

    #[test]
    fn reminder_claim_retries_only_after_failure() {
        let store = Store::new();
        let k = key(EventKind::Reminder24h);
        assert!(store.try_claim(k));
        assert!(!store.try_claim(k), "in-flight claim blocks");
        store.settle(k, DeliveryStatus::Failed);
        assert!(store.try_claim(k), "failed reminder may retry");
        store.settle(k, DeliveryStatus::Sent);
        assert!(!store.try_claim(k));
    }

    #[test]
    fn followup_claim_is_single_shot() {
        let store = Store::new();
        let k = key(EventKind::Followup3d);
        assert!(store.try_claim(k));
        store.settle(k, DeliveryStatus::Failed);
        assert!(!store.try_claim(k));
    }

    #[test]
    fn lifecycle_events_are_never_deduplicated() {
        let store = Store::new();
        let k = key(EventKind::Canceled);
        assert!(store.try_claim(k));
        store.settle(k, DeliveryStatus::Sent);
        assert!(store.try_claim(k));
        assert_eq!(store.claim(&k), None);
    }

    #[test]
    fn overlapping_respects_half_open_windows() {
        let date = CivilDate::from_ymd(2025, 12, 11).unwrap();
        let mut day = DaySchedule::new(date);
        let p = Ulid::new();
        for (start, dur) in [(540, 30), (600, 60), (720, 30)] {
            day.insert(SlotEntry {
                id: Ulid::new(),
                professional_id: p,
                window: Window::new(start, dur),
                kind: SlotKind::Booking,
            });
        }
        let q = Window::new(630, 30);
        assert_eq!(day.overlapping(&q).count(), 1);
        let q = Window::new(660, 60);
        assert_eq!(day.overlapping(&q).count(), 0);
        assert!(day.entries().windows(2).all(|w| w[0].window.start <= w[1].window.start));
    }

    #[test]
    fn upsert_keeps_listing_order() {
        let store = Store::new();
        let a = Professional { id: Ulid::new(), name: "A".into(), active: true };
        let b = Professional { id: Ulid::new(), name: "B".into(), active: true };
        store.apply(&Event::ProfessionalUpserted { professional: a.clone() });
        store.apply(&Event::ProfessionalUpserted { professional: b.clone() });
        store.apply(&Event::ProfessionalUpserted {
            professional: Professional { active: false, ..a.clone() },
        });
        let names: Vec<_> = store.professionals().into_iter().map(|p| p.name).collect();
        assert_eq!(names, ["A", "B"]);
        assert_eq!(store.active_professionals(), vec![b]);
    }
}
