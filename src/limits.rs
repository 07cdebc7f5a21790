//! Hard input limits. Anything above these is rejected before touching the journal.

pub const MAX_NAME_LEN: usize = 120;
pub const MAX_PHONE_LEN: usize = 32;
pub const MAX_NOTES_LEN: usize = 2_000;
pub const MAX_REASON_LEN: usize = 500;
pub const MAX_URL_LEN: usize = 2_048;

/// Services + packages attached to a single booking.
pub const MAX_ITEMS_PER_BOOKING: usize = 20;

pub const MAX_PROFESSIONALS: usize = 200;
pub const MAX_SERVICES: usize = 1_000;
pub const MAX_PACKAGES: usize = 1_000;

/// Occupied slots across all professionals on one civil day.
pub const MAX_BOOKINGS_PER_DAY: usize = 2_000;
