use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ulid::Ulid;

/// Whole minutes since civil midnight, or a duration in minutes.
pub type Minutes = u32;

/// Money in cents.
pub type Cents = i64;

/// Duration assumed for a service with no recorded duration.
pub const DEFAULT_SERVICE_MINUTES: Minutes = 30;

/// Cadence of bookable slots.
pub const SLOT_STEP_MINUTES: Minutes = 30;

// ── Civil date / time ────────────────────────────────────────────

/// A calendar day as seen at the venue. Stored and rendered as `DD/MM/YYYY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CivilDate(pub NaiveDate);

impl CivilDate {
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(CivilDate)
    }

    pub fn weekday(&self) -> Weekday {
        self.0.weekday()
    }

    pub fn add_days(&self, days: i64) -> Self {
        CivilDate(self.0 + Duration::days(days))
    }

    pub fn at(&self, time: CivilTime) -> NaiveDateTime {
        self.0.and_time(time.naive())
    }
}

impl fmt::Display for CivilDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%d/%m/%Y"))
    }
}

/// Accepts `YYYY-MM-DD`, `DD-MM-YYYY` and `DD/MM/YYYY`.
impl FromStr for CivilDate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let format = if s.contains('/') {
            "%d/%m/%Y"
        } else if s.split('-').next().is_some_and(|head| head.len() == 4) {
            "%Y-%m-%d"
        } else {
            "%d-%m-%Y"
        };
        NaiveDate::parse_from_str(s, format)
            .map(CivilDate)
            .map_err(|_| format!("invalid date '{s}': use YYYY-MM-DD, DD-MM-YYYY or DD/MM/YYYY"))
    }
}

impl Serialize for CivilDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CivilDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Wall-clock time of day at minute resolution. Rendered as `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CivilTime(Minutes);

impl CivilTime {
    pub const MINUTES_PER_DAY: Minutes = 24 * 60;

    pub fn from_minutes(minutes: Minutes) -> Option<Self> {
        (minutes < Self::MINUTES_PER_DAY).then_some(CivilTime(minutes))
    }

    pub fn hm(hour: u32, minute: u32) -> Option<Self> {
        if minute >= 60 {
            return None;
        }
        Self::from_minutes(hour * 60 + minute)
    }

    pub fn minutes(&self) -> Minutes {
        self.0
    }

    pub fn naive(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.0 / 60, self.0 % 60, 0).unwrap_or(NaiveTime::MIN)
    }

    pub fn of(datetime: &NaiveDateTime) -> Self {
        use chrono::Timelike;
        CivilTime(datetime.hour() * 60 + datetime.minute())
    }
}

impl fmt::Display for CivilTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

impl FromStr for CivilTime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || format!("invalid time '{s}': use HH:MM");
        let (h, m) = s.split_once(':').ok_or_else(invalid)?;
        if h.is_empty() || h.len() > 2 || m.len() != 2 {
            return Err(invalid());
        }
        let hour: u32 = h.parse().map_err(|_| invalid())?;
        let minute: u32 = m.parse().map_err(|_| invalid())?;
        CivilTime::hm(hour, minute).ok_or_else(invalid)
    }
}

impl Serialize for CivilTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CivilTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// Half-open minute-of-day window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: Minutes,
    pub end: Minutes,
}

impl Window {
    pub fn new(start: Minutes, duration: Minutes) -> Self {
        Self {
            start,
            end: start.saturating_add(duration.max(1)),
        }
    }

    pub fn duration(&self) -> Minutes {
        self.end.saturating_sub(self.start)
    }

    pub fn overlaps(&self, other: &Window) -> bool {
        self.start < other.end && other.start < self.end
    }
}

// ── Reference data ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Professional {
    pub id: Ulid,
    pub name: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub name: String,
    pub price: Cents,
    pub duration_minutes: Option<Minutes>,
    pub active: bool,
}

/// A prepaid bundle. Contributes value, not duration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub id: Ulid,
    pub name: String,
    pub total_value: Cents,
    pub active: bool,
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Scheduled,
    Confirmed,
    InProgress,
    Completed,
    Canceled,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Scheduled => "scheduled",
            Status::Confirmed => "confirmed",
            Status::InProgress => "in_progress",
            Status::Completed => "completed",
            Status::Canceled => "canceled",
        }
    }

    /// Canceled and completed bookings never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Completed | Status::Canceled)
    }

    /// Whether the booking still holds its time window.
    pub fn occupies_slot(&self) -> bool {
        !matches!(self, Status::Canceled)
    }

    /// Not yet started: the states reminders and no-show marking look at.
    pub fn is_pending(&self) -> bool {
        matches!(self, Status::Scheduled | Status::Confirmed)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attendance {
    Unknown,
    Present,
    Absent,
}

/// A service as attached to a booking, priced at booking time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookedService {
    pub service_id: Ulid,
    pub name: String,
    pub price: Cents,
    pub duration_minutes: Option<Minutes>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub client_name: String,
    pub phone: String,
    pub client_id: Option<String>,
    pub professional_id: Ulid,
    pub professional_name: String,
    pub date: CivilDate,
    pub start: CivilTime,
    pub services: Vec<BookedService>,
    pub packages: Vec<String>,
    pub total_value: Cents,
    pub status: Status,
    pub attendance: Attendance,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub checked_in_at: Option<NaiveDateTime>,
    pub checked_out_at: Option<NaiveDateTime>,
    /// Minutes between check-in and finish.
    pub service_minutes: Option<Minutes>,
}

impl Booking {
    /// Sum of attached service durations; a booking with no services takes one default slot.
    pub fn duration(&self) -> Minutes {
        total_duration(self.services.iter().map(|s| s.duration_minutes))
    }

    pub fn window(&self) -> Window {
        Window::new(self.start.minutes(), self.duration())
    }

    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.at(self.start)
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name.clone()).collect()
    }

    pub fn append_note(&mut self, line: &str) {
        self.notes = Some(match self.notes.take() {
            Some(existing) if !existing.is_empty() => format!("{existing}\n{line}"),
            _ => line.to_string(),
        });
    }
}

pub fn total_duration(durations: impl IntoIterator<Item = Option<Minutes>>) -> Minutes {
    let total = durations
        .into_iter()
        .map(|d| d.unwrap_or(DEFAULT_SERVICE_MINUTES))
        .fold(0, Minutes::saturating_add);
    if total == 0 { DEFAULT_SERVICE_MINUTES } else { total }
}

pub fn cents_to_amount(cents: Cents) -> f64 {
    cents as f64 / 100.0
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorRole {
    #[default]
    Client,
    Professional,
    Admin,
    System,
}

impl ActorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorRole::Client => "client",
            ActorRole::Professional => "professional",
            ActorRole::Admin => "admin",
            ActorRole::System => "system",
        }
    }
}

/// Snapshot written once per cancellation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancellationRecord {
    pub booking_id: Ulid,
    pub actor: ActorRole,
    pub reason: String,
    /// Never negative; a late staff cancellation records 0.
    pub hours_notice: f64,
    /// False when the policy deadline was bypassed with `force`.
    pub permitted: bool,
    pub client_name: String,
    pub phone: String,
    pub professional_name: String,
    pub date: CivilDate,
    pub start: CivilTime,
    pub value: Cents,
    pub canceled_at: NaiveDateTime,
}

/// Part of a professional's day taken out of booking, such as lunch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBlock {
    pub id: Ulid,
    pub professional_id: Ulid,
    pub professional_name: String,
    pub date: CivilDate,
    pub start: CivilTime,
    pub end: CivilTime,
    pub reason: String,
    pub created_at: NaiveDateTime,
}

impl TimeBlock {
    pub fn window(&self) -> Window {
        Window {
            start: self.start.minutes(),
            end: self.end.minutes(),
        }
    }
}

// ── Notifications ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "created")]
    Created,
    #[serde(rename = "canceled")]
    Canceled,
    #[serde(rename = "rescheduled")]
    Rescheduled,
    #[serde(rename = "confirmed")]
    Confirmed,
    #[serde(rename = "reminder_24h")]
    Reminder24h,
    #[serde(rename = "reminder_2h")]
    Reminder2h,
    #[serde(rename = "followup_3d")]
    Followup3d,
    #[serde(rename = "followup_21d")]
    Followup21d,
}

/// How the notification ledger guards repeated delivery of one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dedup {
    /// Every occurrence is delivered.
    Never,
    /// Retried until one delivery succeeds.
    UntilSent,
    /// A single attempt, successful or not.
    Once,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::Created,
        EventKind::Canceled,
        EventKind::Rescheduled,
        EventKind::Confirmed,
        EventKind::Reminder24h,
        EventKind::Reminder2h,
        EventKind::Followup3d,
        EventKind::Followup21d,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Canceled => "canceled",
            EventKind::Rescheduled => "rescheduled",
            EventKind::Confirmed => "confirmed",
            EventKind::Reminder24h => "reminder_24h",
            EventKind::Reminder2h => "reminder_2h",
            EventKind::Followup3d => "followup_3d",
            EventKind::Followup21d => "followup_21d",
        }
    }

    pub fn dedup(&self) -> Dedup {
        match self {
            EventKind::Reminder24h | EventKind::Reminder2h => Dedup::UntilSent,
            EventKind::Followup3d | EventKind::Followup21d => Dedup::Once,
            _ => Dedup::Never,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    Global,
    Professional,
}

impl SinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkKind::Global => "global",
            SinkKind::Professional => "professional",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }
}

/// Response captured from a sink: re-encoded JSON when it parsed, raw text otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseBody {
    Json(String),
    Text(String),
}

/// One delivery attempt to one sink. Doubles as the reminder dedup ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub event: EventKind,
    pub sink: SinkKind,
    pub url: String,
    pub status: DeliveryStatus,
    /// The JSON body that was posted.
    pub payload: String,
    pub response: Option<ResponseBody>,
    pub http_status: Option<u16>,
    pub error: Option<String>,
    pub recorded_at: NaiveDateTime,
}

// ── Configuration records ────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayHours {
    pub open: CivilTime,
    pub close: CivilTime,
    pub active: bool,
}

/// Opening hours per weekday, indexed from Sunday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessHours {
    pub days: [DayHours; 7],
}

impl BusinessHours {
    pub fn for_day(&self, day: Weekday) -> &DayHours {
        &self.days[day.num_days_from_sunday() as usize]
    }
}

impl Default for BusinessHours {
    fn default() -> Self {
        let open = DayHours {
            open: CivilTime(9 * 60),
            close: CivilTime(19 * 60),
            active: true,
        };
        let closed = DayHours { active: false, ..open };
        Self {
            days: [closed, open, open, open, open, open, open],
        }
    }
}

/// The shop-wide webhook and its per-event switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalWebhook {
    pub url: Option<String>,
    /// Covers created, rescheduled and confirmed events.
    pub notify_confirmation: bool,
    pub notify_cancellation: bool,
    pub reminder_24h: bool,
    pub reminder_2h: bool,
    pub followup_3d: bool,
    pub followup_21d: bool,
}

impl GlobalWebhook {
    pub fn enabled_for(&self, event: EventKind) -> bool {
        match event {
            EventKind::Created | EventKind::Rescheduled | EventKind::Confirmed => {
                self.notify_confirmation
            }
            EventKind::Canceled => self.notify_cancellation,
            EventKind::Reminder24h => self.reminder_24h,
            EventKind::Reminder2h => self.reminder_2h,
            EventKind::Followup3d => self.followup_3d,
            EventKind::Followup21d => self.followup_21d,
        }
    }
}

impl Default for GlobalWebhook {
    fn default() -> Self {
        Self {
            url: None,
            notify_confirmation: true,
            notify_cancellation: true,
            reminder_24h: true,
            reminder_2h: true,
            followup_3d: false,
            followup_21d: false,
        }
    }
}

/// Minutes-before-start band in which the short reminder fires.
/// The width must cover the sweep cadence or reminders get skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReminderWindow {
    pub lead_minutes: Minutes,
    pub width_minutes: Minutes,
}

impl ReminderWindow {
    pub fn contains(&self, minutes_until: i64) -> bool {
        let lo = self.lead_minutes as i64;
        minutes_until >= lo && minutes_until <= lo + self.width_minutes as i64
    }
}

impl Default for ReminderWindow {
    fn default() -> Self {
        Self {
            lead_minutes: 120,
            width_minutes: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub business_hours: BusinessHours,
    pub cancellation_deadline_hours: u32,
    pub booking_lead_minutes: Minutes,
    pub webhook: GlobalWebhook,
    pub reminder_2h_window: ReminderWindow,
    pub no_show_tolerance_minutes: Minutes,
    /// Upper bound for conflict suggestions on days without configured hours.
    pub default_closing: CivilTime,
}

impl Settings {
    pub fn closing_for(&self, date: CivilDate) -> CivilTime {
        let day = self.business_hours.for_day(date.weekday());
        if day.active { day.close } else { self.default_closing }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            business_hours: BusinessHours::default(),
            cancellation_deadline_hours: 2,
            booking_lead_minutes: 30,
            webhook: GlobalWebhook::default(),
            reminder_2h_window: ReminderWindow::default(),
            no_show_tolerance_minutes: 30,
            default_closing: CivilTime(19 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfessionalWebhook {
    pub professional_id: Ulid,
    pub url: String,
    pub active: bool,
    pub events: Vec<EventKind>,
}

// ── Journal ──────────────────────────────────────────────────────

/// Journal record. Booking events carry full snapshots so replay is a plain overwrite.
/// Booking and block events touch a day schedule and are applied under its lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    ProfessionalUpserted { professional: Professional },
    ServiceUpserted { service: Service },
    PackageUpserted { package: Package },
    SettingsUpdated { settings: Settings },
    ProfessionalWebhookSet { webhook: ProfessionalWebhook },
    BookingCreated { booking: Booking },
    BookingUpdated { booking: Booking },
    CancellationRecorded { record: CancellationRecord },
    NotificationRecorded { record: NotificationRecord },
    TimeBlocked { block: TimeBlock },
    BlockRemoved { id: Ulid },
}

// ── Outbound payload ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub event: EventKind,
    pub booking_id: Ulid,
    pub client: ClientInfo,
    pub booking: BookingDetails,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation: Option<CancellationInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reschedule: Option<RescheduleInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up: Option<FollowUpInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingDetails {
    pub date: CivilDate,
    pub time: CivilTime,
    pub professional: String,
    pub services: Vec<String>,
    pub total_value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<Minutes>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationInfo {
    pub actor: ActorRole,
    pub reason: Option<String>,
    /// One decimal place, e.g. `"1.0"`.
    pub hours_notice: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescheduleInfo {
    pub previous_date: CivilDate,
    pub previous_time: CivilTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowUpInfo {
    pub sent_on: CivilDate,
    pub days_after: u32,
    pub message: String,
}

impl WebhookPayload {
    pub fn for_booking(event: EventKind, booking: &Booking) -> Self {
        Self {
            event,
            booking_id: booking.id,
            client: ClientInfo {
                name: booking.client_name.clone(),
                phone: booking.phone.clone(),
            },
            booking: BookingDetails {
                date: booking.date,
                time: booking.start,
                professional: booking.professional_name.clone(),
                services: booking.service_names(),
                total_value: cents_to_amount(booking.total_value),
                duration_minutes: Some(booking.duration()),
            },
            cancellation: None,
            reschedule: None,
            follow_up: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booking_with(durations: &[Option<Minutes>]) -> Booking {
        let at = CivilDate::from_ymd(2025, 12, 11).unwrap().at(CivilTime::hm(9, 0).unwrap());
        Booking {
            id: Ulid::new(),
            client_name: "Ana".into(),
            phone: "5511999990000".into(),
            client_id: None,
            professional_id: Ulid::new(),
            professional_name: "Hiago".into(),
            date: CivilDate::from_ymd(2025, 12, 11).unwrap(),
            start: CivilTime::hm(10, 0).unwrap(),
            services: durations
                .iter()
                .map(|d| BookedService {
                    service_id: Ulid::new(),
                    name: "Corte".into(),
                    price: 4_000,
                    duration_minutes: *d,
                })
                .collect(),
            packages: vec![],
            total_value: 4_000,
            status: Status::Scheduled,
            attendance: Attendance::Unknown,
            notes: None,
            created_at: at,
            updated_at: at,
            checked_in_at: None,
            checked_out_at: None,
            service_minutes: None,
        }
    }

    #[test]
    fn date_accepts_three_layouts() {
        let expected = CivilDate::from_ymd(2025, 12, 11).unwrap();
        assert_eq!("2025-12-11".parse::<CivilDate>().unwrap(), expected);
        assert_eq!("11-12-2025".parse::<CivilDate>().unwrap(), expected);
        assert_eq!("11/12/2025".parse::<CivilDate>().unwrap(), expected);
        assert_eq!(expected.to_string(), "11/12/2025");
    }

    #[test]
    fn date_rejects_garbage() {
        assert!("2025-13-01".parse::<CivilDate>().is_err());
        assert!("tomorrow".parse::<CivilDate>().is_err());
        assert!("".parse::<CivilDate>().is_err());
    }

    #[test]
    fn time_parse_and_render() {
        let t: CivilTime = "9:05".parse().unwrap();
        assert_eq!(t.minutes(), 545);
        assert_eq!(t.to_string(), "09:05");
        assert!("24:00".parse::<CivilTime>().is_err());
        assert!("10:60".parse::<CivilTime>().is_err());
        assert!("10h30".parse::<CivilTime>().is_err());
        assert!("10:3".parse::<CivilTime>().is_err());
    }

    #[test]
    fn window_overlap_is_half_open() {
        let a = Window::new(600, 30);
        assert!(a.overlaps(&Window::new(615, 30)));
        assert!(!a.overlaps(&Window::new(630, 30)));
        assert!(!Window::new(570, 30).overlaps(&a));
    }

    #[test]
    fn duration_defaults_unknown_services_to_thirty() {
        assert_eq!(booking_with(&[Some(45), None]).duration(), 75);
        assert_eq!(booking_with(&[]).duration(), DEFAULT_SERVICE_MINUTES);
        assert_eq!(booking_with(&[Some(20)]).window(), Window { start: 600, end: 620 });
    }

    #[test]
    fn oversized_durations_saturate() {
        assert_eq!(booking_with(&[Some(Minutes::MAX), Some(30)]).duration(), Minutes::MAX);
        let w = Window::new(600, Minutes::MAX);
        assert_eq!(w.end, Minutes::MAX);
        assert!(w.overlaps(&Window::new(1_400, 30)));
        assert!(!w.overlaps(&Window::new(570, 30)));
    }

    #[test]
    fn status_state_helpers() {
        assert!(Status::Canceled.is_terminal());
        assert!(Status::Completed.is_terminal());
        assert!(!Status::InProgress.is_terminal());
        assert!(Status::Completed.occupies_slot());
        assert!(!Status::Canceled.occupies_slot());
        assert!(Status::Confirmed.is_pending());
        assert!(!Status::InProgress.is_pending());
    }

    #[test]
    fn reminder_window_bounds_inclusive() {
        let w = ReminderWindow::default();
        assert!(!w.contains(119));
        assert!(w.contains(120));
        assert!(w.contains(130));
        assert!(!w.contains(131));
    }

    #[test]
    fn default_hours_close_sunday() {
        let hours = BusinessHours::default();
        assert!(!hours.for_day(Weekday::Sun).active);
        assert!(hours.for_day(Weekday::Sat).active);
        assert_eq!(hours.for_day(Weekday::Mon).close.to_string(), "19:00");
    }

    #[test]
    fn global_toggles_map_to_events() {
        let hook = GlobalWebhook {
            notify_confirmation: false,
            ..GlobalWebhook::default()
        };
        assert!(!hook.enabled_for(EventKind::Created));
        assert!(!hook.enabled_for(EventKind::Rescheduled));
        assert!(hook.enabled_for(EventKind::Canceled));
        assert!(!hook.enabled_for(EventKind::Followup3d));
    }

    #[test]
    fn payload_omits_absent_sections() {
        let payload = WebhookPayload::for_booking(EventKind::Created, &booking_with(&[Some(30)]));
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["event"], "created");
        assert_eq!(json["booking"]["date"], "11/12/2025");
        assert_eq!(json["booking"]["time"], "10:00");
        assert_eq!(json["booking"]["total_value"], 40.0);
        assert!(json.get("cancellation").is_none());
    }

    #[test]
    fn event_survives_bincode() {
        let event = Event::BookingCreated {
            booking: booking_with(&[Some(30), None]),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
