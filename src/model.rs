use chrono::{DateTime, NaiveTime, SecondsFormat, Utc, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, always UTC. Local time only exists inside the availability resolver.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;

/// Half-open overlap test: touching endpoints do not overlap.
pub fn overlaps(a_start: Ms, a_end: Ms, b_start: Ms, b_end: Ms) -> bool {
    a_end > b_start && a_start < b_end
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Like `new`, but returns `None` for empty or inverted input.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        overlaps(self.start, self.end, other.start, other.end)
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Intersection with `bounds`, or `None` when they don't overlap.
    pub fn clamp_to(&self, bounds: &Span) -> Option<Span> {
        Span::try_new(self.start.max(bounds.start), self.end.min(bounds.end))
    }

    pub fn subdivide(&self, step: Ms) -> Subdivide {
        subdivide(*self, step)
    }
}

/// Consecutive `step`-long spans fully inside `window`. The trailing remainder is dropped.
pub fn subdivide(window: Span, step: Ms) -> Subdivide {
    Subdivide {
        cursor: window.start,
        end: window.end,
        step,
    }
}

/// Lazy sub-interval sequence. Cloning restarts from the clone point.
#[derive(Debug, Clone)]
pub struct Subdivide {
    cursor: Ms,
    end: Ms,
    step: Ms,
}

impl Iterator for Subdivide {
    type Item = Span;

    fn next(&mut self) -> Option<Span> {
        if self.step <= 0 {
            return None;
        }
        let next = self.cursor.checked_add(self.step)?;
        if next > self.end {
            return None;
        }
        let span = Span::new(self.cursor, next);
        self.cursor = next;
        Some(span)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = if self.step <= 0 || self.end <= self.cursor {
            0
        } else {
            ((self.end - self.cursor) / self.step) as usize
        };
        (n, Some(n))
    }
}

impl ExactSizeIterator for Subdivide {}

pub fn now_ms() -> Ms {
    Utc::now().timestamp_millis()
}

pub fn to_utc(ms: Ms) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

/// RFC 3339 in UTC (`2025-10-25T10:00:00Z`). Falls back to the raw number out of range.
pub fn format_utc(ms: Ms) -> String {
    to_utc(ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        .unwrap_or_else(|| ms.to_string())
}

// ── People ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: Ulid,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl Person {
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            id: Ulid::new(),
            full_name: full_name.into(),
            email: None,
            phone: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Professional {
    pub person: Person,
    pub specialty: Option<String>,
    /// Weekly rules. Order matters: the first matching rule wins.
    pub availability: Vec<AvailabilitySlot>,
}

impl Professional {
    pub fn new(full_name: impl Into<String>, availability: Vec<AvailabilitySlot>) -> Self {
        Self {
            person: Person::new(full_name),
            specialty: None,
            availability,
        }
    }

    pub fn id(&self) -> Ulid {
        self.person.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    pub person: Person,
    pub diagnostic: Option<String>,
    pub prescription: Option<String>,
    pub requests: Vec<String>,
}

impl Patient {
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            person: Person::new(full_name),
            diagnostic: None,
            prescription: None,
            requests: Vec::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.person.id
    }
}

// ── Availability ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocationType {
    Private,
    #[default]
    Hospital,
}

/// Recurring weekly rule in the availability zone's local time. Never spans midnight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilitySlot {
    pub day_of_week: Weekday,
    pub start_local: NaiveTime,
    pub end_local: NaiveTime,
    pub location_type: LocationType,
    pub location_name: Option<String>,
}

impl AvailabilitySlot {
    /// `None` unless `start_local < end_local`.
    pub fn new(
        day_of_week: Weekday,
        start_local: NaiveTime,
        end_local: NaiveTime,
        location_type: LocationType,
    ) -> Option<Self> {
        (start_local < end_local).then(|| Self {
            day_of_week,
            start_local,
            end_local,
            location_type,
            location_name: None,
        })
    }

    pub fn with_location_name(mut self, name: impl Into<String>) -> Self {
        self.location_name = Some(name.into());
        self
    }
}

/// Dated open or closed window, independent of appointments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityBlock {
    pub id: Ulid,
    pub professional_id: Ulid,
    pub span: Span,
    pub open: bool,
    pub reason: Option<String>,
    pub location_type: Option<LocationType>,
}

impl AvailabilityBlock {
    pub fn effective_location(&self) -> LocationType {
        self.location_type.unwrap_or_default()
    }
}

// ── Appointments ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Cancelled,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub professional_id: Ulid,
    pub patient_id: Ulid,
    pub span: Span,
    pub status: AppointmentStatus,
    pub cancel_reason: Option<String>,
    pub notes: Option<String>,
    pub location_type: LocationType,
    pub location_name: Option<String>,
}

impl Appointment {
    pub fn is_cancelled(&self) -> bool {
        self.status == AppointmentStatus::Cancelled
    }

    /// Active appointments count toward overlap and show up in slot views.
    pub fn is_active(&self) -> bool {
        !self.is_cancelled()
    }

    pub fn cancel(&mut self, reason: Option<String>) {
        self.status = AppointmentStatus::Cancelled;
        self.cancel_reason = reason;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub professional_id: Ulid,
    pub patient_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub notes: Option<String>,
    pub location_type: Option<LocationType>,
    pub location_name: Option<String>,
}

impl BookingRequest {
    pub fn new(professional_id: Ulid, patient_id: Ulid, start: Ms, end: Ms) -> Self {
        Self {
            professional_id,
            patient_id,
            start,
            end,
            notes: None,
            location_type: None,
            location_name: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_location(mut self, location_type: LocationType, name: Option<String>) -> Self {
        self.location_type = Some(location_type);
        self.location_name = name;
        self
    }
}

// ── Slot views (derived, never stored) ───────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotStatus {
    Available,
    Booked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingItem {
    pub appointment_id: Ulid,
    pub patient_id: Ulid,
    pub patient_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotView {
    pub professional_id: Ulid,
    pub professional_name: Option<String>,
    #[serde(flatten)]
    pub span: Span,
    pub location_type: LocationType,
    pub status: SlotStatus,
    pub overlap_count: usize,
    pub bookings: Vec<BookingItem>,
}

/// `include` filter for the professional view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotFilter {
    Available,
    Booked,
    #[default]
    All,
}

impl SlotFilter {
    /// `"available"` / `"booked"` (any case); anything else, including nothing, is `All`.
    pub fn parse(include: Option<&str>) -> Self {
        match include {
            Some(s) if s.eq_ignore_ascii_case("available") => SlotFilter::Available,
            Some(s) if s.eq_ignore_ascii_case("booked") => SlotFilter::Booked,
            _ => SlotFilter::All,
        }
    }

    pub fn keeps(&self, overlap_count: usize) -> bool {
        match self {
            SlotFilter::Available => overlap_count == 0,
            SlotFilter::Booked => overlap_count > 0,
            SlotFilter::All => true,
        }
    }
}
