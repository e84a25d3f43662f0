use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// UTC instant, the only time type.
pub type Ts = DateTime<Utc>;

pub type ResourceId = u64;
pub type BookingId = u64;

/// Closed interval `[start, end]`. Both endpoints belong to the span, so two
/// spans that merely touch still collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ts,
    pub end: Ts,
}

impl Span {
    pub fn new(start: Ts, end: Ts) -> Self {
        debug_assert!(start <= end, "Span start must not be after end");
        Self { start, end }
    }

    pub fn contains_instant(&self, t: Ts) -> bool {
        self.start <= t && t <= self.end
    }

    /// Inclusive overlap test with `self` as the existing span and `candidate`
    /// as the requested one.
    pub fn conflicts_with(&self, candidate: &Span) -> bool {
        self.contains_instant(candidate.start)
            || self.contains_instant(candidate.end)
            || candidate.contains_instant(self.start)
    }
}

/// Calendar day of an instant in UTC.
pub fn utc_day(t: Ts) -> NaiveDate {
    t.date_naive()
}

/// The calendar day after `day`, saturating at the end of chrono's range.
pub fn next_day(day: NaiveDate) -> NaiveDate {
    day.checked_add_days(Days::new(1)).unwrap_or(day)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub created_at: Ts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub name: String,
    pub category: String,
    pub external_id: Option<String>,
    pub comment: Option<String>,
    pub address: Option<String>,
    pub created_at: Ts,
    pub updated_at: Ts,
}

/// Input for resource creation; the store assigns the numeric id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewResource {
    pub name: String,
    pub category: String,
    pub external_id: Option<String>,
    pub comment: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visitor {
    pub email: String,
    pub is_admin: bool,
    /// Chat platform user id. At most one visitor per external id.
    pub external_id: Option<i64>,
    pub chat_id: Option<i64>,
    pub full_name: Option<String>,
    pub username: Option<String>,
    pub comment: Option<String>,
    pub created_at: Ts,
    pub updated_at: Ts,
}

/// First-contact registration of a chat account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registration {
    pub email: String,
    pub external_id: i64,
    pub is_admin: bool,
    pub chat_id: Option<i64>,
    pub full_name: Option<String>,
    pub username: Option<String>,
    pub comment: Option<String>,
}

/// A live reservation of a resource by a visitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub resource_name: String,
    pub email: String,
    pub take_date: Ts,
    pub return_date: Ts,
    pub created_at: Ts,
}

impl Booking {
    pub fn span(&self) -> Span {
        Span::new(self.take_date, self.return_date)
    }

    pub fn is_active_at(&self, now: Ts) -> bool {
        self.span().contains_instant(now)
    }

    /// End the reservation early. The closed copy keeps everything but the
    /// return date, which becomes `at`.
    pub fn close(self, at: Ts) -> ClosedBooking {
        ClosedBooking {
            id: self.id,
            resource_name: self.resource_name,
            email: self.email,
            take_date: self.take_date,
            return_date: at,
            created_at: self.created_at,
        }
    }
}

/// Request for a new booking; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub resource_name: String,
    pub email: String,
    pub span: Span,
    pub created_at: Ts,
}

/// Immutable history entry of a booking returned before it expired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedBooking {
    pub id: BookingId,
    pub resource_name: String,
    pub email: String,
    pub take_date: Ts,
    pub return_date: Ts,
    pub created_at: Ts,
}

/// Occupancy of a resource as seen by one visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// The viewer holds it right now.
    Yours,
    /// Somebody else holds it right now.
    Others,
    /// Free, nothing booked ahead.
    NoOne,
    /// Free now, booked later.
    WillBeTaken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageInfo {
    pub resource_id: ResourceId,
    pub name: String,
    pub current_take_date: Option<Ts>,
    pub current_return_date: Option<Ts>,
    pub status: Status,
    pub first_booked_day_in_future: Option<Ts>,
    pub last_booked_day_in_row: Option<Ts>,
}

/// Broadcast to whoever delivers messages to visitors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notice {
    Taken { booking: Booking },
    Returned { closed: ClosedBooking },
    Expired { booking: Booking },
    Expiring { booking: Booking, days_left: i64 },
}

impl Notice {
    pub fn resource_name(&self) -> &str {
        match self {
            Notice::Taken { booking }
            | Notice::Expired { booking }
            | Notice::Expiring { booking, .. } => &booking.resource_name,
            Notice::Returned { closed } => &closed.resource_name,
        }
    }

    pub fn email(&self) -> &str {
        match self {
            Notice::Taken { booking }
            | Notice::Expired { booking }
            | Notice::Expiring { booking, .. } => &booking.email,
            Notice::Returned { closed } => &closed.email,
        }
    }

    /// JSON payload handed to the delivery side.
    pub fn to_payload(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// The event types, flat with no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    CategoryCreated { category: Category },
    ResourceCreated { resource: Resource },
    /// Insert or replace, keyed by email.
    VisitorSaved { visitor: Visitor },
    BookingCreated { booking: Booking },
    /// Live booking `id` removed and `closed` appended to the history.
    BookingClosed { id: BookingId, closed: ClosedBooking },
    BookingDeleted { id: BookingId },
    /// Booking ids below `next` are spent, even if no record survives.
    BookingIdsReserved { next: BookingId },
}
