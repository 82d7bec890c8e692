use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

pub const SECOND: Ms = 1_000;
pub const MINUTE: Ms = 60 * SECOND;
pub const HOUR: Ms = 60 * MINUTE;
pub const DAY: Ms = 24 * HOUR;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Back-to-back spans do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

// ── Identity ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Staff,
}

/// The caller of a mutating operation. Always passed explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn customer(id: impl Into<String>) -> Self {
        Self { id: id.into(), role: Role::Customer }
    }

    pub fn staff(id: impl Into<String>) -> Self {
        Self { id: id.into(), role: Role::Staff }
    }

    pub fn is_staff(&self) -> bool {
        self.role == Role::Staff
    }
}

// ── Seat layout ──────────────────────────────────────────────────

/// A seat position: row letter plus 1-based column, e.g. `C12`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeatRef {
    pub row: char,
    pub column: u16,
}

impl SeatRef {
    pub fn new(row: char, column: u16) -> Self {
        Self { row, column }
    }
}

impl fmt::Display for SeatRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.row, self.column)
    }
}

impl FromStr for SeatRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut chars = s.chars();
        let row = chars
            .next()
            .filter(|c| c.is_ascii_alphabetic())
            .ok_or_else(|| format!("bad seat label: {s:?}"))?
            .to_ascii_uppercase();
        let column: u16 = chars
            .as_str()
            .parse()
            .map_err(|_| format!("bad seat label: {s:?}"))?;
        if column == 0 {
            return Err(format!("bad seat label: {s:?} (columns start at 1)"));
        }
        Ok(Self { row, column })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeatKind {
    Normal,
    Accessible,
    /// Physically present but out of service.
    Disabled,
    /// Aisle or gap in the grid. Never part of inventory.
    Empty,
}

impl SeatKind {
    pub fn code(self) -> char {
        match self {
            SeatKind::Normal => 'N',
            SeatKind::Accessible => 'A',
            SeatKind::Disabled => 'D',
            SeatKind::Empty => 'E',
        }
    }

    pub fn from_code(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'N' => Some(SeatKind::Normal),
            'A' => Some(SeatKind::Accessible),
            'D' => Some(SeatKind::Disabled),
            'E' => Some(SeatKind::Empty),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SeatKind::Normal => "normal",
            SeatKind::Accessible => "accessible",
            SeatKind::Disabled => "disabled",
            SeatKind::Empty => "empty",
        }
    }

    /// Counts toward room capacity.
    pub fn is_sellable(self) -> bool {
        matches!(self, SeatKind::Normal | SeatKind::Accessible)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatDefinition {
    pub row: char,
    pub column: u16,
    pub kind: SeatKind,
}

impl SeatDefinition {
    pub fn new(row: char, column: u16, kind: SeatKind) -> Self {
        Self { row, column, kind }
    }

    pub fn seat(&self) -> SeatRef {
        SeatRef::new(self.row, self.column)
    }
}

// ── Seat inventory ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeatState {
    Available,
    Held,
    Sold,
    Blocked,
}

impl SeatState {
    pub fn as_str(self) -> &'static str {
        match self {
            SeatState::Available => "available",
            SeatState::Held => "held",
            SeatState::Sold => "sold",
            SeatState::Blocked => "blocked",
        }
    }
}

/// Dynamic state of one seat in one showing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatCell {
    pub kind: SeatKind,
    pub state: SeatState,
    /// Owning reservation while HELD or SOLD.
    pub reservation: Option<Ulid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Active,
    Expired,
    Confirmed,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Expired => "expired",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub showing_id: Ulid,
    /// Sorted, no duplicates.
    pub seats: Vec<SeatRef>,
    pub idempotency_key: String,
    pub holder: String,
    pub created_at: Ms,
    pub expires_at: Ms,
    pub status: ReservationStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Showing {
    pub id: Ulid,
    pub room_id: Ulid,
    pub span: Span,
    /// Minor currency units.
    pub price: i64,
    pub cancelled: bool,
}

/// Seat counts for a showing. `available = total - sold - held`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySnapshot {
    /// Seats offered for sale (excludes blocked seats).
    pub total: u32,
    pub sold: u32,
    pub held: u32,
    pub blocked: u32,
    pub available: u32,
}

/// Per-showing authoritative seat state. Guarded by one lock per showing.
#[derive(Debug, Clone)]
pub struct ShowingState {
    pub showing: Showing,
    pub seats: BTreeMap<SeatRef, SeatCell>,
    pub reservations: HashMap<Ulid, Reservation>,
    /// Idempotency key → reservation. Kept for the life of the showing.
    pub idempotency: HashMap<String, Ulid>,
}

// ── Rooms and the room timeline ──────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Reserved,
    Cancelled,
    Finalized,
}

impl EventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::Reserved => "reserved",
            EventStatus::Cancelled => "cancelled",
            EventStatus::Finalized => "finalized",
        }
    }
}

/// A private event occupying a whole room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: Ulid,
    pub room_id: Ulid,
    pub span: Span,
    pub party_size: u32,
    pub notes: Option<String>,
    pub status: EventStatus,
    /// Set when the event came from an approved request.
    pub request_id: Option<Ulid>,
}

/// What occupies a slice of a room's timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntervalKind {
    Showing,
    Event,
}

/// One occupied span on a room timeline, either a showing or an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub id: Ulid,
    pub span: Span,
    pub kind: IntervalKind,
}

#[derive(Debug, Clone)]
pub struct RoomState {
    pub id: Ulid,
    pub name: String,
    pub layout: Vec<SeatDefinition>,
    /// Derived from the layout.
    pub capacity: u32,
    /// Non-cancelled showings and events, sorted by `span.start`.
    pub intervals: Vec<Interval>,
    /// Every event ever booked here, including cancelled ones.
    pub events: HashMap<Ulid, Event>,
}

impl RoomState {
    pub fn new(id: Ulid, name: String, layout: Vec<SeatDefinition>, capacity: u32) -> Self {
        Self {
            id,
            name,
            layout,
            capacity,
            intervals: Vec::new(),
            events: HashMap::new(),
        }
    }

    /// Insert interval maintaining sort order by span.start.
    pub fn insert_interval(&mut self, interval: Interval) {
        let pos = self
            .intervals
            .binary_search_by_key(&interval.span.start, |i| i.span.start)
            .unwrap_or_else(|e| e);
        self.intervals.insert(pos, interval);
    }

    /// Remove interval by id.
    pub fn remove_interval(&mut self, id: Ulid) -> Option<Interval> {
        let pos = self.intervals.iter().position(|i| i.id == id)?;
        Some(self.intervals.remove(pos))
    }

    /// Return only intervals whose span overlaps the query window.
    /// Uses binary search to skip intervals starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Interval> {
        let right_bound = self
            .intervals
            .partition_point(|i| i.span.start < query.end);
        self.intervals[..right_bound]
            .iter()
            .filter(move |i| i.span.end > query.start)
    }

    /// True while any showing or reserved event has not yet finished.
    pub fn has_active_bookings(&self, now: Ms) -> bool {
        self.intervals.iter().any(|i| {
            i.span.end > now
                && match i.kind {
                    IntervalKind::Showing => true,
                    IntervalKind::Event => self
                        .events
                        .get(&i.id)
                        .is_some_and(|e| e.status == EventStatus::Reserved),
                }
        })
    }
}

// ── Event requests ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(RequestStatus::Pending),
            "accepted" => Ok(RequestStatus::Accepted),
            "rejected" => Ok(RequestStatus::Rejected),
            other => Err(format!("unknown request status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRequest {
    pub id: Ulid,
    pub room_id: Option<Ulid>,
    pub start: Ms,
    pub duration: Ms,
    pub party_size: u32,
    pub requester: String,
    pub contact: Contact,
    pub notes: Option<String>,
    pub status: RequestStatus,
    pub submitted_at: Ms,
    /// Present iff REJECTED.
    pub rejection_reason: Option<String>,
    /// Present iff ACCEPTED.
    pub event_id: Option<Ulid>,
    pub decided_at: Option<Ms>,
    pub decided_by: Option<String>,
}

impl EventRequest {
    pub fn span(&self) -> Span {
        Span::new(self.start, self.start + self.duration)
    }
}

// ── Audit records ────────────────────────────────────────────────

/// Every state change the engine makes. Logged and broadcast per resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Change {
    RoomCreated {
        room_id: Ulid,
        capacity: u32,
    },
    RoomLayoutUpdated {
        room_id: Ulid,
        capacity: u32,
    },
    ShowingScheduled {
        showing_id: Ulid,
        room_id: Ulid,
        span: Span,
    },
    ShowingCancelled {
        showing_id: Ulid,
        room_id: Ulid,
    },
    SeatBlocked {
        showing_id: Ulid,
        seat: SeatRef,
    },
    SeatUnblocked {
        showing_id: Ulid,
        seat: SeatRef,
    },
    HoldPlaced {
        reservation_id: Ulid,
        showing_id: Ulid,
        seats: Vec<SeatRef>,
        expires_at: Ms,
    },
    HoldExtended {
        reservation_id: Ulid,
        showing_id: Ulid,
        expires_at: Ms,
    },
    ReservationExpired {
        reservation_id: Ulid,
        showing_id: Ulid,
    },
    ReservationConfirmed {
        reservation_id: Ulid,
        showing_id: Ulid,
    },
    ReservationCancelled {
        reservation_id: Ulid,
        showing_id: Ulid,
        forced: bool,
    },
    EventBooked {
        event_id: Ulid,
        room_id: Ulid,
        span: Span,
        request_id: Option<Ulid>,
    },
    EventCancelled {
        event_id: Ulid,
        room_id: Ulid,
    },
    EventFinalized {
        event_id: Ulid,
        room_id: Ulid,
    },
    RequestSubmitted {
        request_id: Ulid,
        room_id: Option<Ulid>,
    },
    RequestAccepted {
        request_id: Ulid,
        event_id: Ulid,
    },
    RequestRejected {
        request_id: Ulid,
        reason: String,
    },
}

/// A change stamped with when it happened and who caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub at: Ms,
    pub actor: String,
    pub change: Change,
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub id: Ulid,
    pub name: String,
    pub capacity: u32,
    pub has_active_bookings: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShowingInfo {
    pub showing: Showing,
    pub snapshot: InventorySnapshot,
    /// Past its end time.
    pub retired: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatView {
    pub row: char,
    pub column: u16,
    pub kind: SeatKind,
    pub state: SeatState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotsView {
    pub open: Ms,
    pub close: Ms,
    pub busy: Vec<Span>,
    pub free: Vec<Ms>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn span_contains_span() {
        let outer = Span::new(100, 400);
        assert!(outer.contains_span(&Span::new(150, 300)));
        assert!(outer.contains_span(&outer));
        assert!(!outer.contains_span(&Span::new(50, 200)));
    }

    #[test]
    fn seat_ref_parse_and_display() {
        let seat: SeatRef = "c12".parse().unwrap();
        assert_eq!(seat, SeatRef::new('C', 12));
        assert_eq!(seat.to_string(), "C12");
        assert!("A0".parse::<SeatRef>().is_err());
        assert!("12".parse::<SeatRef>().is_err());
        assert!("A".parse::<SeatRef>().is_err());
    }

    #[test]
    fn seat_refs_order_by_row_then_column() {
        let mut seats = vec![SeatRef::new('B', 1), SeatRef::new('A', 10), SeatRef::new('A', 2)];
        seats.sort();
        assert_eq!(
            seats,
            vec![SeatRef::new('A', 2), SeatRef::new('A', 10), SeatRef::new('B', 1)]
        );
    }

    fn event_interval(id: Ulid, start: Ms, end: Ms) -> Interval {
        Interval { id, span: Span::new(start, end), kind: IntervalKind::Event }
    }

    #[test]
    fn interval_ordering_and_removal() {
        let mut rs = RoomState::new(Ulid::new(), "Sala 1".into(), Vec::new(), 0);
        let ids: Vec<Ulid> = (0..3).map(|_| Ulid::new()).collect();
        rs.insert_interval(event_interval(ids[2], 300, 400));
        rs.insert_interval(event_interval(ids[0], 100, 200));
        rs.insert_interval(event_interval(ids[1], 200, 300));
        assert_eq!(rs.intervals[0].span.start, 100);
        assert_eq!(rs.intervals[2].span.start, 300);

        rs.remove_interval(ids[1]);
        assert_eq!(rs.intervals.len(), 2);
        assert_eq!(rs.intervals[0].id, ids[0]);
        assert_eq!(rs.intervals[1].id, ids[2]);
        assert!(rs.remove_interval(Ulid::new()).is_none());
    }

    #[test]
    fn overlapping_skips_adjacent() {
        let mut rs = RoomState::new(Ulid::new(), "Sala 1".into(), Vec::new(), 0);
        rs.insert_interval(event_interval(Ulid::new(), 100, 200));
        rs.insert_interval(event_interval(Ulid::new(), 450, 600));
        rs.insert_interval(event_interval(Ulid::new(), 1000, 1100));

        let hits: Vec<_> = rs.overlapping(&Span::new(200, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn active_bookings_ignore_finished_and_finalized() {
        let mut rs = RoomState::new(Ulid::new(), "Sala 1".into(), Vec::new(), 10);
        let past = Ulid::new();
        rs.insert_interval(Interval { id: past, span: Span::new(0, 100), kind: IntervalKind::Showing });
        assert!(!rs.has_active_bookings(500));

        let done = Ulid::new();
        rs.insert_interval(event_interval(done, 1000, 2000));
        rs.events.insert(
            done,
            Event {
                id: done,
                room_id: rs.id,
                span: Span::new(1000, 2000),
                party_size: 4,
                notes: None,
                status: EventStatus::Finalized,
                request_id: None,
            },
        );
        assert!(!rs.has_active_bookings(500));

        rs.events.get_mut(&done).unwrap().status = EventStatus::Reserved;
        assert!(rs.has_active_bookings(500));
        assert!(!rs.has_active_bookings(2000));
    }

    #[test]
    fn change_serializes_with_type_tag() {
        let change = Change::ReservationExpired {
            reservation_id: Ulid::new(),
            showing_id: Ulid::new(),
        };
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["type"], "reservation_expired");
    }
}
