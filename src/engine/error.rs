use serde::Serialize;
use thiserror::Error;
use ulid::Ulid;

use crate::model::{Ms, SeatRef, Span};

/// Layout validation failure, naming the offending cell.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("layout has no rows")]
    Empty,
    #[error("too many rows: {0}")]
    TooManyRows(usize),
    #[error("row {row} has no columns")]
    EmptyRow { row: char },
    #[error("invalid row label {row:?}")]
    InvalidRow { row: char },
    #[error("invalid column {column} in row {row}")]
    InvalidColumn { row: char, column: u16 },
    #[error("duplicate cell {row}{column}")]
    DuplicateCell { row: char, column: u16 },
    #[error("unknown seat kind {code:?} at {row}{column}")]
    UnknownKind { row: char, column: u16, code: char },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("invalid layout: {0}")]
    InvalidLayout(#[from] LayoutError),
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("unknown seat {0}")]
    UnknownSeat(SeatRef),
    #[error("seat {0} is not available")]
    SeatUnavailable(SeatRef),
    #[error("{requested} seats requested, at most {max} per reservation")]
    SeatLimitExceeded { requested: usize, max: usize },
    #[error("booking window closed for showing {0}")]
    BookingWindowClosed(Ulid),
    #[error("cancellation window closed for reservation {0}")]
    CancelWindowClosed(Ulid),
    #[error("idempotency key {0:?} reused with a different request")]
    DuplicateRequest(String),
    #[error("hold {0} has expired")]
    HoldExpired(Ulid),
    #[error("{id} is {status}")]
    InvalidState { id: Ulid, status: &'static str },
    #[error("conflict with booking: {0}")]
    Conflict(Ulid),
    #[error("too soon: earliest allowed start is {earliest}")]
    TooSoon { earliest: Ms },
    #[error("[{}, {}) is outside operating hours", .0.start, .0.end)]
    OutOfHours(Span),
    #[error("party of {party_size} exceeds room capacity {capacity}")]
    PartyTooLarge { party_size: u32, capacity: u32 },
    #[error("request {0} already decided")]
    AlreadyDecided(Ulid),
    #[error("a rejection reason is required")]
    ReasonRequired,
    #[error("request {0} has no room; one must be given at approval")]
    RoomRequired(Ulid),
    #[error("room {0} has active bookings")]
    RoomInUse(Ulid),
    #[error("showing {0} has sold seats")]
    ShowingHasSales(Ulid),
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
}

/// Coarse error taxonomy. Decides how callers (and logs) treat an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad shape; never partially applied.
    Validation,
    /// Expected contention or timing; retry may succeed later.
    Conflict,
    /// Caller bug.
    Integrity,
    NotFound,
    Forbidden,
}

/// User-facing reason code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reason {
    SeatUnavailable,
    LimitExceeded,
    WindowClosed,
    DuplicateRequest,
    HoldExpired,
    InvalidState,
    Conflict,
    TooSoon,
    OutOfHours,
    CapacityExceeded,
    AlreadyDecided,
    ReasonRequired,
    RoomRequired,
    RoomInUse,
    ShowingHasSales,
    InvalidLayout,
    InvalidRequest,
    NotFound,
    AlreadyExists,
    Forbidden,
}

impl Reason {
    pub fn as_str(self) -> &'static str {
        match self {
            Reason::SeatUnavailable => "SEAT_UNAVAILABLE",
            Reason::LimitExceeded => "LIMIT_EXCEEDED",
            Reason::WindowClosed => "WINDOW_CLOSED",
            Reason::DuplicateRequest => "DUPLICATE_REQUEST",
            Reason::HoldExpired => "HOLD_EXPIRED",
            Reason::InvalidState => "INVALID_STATE",
            Reason::Conflict => "CONFLICT",
            Reason::TooSoon => "TOO_SOON",
            Reason::OutOfHours => "OUT_OF_HOURS",
            Reason::CapacityExceeded => "CAPACITY_EXCEEDED",
            Reason::AlreadyDecided => "ALREADY_DECIDED",
            Reason::ReasonRequired => "REASON_REQUIRED",
            Reason::RoomRequired => "ROOM_REQUIRED",
            Reason::RoomInUse => "ROOM_IN_USE",
            Reason::ShowingHasSales => "SHOWING_HAS_SALES",
            Reason::InvalidLayout => "INVALID_LAYOUT",
            Reason::InvalidRequest => "INVALID_REQUEST",
            Reason::NotFound => "NOT_FOUND",
            Reason::AlreadyExists => "ALREADY_EXISTS",
            Reason::Forbidden => "FORBIDDEN",
        }
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        use EngineError::*;
        match self {
            NotFound(_) => ErrorKind::NotFound,
            InvalidLayout(_)
            | Invalid(_)
            | LimitExceeded(_)
            | UnknownSeat(_)
            | SeatLimitExceeded { .. }
            | TooSoon { .. }
            | OutOfHours(_)
            | PartyTooLarge { .. }
            | ReasonRequired
            | RoomRequired(_) => ErrorKind::Validation,
            SeatUnavailable(_)
            | BookingWindowClosed(_)
            | CancelWindowClosed(_)
            | HoldExpired(_)
            | InvalidState { .. }
            | Conflict(_)
            | RoomInUse(_)
            | ShowingHasSales(_)
            | AlreadyExists(_) => ErrorKind::Conflict,
            DuplicateRequest(_) | AlreadyDecided(_) => ErrorKind::Integrity,
            Forbidden(_) => ErrorKind::Forbidden,
        }
    }

    pub fn reason(&self) -> Reason {
        use EngineError::*;
        match self {
            NotFound(_) => Reason::NotFound,
            AlreadyExists(_) => Reason::AlreadyExists,
            InvalidLayout(_) => Reason::InvalidLayout,
            Invalid(_) | UnknownSeat(_) => Reason::InvalidRequest,
            LimitExceeded(_) | SeatLimitExceeded { .. } => Reason::LimitExceeded,
            SeatUnavailable(_) => Reason::SeatUnavailable,
            BookingWindowClosed(_) | CancelWindowClosed(_) => Reason::WindowClosed,
            DuplicateRequest(_) => Reason::DuplicateRequest,
            HoldExpired(_) => Reason::HoldExpired,
            InvalidState { .. } => Reason::InvalidState,
            Conflict(_) => Reason::Conflict,
            TooSoon { .. } => Reason::TooSoon,
            OutOfHours(_) => Reason::OutOfHours,
            PartyTooLarge { .. } => Reason::CapacityExceeded,
            AlreadyDecided(_) => Reason::AlreadyDecided,
            ReasonRequired => Reason::ReasonRequired,
            RoomRequired(_) => Reason::RoomRequired,
            RoomInUse(_) => Reason::RoomInUse,
            ShowingHasSales(_) => Reason::ShowingHasSales,
            Forbidden(_) => Reason::Forbidden,
        }
    }
}
