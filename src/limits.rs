use crate::model::{DAY, Ms};

/// Row labels are single letters A–Z.
pub const MAX_ROWS: usize = 26;
pub const MAX_COLUMNS: u16 = 99;

pub const MAX_ROOMS: usize = 10_000;
pub const MAX_INTERVALS_PER_ROOM: usize = 50_000;
pub const MAX_RESERVATIONS_PER_SHOWING: usize = 100_000;

pub const MAX_NAME_LEN: usize = 128;
pub const MAX_NOTES_LEN: usize = 1024;
pub const MAX_REASON_LEN: usize = 1024;
pub const MAX_CONTACT_LEN: usize = 256;
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

/// Widest span accepted for a showing, event or query.
pub const MAX_SPAN_DURATION_MS: Ms = 31 * DAY;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;
