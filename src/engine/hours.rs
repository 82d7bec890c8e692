use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone};

use crate::config::Policy;
use crate::model::{Ms, Span};

/// Venue-local calendar date containing the instant `at`.
pub fn local_date(policy: &Policy, at: Ms) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(at).map(|utc| utc.with_timezone(&policy.venue_offset()).date_naive())
}

fn local_instant(policy: &Policy, date: NaiveDate, time: NaiveTime) -> Option<Ms> {
    policy
        .venue_offset()
        .from_local_datetime(&date.and_time(time))
        .single()
        .map(|dt| dt.timestamp_millis())
}

/// `[open, close)` on the given venue-local day.
pub fn operating_window(policy: &Policy, date: NaiveDate) -> Option<Span> {
    let open = local_instant(policy, date, policy.opening_time)?;
    let close = local_instant(policy, date, policy.closing_time)?;
    (open < close).then(|| Span::new(open, close))
}

/// The span must fit inside the operating window of the day it starts on.
pub fn within_operating_hours(policy: &Policy, span: &Span) -> bool {
    local_date(policy, span.start)
        .and_then(|date| operating_window(policy, date))
        .is_some_and(|window| window.contains_span(span))
}
