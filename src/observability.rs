use std::net::SocketAddr;

use crate::engine::{EngineError, ErrorKind};
use crate::model::Change;
use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total commands executed. Labels: command, status.
pub const COMMANDS_TOTAL: &str = "marquee_commands_total";

/// Histogram: command latency in seconds. Labels: command.
pub const COMMAND_DURATION_SECONDS: &str = "marquee_command_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "marquee_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "marquee_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "marquee_connections_rejected_total";

// ── Domain counters ─────────────────────────────────────────────

pub const HOLDS_CREATED_TOTAL: &str = "marquee_holds_created_total";
/// Counter: hold requests answered from the idempotency table.
pub const HOLDS_REPLAYED_TOTAL: &str = "marquee_holds_replayed_total";
pub const HOLDS_EXPIRED_TOTAL: &str = "marquee_holds_expired_total";
pub const RESERVATIONS_CONFIRMED_TOTAL: &str = "marquee_reservations_confirmed_total";
/// Counter: cancelled reservations. Labels: forced.
pub const RESERVATIONS_CANCELLED_TOTAL: &str = "marquee_reservations_cancelled_total";
pub const EVENTS_BOOKED_TOTAL: &str = "marquee_events_booked_total";
/// Counter: room bookings refused because the time was taken.
pub const BOOKING_CONFLICTS_TOTAL: &str = "marquee_booking_conflicts_total";
/// Counter: duplicate submissions and double decisions.
pub const INTEGRITY_ERRORS_TOTAL: &str = "marquee_integrity_errors_total";
pub const REQUESTS_SUBMITTED_TOTAL: &str = "marquee_requests_submitted_total";
pub const REQUESTS_ACCEPTED_TOTAL: &str = "marquee_requests_accepted_total";
pub const REQUESTS_REJECTED_TOTAL: &str = "marquee_requests_rejected_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}

/// Bump the domain counter matching a state change.
pub fn count_change(change: &Change) {
    match change {
        Change::HoldPlaced { .. } => metrics::counter!(HOLDS_CREATED_TOTAL).increment(1),
        Change::ReservationExpired { .. } => metrics::counter!(HOLDS_EXPIRED_TOTAL).increment(1),
        Change::ReservationConfirmed { .. } => metrics::counter!(RESERVATIONS_CONFIRMED_TOTAL).increment(1),
        Change::ReservationCancelled { forced, .. } => {
            metrics::counter!(RESERVATIONS_CANCELLED_TOTAL, "forced" => forced.to_string()).increment(1)
        }
        Change::EventBooked { .. } => metrics::counter!(EVENTS_BOOKED_TOTAL).increment(1),
        Change::RequestSubmitted { .. } => metrics::counter!(REQUESTS_SUBMITTED_TOTAL).increment(1),
        Change::RequestAccepted { .. } => metrics::counter!(REQUESTS_ACCEPTED_TOTAL).increment(1),
        Change::RequestRejected { .. } => metrics::counter!(REQUESTS_REJECTED_TOTAL).increment(1),
        _ => {}
    }
}

/// Integrity violations are logged at error level; booking conflicts are counted.
pub fn record_error(err: &EngineError) {
    match err.kind() {
        ErrorKind::Integrity => {
            tracing::error!(reason = %err.reason(), "integrity violation: {err}");
            metrics::counter!(INTEGRITY_ERRORS_TOTAL).increment(1);
        }
        ErrorKind::Conflict if matches!(err, EngineError::Conflict(_)) => {
            metrics::counter!(BOOKING_CONFLICTS_TOTAL).increment(1);
        }
        _ => {}
    }
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertRoom { .. } => "insert_room",
        Command::UpdateRoomLayout { .. } => "update_room_layout",
        Command::SelectRooms { .. } => "select_rooms",
        Command::InsertShowing { .. } => "insert_showing",
        Command::DeleteShowing { .. } => "delete_showing",
        Command::SelectShowing { .. } => "select_showing",
        Command::SelectSeats { .. } => "select_seats",
        Command::UpdateSeat { .. } => "update_seat",
        Command::InsertHold { .. } => "insert_hold",
        Command::UpdateReservation { .. } => "update_reservation",
        Command::SelectReservation { .. } => "select_reservation",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectSlots { .. } => "select_slots",
        Command::InsertEvent { .. } => "insert_event",
        Command::UpdateEvent { .. } => "update_event",
        Command::SelectEvents { .. } => "select_events",
        Command::InsertEventRequest { .. } => "insert_event_request",
        Command::ApproveRequest { .. } => "approve_request",
        Command::RejectRequest { .. } => "reject_request",
        Command::SelectEventRequests { .. } => "select_event_requests",
        Command::Listen { .. } => "listen",
        Command::Unlisten { .. } => "unlisten",
        Command::UnlistenAll => "unlisten_all",
    }
}
