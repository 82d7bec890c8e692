use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::record_error;

use super::availability::{busy_within, free_slots};
use super::conflict::{check_advance_notice, check_no_conflict, check_operating_hours, check_text, checked_span};
use super::hours::operating_window;
use super::{Engine, EngineError, require_staff};

/// Direct staff booking of a whole room.
#[derive(Debug, Clone)]
pub struct BookEvent {
    pub room_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub party_size: u32,
    pub notes: Option<String>,
}

/// Everything `book` needs, however the booking originated.
pub(super) struct Booking<'a> {
    pub room_id: Ulid,
    pub span: Span,
    pub party_size: u32,
    pub notes: Option<String>,
    pub request_id: Option<Ulid>,
    pub actor: &'a Actor,
}

impl Engine {
    /// True when no showing or non-cancelled event overlaps `[start, end)`.
    pub async fn check_availability(&self, room_id: Ulid, start: Ms, end: Ms) -> Result<bool, EngineError> {
        let span = checked_span(start, end)?;
        let rs = self.get_room(&room_id)?;
        let room = rs.read().await;
        Ok(check_no_conflict(&room, &span).is_ok())
    }

    pub async fn book_event(&self, req: BookEvent, actor: &Actor) -> Result<Event, EngineError> {
        require_staff(actor, "only staff can book rooms directly")?;
        let span = checked_span(req.start, req.end)?;
        self.book(Booking {
            room_id: req.room_id,
            span,
            party_size: req.party_size,
            notes: req.notes,
            request_id: None,
            actor,
        })
        .await
        .inspect_err(record_error)
    }

    /// Validate and insert under the room write lock. Check-and-insert is
    /// atomic per room. Advance notice is measured from now, so a pending
    /// request can become too soon to approve.
    pub(super) async fn book(&self, b: Booking<'_>) -> Result<Event, EngineError> {
        if b.party_size == 0 {
            return Err(EngineError::Invalid("party size must be at least 1".into()));
        }
        if let Some(notes) = &b.notes {
            check_text(notes, MAX_NOTES_LEN, "notes too long")?;
        }
        check_advance_notice(&self.policy, self.now(), b.span.start)?;
        check_operating_hours(&self.policy, &b.span)?;

        let rs = self.get_room(&b.room_id)?;
        let mut room = rs.write().await;
        if b.party_size > room.capacity {
            return Err(EngineError::PartyTooLarge { party_size: b.party_size, capacity: room.capacity });
        }
        if room.intervals.len() >= MAX_INTERVALS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many intervals on room"));
        }
        check_no_conflict(&room, &b.span)?;

        let event = Event {
            id: Ulid::new(),
            room_id: b.room_id,
            span: b.span,
            party_size: b.party_size,
            notes: b.notes,
            status: EventStatus::Reserved,
            request_id: b.request_id,
        };
        room.insert_interval(Interval { id: event.id, span: event.span, kind: IntervalKind::Event });
        room.events.insert(event.id, event.clone());
        self.store.map_entity(event.id, b.room_id);
        self.record(
            b.room_id,
            &b.actor.id,
            Change::EventBooked {
                event_id: event.id,
                room_id: b.room_id,
                span: event.span,
                request_id: b.request_id,
            },
        );
        Ok(event)
    }

    /// RESERVED → CANCELLED; frees the room time.
    pub async fn cancel_event(&self, event_id: Ulid, actor: &Actor) -> Result<(), EngineError> {
        require_staff(actor, "only staff can cancel events")?;
        let room_id = self.store.owner_of(&event_id).ok_or(EngineError::NotFound(event_id))?;
        let rs = self.get_room(&room_id)?;
        let mut room = rs.write().await;
        let event = room.events.get_mut(&event_id).ok_or(EngineError::NotFound(event_id))?;
        match event.status {
            EventStatus::Cancelled => return Ok(()),
            EventStatus::Finalized => {
                return Err(EngineError::InvalidState { id: event_id, status: event.status.as_str() });
            }
            EventStatus::Reserved => event.status = EventStatus::Cancelled,
        }
        room.remove_interval(event_id);
        self.record(room_id, &actor.id, Change::EventCancelled { event_id, room_id });
        Ok(())
    }

    /// RESERVED → FINALIZED. The time stays occupied.
    pub async fn finalize_event(&self, event_id: Ulid, actor: &Actor) -> Result<(), EngineError> {
        require_staff(actor, "only staff can finalize events")?;
        let room_id = self.store.owner_of(&event_id).ok_or(EngineError::NotFound(event_id))?;
        let rs = self.get_room(&room_id)?;
        let mut room = rs.write().await;
        let event = room.events.get_mut(&event_id).ok_or(EngineError::NotFound(event_id))?;
        match event.status {
            EventStatus::Finalized => return Ok(()),
            EventStatus::Cancelled => {
                return Err(EngineError::InvalidState { id: event_id, status: event.status.as_str() });
            }
            EventStatus::Reserved => event.status = EventStatus::Finalized,
        }
        self.record(room_id, &actor.id, Change::EventFinalized { event_id, room_id });
        Ok(())
    }

    /// Operating window, busy spans and free start times for one venue-local day.
    pub async fn room_slots(
        &self,
        room_id: Ulid,
        date: NaiveDate,
        duration_minutes: u32,
    ) -> Result<SlotsView, EngineError> {
        if duration_minutes == 0 {
            return Err(EngineError::Invalid("duration must be positive".into()));
        }
        let window = operating_window(&self.policy, date)
            .ok_or_else(|| EngineError::Invalid(format!("no operating window on {date}")))?;

        let rs = self.get_room(&room_id)?;
        let room = rs.read().await;
        let occupied: Vec<Span> = room.overlapping(&window).map(|i| i.span).collect();
        drop(room);

        let busy = busy_within(&window, &occupied);
        let free = free_slots(
            &window,
            self.policy.slot_step_ms(),
            duration_minutes as Ms * MINUTE,
            &busy,
        );
        Ok(SlotsView {
            open: window.start,
            close: window.end,
            busy,
            free,
        })
    }
}
