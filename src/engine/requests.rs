use std::sync::Arc;

use tokio::sync::Mutex;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::record_error;

use super::conflict::{check_advance_notice, check_operating_hours, check_text, checked_span};
use super::scheduling::Booking;
use super::{Engine, EngineError, require_staff};

/// A tentative private-event booking awaiting staff decision.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    /// May be left for the approver to choose.
    pub room_id: Option<Ulid>,
    pub start: Ms,
    pub duration_minutes: u32,
    pub party_size: u32,
    pub contact: Contact,
    pub notes: Option<String>,
}

impl Engine {
    /// Store a PENDING request. Advance notice and operating hours are
    /// checked eagerly; a named room must exist and fit the party.
    pub async fn submit_request(&self, req: SubmitRequest, actor: &Actor) -> Result<EventRequest, EngineError> {
        if req.duration_minutes == 0 {
            return Err(EngineError::Invalid("duration must be positive".into()));
        }
        if req.party_size == 0 {
            return Err(EngineError::Invalid("party size must be at least 1".into()));
        }
        let duration = req.duration_minutes as Ms * MINUTE;
        let end = req
            .start
            .checked_add(duration)
            .ok_or(EngineError::LimitExceeded("timestamp out of range"))?;
        let span = checked_span(req.start, end)?;
        check_text(&req.contact.name, MAX_CONTACT_LEN, "contact name too long")?;
        for field in [&req.contact.email, &req.contact.phone].into_iter().flatten() {
            check_text(field, MAX_CONTACT_LEN, "contact field too long")?;
        }
        if let Some(notes) = &req.notes {
            check_text(notes, MAX_NOTES_LEN, "notes too long")?;
        }

        let now = self.now();
        check_advance_notice(&self.policy, now, span.start)?;
        check_operating_hours(&self.policy, &span)?;

        if let Some(room_id) = req.room_id {
            let rs = self.get_room(&room_id)?;
            let capacity = rs.read().await.capacity;
            if req.party_size > capacity {
                return Err(EngineError::PartyTooLarge { party_size: req.party_size, capacity });
            }
        }

        let request = EventRequest {
            id: Ulid::new(),
            room_id: req.room_id,
            start: span.start,
            duration,
            party_size: req.party_size,
            requester: actor.id.clone(),
            contact: req.contact,
            notes: req.notes,
            status: RequestStatus::Pending,
            submitted_at: now,
            rejection_reason: None,
            event_id: None,
            decided_at: None,
            decided_by: None,
        };
        self.store.insert_request(request.id, Arc::new(Mutex::new(request.clone())));
        self.record(
            request.id,
            &actor.id,
            Change::RequestSubmitted { request_id: request.id, room_id: request.room_id },
        );
        Ok(request)
    }

    /// PENDING → ACCEPTED by booking the room. Any failure leaves the
    /// request PENDING and is returned unchanged.
    pub async fn approve_request(
        &self,
        id: Ulid,
        room_override: Option<Ulid>,
        actor: &Actor,
    ) -> Result<Event, EngineError> {
        self.approve_request_inner(id, room_override, actor)
            .await
            .inspect_err(record_error)
    }

    async fn approve_request_inner(
        &self,
        id: Ulid,
        room_override: Option<Ulid>,
        actor: &Actor,
    ) -> Result<Event, EngineError> {
        require_staff(actor, "only staff can approve requests")?;
        let shared = self.store.get_request(&id).ok_or(EngineError::NotFound(id))?;
        let mut request = shared.lock().await;
        if request.status != RequestStatus::Pending {
            return Err(EngineError::AlreadyDecided(id));
        }
        let room_id = room_override.or(request.room_id).ok_or(EngineError::RoomRequired(id))?;

        let event = self
            .book(Booking {
                room_id,
                span: request.span(),
                party_size: request.party_size,
                notes: request.notes.clone(),
                request_id: Some(id),
                actor,
            })
            .await?;

        request.room_id = Some(room_id);
        request.status = RequestStatus::Accepted;
        request.event_id = Some(event.id);
        request.decided_at = Some(self.now());
        request.decided_by = Some(actor.id.clone());
        self.record(id, &actor.id, Change::RequestAccepted { request_id: id, event_id: event.id });
        Ok(event)
    }

    /// PENDING → REJECTED with a non-empty reason, stored verbatim.
    pub async fn reject_request(&self, id: Ulid, reason: &str, actor: &Actor) -> Result<(), EngineError> {
        self.reject_request_inner(id, reason, actor)
            .await
            .inspect_err(record_error)
    }

    async fn reject_request_inner(&self, id: Ulid, reason: &str, actor: &Actor) -> Result<(), EngineError> {
        require_staff(actor, "only staff can reject requests")?;
        if reason.trim().is_empty() {
            return Err(EngineError::ReasonRequired);
        }
        check_text(reason, MAX_REASON_LEN, "rejection reason too long")?;

        let shared = self.store.get_request(&id).ok_or(EngineError::NotFound(id))?;
        let mut request = shared.lock().await;
        if request.status != RequestStatus::Pending {
            return Err(EngineError::AlreadyDecided(id));
        }
        request.status = RequestStatus::Rejected;
        request.rejection_reason = Some(reason.to_string());
        request.decided_at = Some(self.now());
        request.decided_by = Some(actor.id.clone());
        self.record(id, &actor.id, Change::RequestRejected { request_id: id, reason: reason.to_string() });
        Ok(())
    }

    pub async fn get_request(&self, id: Ulid) -> Result<EventRequest, EngineError> {
        let shared = self.store.get_request(&id).ok_or(EngineError::NotFound(id))?;
        let request = shared.lock().await;
        Ok(request.clone())
    }

    /// All requests, oldest first, optionally filtered by status.
    pub async fn list_requests(&self, status: Option<RequestStatus>) -> Vec<EventRequest> {
        let mut out = Vec::new();
        for shared in self.store.requests() {
            let request = shared.lock().await;
            if status.is_none_or(|s| s == request.status) {
                out.push(request.clone());
            }
        }
        out.sort_by_key(|r| r.id);
        out
    }
}
