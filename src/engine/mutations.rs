use std::sync::Arc;

use tokio::sync::RwLock;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, check_text, checked_span};
use super::layout::{capacity, validate_layout};
use super::{Engine, EngineError, require_staff};

impl Engine {
    pub async fn create_room(
        &self,
        id: Ulid,
        name: String,
        layout: Vec<SeatDefinition>,
        actor: &Actor,
    ) -> Result<RoomInfo, EngineError> {
        require_staff(actor, "only staff can create rooms")?;
        if self.store.room_count() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        check_text(&name, MAX_NAME_LEN, "room name too long")?;
        validate_layout(&layout)?;

        let capacity = capacity(&layout);
        let room = RoomState::new(id, name.clone(), layout, capacity);
        if !self.store.insert_room(id, Arc::new(RwLock::new(room))) {
            return Err(EngineError::AlreadyExists(id));
        }
        self.record(id, &actor.id, Change::RoomCreated { room_id: id, capacity });
        Ok(RoomInfo {
            id,
            name,
            capacity,
            has_active_bookings: false,
        })
    }

    /// Replace the seat layout. Refused while the room has any showing or
    /// reserved event that has not finished.
    pub async fn update_room_layout(
        &self,
        id: Ulid,
        layout: Vec<SeatDefinition>,
        actor: &Actor,
    ) -> Result<u32, EngineError> {
        require_staff(actor, "only staff can edit rooms")?;
        validate_layout(&layout)?;
        let rs = self.get_room(&id)?;
        let mut room = rs.write().await;
        if room.has_active_bookings(self.now()) {
            return Err(EngineError::RoomInUse(id));
        }
        room.capacity = capacity(&layout);
        room.layout = layout;
        self.record(id, &actor.id, Change::RoomLayoutUpdated { room_id: id, capacity: room.capacity });
        Ok(room.capacity)
    }

    pub async fn create_showing(
        &self,
        id: Ulid,
        room_id: Ulid,
        start: Ms,
        end: Ms,
        price: i64,
        actor: &Actor,
    ) -> Result<Showing, EngineError> {
        require_staff(actor, "only staff can schedule showings")?;
        let span = checked_span(start, end)?;
        if price < 0 {
            return Err(EngineError::Invalid("price must not be negative".into()));
        }
        if span.start <= self.now() {
            return Err(EngineError::Invalid("showing starts in the past".into()));
        }
        if self.store.contains_showing(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let rs = self.get_room(&room_id)?;
        let mut room = rs.write().await;
        if room.intervals.len() >= MAX_INTERVALS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many intervals on room"));
        }
        check_no_conflict(&room, &span)?;

        let showing = Showing { id, room_id, span, price, cancelled: false };
        let state = ShowingState::new(showing.clone(), &room.layout);
        if !self.store.insert_showing(id, Arc::new(RwLock::new(state))) {
            return Err(EngineError::AlreadyExists(id));
        }
        room.insert_interval(Interval { id, span, kind: IntervalKind::Showing });
        self.record(room_id, &actor.id, Change::ShowingScheduled { showing_id: id, room_id, span });
        Ok(showing)
    }

    /// Cancel a showing with no sales. Active holds are cancelled and the
    /// room time is freed.
    pub async fn cancel_showing(&self, id: Ulid, actor: &Actor) -> Result<(), EngineError> {
        require_staff(actor, "only staff can cancel showings")?;
        let ss = self.get_showing(&id)?;
        let room_id = ss.read().await.showing.room_id;
        let rs = self.get_room(&room_id)?;

        let mut room = rs.write().await;
        let mut state = ss.write().await;
        if state.showing.cancelled {
            return Ok(());
        }
        self.expire_locked(&mut state);
        if state.snapshot().sold > 0 {
            return Err(EngineError::ShowingHasSales(id));
        }

        for reservation_id in state.cancel_all_active() {
            self.record(
                id,
                &actor.id,
                Change::ReservationCancelled { reservation_id, showing_id: id, forced: true },
            );
        }
        state.showing.cancelled = true;
        room.remove_interval(id);
        self.record(id, &actor.id, Change::ShowingCancelled { showing_id: id, room_id });
        Ok(())
    }

    pub async fn block_seat(&self, showing_id: Ulid, seat: SeatRef, actor: &Actor) -> Result<(), EngineError> {
        require_staff(actor, "only staff can block seats")?;
        let ss = self.get_showing(&showing_id)?;
        let mut state = ss.write().await;
        self.expire_locked(&mut state);
        if state.block(seat)? {
            self.record(showing_id, &actor.id, Change::SeatBlocked { showing_id, seat });
        }
        Ok(())
    }

    pub async fn unblock_seat(&self, showing_id: Ulid, seat: SeatRef, actor: &Actor) -> Result<(), EngineError> {
        require_staff(actor, "only staff can unblock seats")?;
        let ss = self.get_showing(&showing_id)?;
        let mut state = ss.write().await;
        if state.unblock(seat)? {
            self.record(showing_id, &actor.id, Change::SeatUnblocked { showing_id, seat });
        }
        Ok(())
    }
}
