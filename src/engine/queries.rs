use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// Seat map for a showing. Expires due holds first.
    pub async fn seat_map(&self, showing_id: Ulid) -> Result<Vec<SeatView>, EngineError> {
        let ss = self.get_showing(&showing_id)?;
        let mut state = ss.write().await;
        self.expire_locked(&mut state);
        Ok(state.seat_map())
    }

    /// Showing details and inventory counts. Expires due holds first.
    pub async fn showing_info(&self, showing_id: Ulid) -> Result<ShowingInfo, EngineError> {
        let ss = self.get_showing(&showing_id)?;
        let mut state = ss.write().await;
        self.expire_locked(&mut state);
        Ok(ShowingInfo {
            showing: state.showing.clone(),
            snapshot: state.snapshot(),
            retired: state.is_retired(self.now()),
        })
    }

    pub async fn room_info(&self, room_id: Ulid) -> Result<RoomInfo, EngineError> {
        let rs = self.get_room(&room_id)?;
        let room = rs.read().await;
        Ok(RoomInfo {
            id: room.id,
            name: room.name.clone(),
            capacity: room.capacity,
            has_active_bookings: room.has_active_bookings(self.now()),
        })
    }

    pub async fn list_rooms(&self) -> Vec<RoomInfo> {
        let mut rooms = Vec::new();
        for id in self.store.room_ids() {
            if let Ok(info) = self.room_info(id).await {
                rooms.push(info);
            }
        }
        rooms
    }

    pub async fn room_layout(&self, room_id: Ulid) -> Result<Vec<SeatDefinition>, EngineError> {
        let rs = self.get_room(&room_id)?;
        let room = rs.read().await;
        Ok(room.layout.clone())
    }

    /// Every event ever booked in the room, cancelled included, by start time.
    pub async fn list_events(&self, room_id: Ulid) -> Result<Vec<Event>, EngineError> {
        let rs = self.get_room(&room_id)?;
        let room = rs.read().await;
        let mut events: Vec<Event> = room.events.values().cloned().collect();
        events.sort_by_key(|e| (e.span.start, e.id));
        Ok(events)
    }
}
