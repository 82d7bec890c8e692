use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ulid::Ulid;

use super::{SharedRequest, SharedRoomState, SharedShowingState};

/// Lock-per-entity indexes. The maps themselves are only held for the
/// duration of a lookup; all state changes happen under the entity lock.
pub struct InMemoryStore {
    rooms: DashMap<Ulid, SharedRoomState>,
    showings: DashMap<Ulid, SharedShowingState>,
    requests: DashMap<Ulid, SharedRequest>,
    /// Reservation → showing, event → room.
    entity_owner: DashMap<Ulid, Ulid>,
    /// Idempotency key → showing it was first used on.
    idempotency_keys: DashMap<String, Ulid>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            showings: DashMap::new(),
            requests: DashMap::new(),
            entity_owner: DashMap::new(),
            idempotency_keys: DashMap::new(),
        }
    }

    // ── Rooms ────────────────────────────────────────────────

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    /// False if the id is taken.
    pub fn insert_room(&self, id: Ulid, state: SharedRoomState) -> bool {
        match self.rooms.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(state);
                true
            }
        }
    }

    pub fn room_ids(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.rooms.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    // ── Showings ─────────────────────────────────────────────

    pub fn contains_showing(&self, id: &Ulid) -> bool {
        self.showings.contains_key(id)
    }

    pub fn get_showing(&self, id: &Ulid) -> Option<SharedShowingState> {
        self.showings.get(id).map(|e| e.value().clone())
    }

    pub fn insert_showing(&self, id: Ulid, state: SharedShowingState) -> bool {
        match self.showings.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(state);
                true
            }
        }
    }

    pub fn showing_ids(&self) -> Vec<Ulid> {
        self.showings.iter().map(|e| *e.key()).collect()
    }

    // ── Event requests ───────────────────────────────────────

    pub fn get_request(&self, id: &Ulid) -> Option<SharedRequest> {
        self.requests.get(id).map(|e| e.value().clone())
    }

    pub fn insert_request(&self, id: Ulid, request: SharedRequest) {
        self.requests.insert(id, request);
    }

    pub fn requests(&self) -> Vec<SharedRequest> {
        self.requests.iter().map(|e| e.value().clone()).collect()
    }

    // ── Entity index ─────────────────────────────────────────

    pub fn owner_of(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_owner.get(entity_id).map(|e| *e.value())
    }

    pub fn map_entity(&self, entity_id: Ulid, owner_id: Ulid) {
        self.entity_owner.insert(entity_id, owner_id);
    }

    // ── Idempotency keys ─────────────────────────────────────

    /// Bind `key` to `showing_id`. `Ok(true)` if this call made the binding,
    /// `Ok(false)` if it already existed for the same showing, `Err(owner)`
    /// if the key belongs to another showing.
    pub fn claim_key(&self, key: &str, showing_id: Ulid) -> Result<bool, Ulid> {
        match self.idempotency_keys.entry(key.to_string()) {
            Entry::Occupied(e) if *e.get() == showing_id => Ok(false),
            Entry::Occupied(e) => Err(*e.get()),
            Entry::Vacant(slot) => {
                slot.insert(showing_id);
                Ok(true)
            }
        }
    }

    pub fn release_key(&self, key: &str) {
        self.idempotency_keys.remove(key);
    }
}
