mod availability;
mod conflict;
mod error;
mod hours;
mod inventory;
mod layout;
mod mutations;
mod queries;
mod requests;
mod reservations;
mod scheduling;
mod store;

pub use availability::{busy_within, free_slots, merge_overlapping, subtract_intervals};
pub use error::{EngineError, ErrorKind, LayoutError, Reason};
pub use hours::{local_date, operating_window, within_operating_hours};
pub use inventory::HoldOutcome;
pub use layout::{active_seats, capacity, parse_grid, render_grid, validate_layout};
pub use requests::SubmitRequest;
pub use reservations::HoldRequest;
pub use scheduling::BookEvent;

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::config::Policy;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability;

use store::InMemoryStore;

pub type SharedRoomState = Arc<RwLock<RoomState>>;
pub type SharedShowingState = Arc<RwLock<ShowingState>>;
pub type SharedRequest = Arc<Mutex<EventRequest>>;

/// Actor name stamped on changes the engine makes on its own (expiry).
pub const SYSTEM_ACTOR: &str = "system";

/// The reservation and scheduling engine.
///
/// Lock order is request → room → showing; no operation holds two rooms or
/// two showings at once.
pub struct Engine {
    store: InMemoryStore,
    pub notify: Arc<NotifyHub>,
    clock: Arc<dyn Clock>,
    policy: Policy,
}

impl Engine {
    pub fn new(policy: Policy, clock: Arc<dyn Clock>, notify: Arc<NotifyHub>) -> Self {
        Self {
            store: InMemoryStore::new(),
            notify,
            clock,
            policy,
        }
    }

    pub fn with_system_clock(policy: Policy, notify: Arc<NotifyHub>) -> Self {
        Self::new(policy, Arc::new(SystemClock), notify)
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn now(&self) -> Ms {
        self.clock.now_ms()
    }

    pub(super) fn get_room(&self, id: &Ulid) -> Result<SharedRoomState, EngineError> {
        self.store.get_room(id).ok_or(EngineError::NotFound(*id))
    }

    pub(super) fn get_showing(&self, id: &Ulid) -> Result<SharedShowingState, EngineError> {
        self.store.get_showing(id).ok_or(EngineError::NotFound(*id))
    }

    /// Log, count and broadcast one change.
    pub(super) fn record(&self, resource_id: Ulid, actor: &str, change: Change) {
        tracing::info!(resource = %resource_id, actor, change = ?change, "state change");
        observability::count_change(&change);
        let record = AuditRecord {
            at: self.now(),
            actor: actor.to_string(),
            change,
        };
        self.notify.send(resource_id, &record);
    }
}

pub(super) fn require_staff(actor: &Actor, what: &'static str) -> Result<(), EngineError> {
    if actor.is_staff() {
        Ok(())
    } else {
        Err(EngineError::Forbidden(what))
    }
}
