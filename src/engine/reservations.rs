use ulid::Ulid;

use crate::limits::MAX_IDEMPOTENCY_KEY_LEN;
use crate::model::*;
use crate::observability::{self, record_error};

use super::inventory::HoldSpec;
use super::{Engine, EngineError, HoldOutcome, SYSTEM_ACTOR, SharedShowingState, require_staff};

/// A customer's seat selection for one showing.
#[derive(Debug, Clone)]
pub struct HoldRequest {
    pub showing_id: Ulid,
    pub seats: Vec<SeatRef>,
    pub idempotency_key: String,
}

impl Engine {
    /// Expire due holds on an already-locked showing and record each one.
    pub(super) fn expire_locked(&self, state: &mut ShowingState) -> usize {
        let showing_id = state.showing.id;
        let expired = state.expire_due(self.now());
        for &reservation_id in &expired {
            self.record(
                showing_id,
                SYSTEM_ACTOR,
                Change::ReservationExpired { reservation_id, showing_id },
            );
        }
        expired.len()
    }

    /// Run expiry across every showing. Returns how many holds expired.
    pub async fn expire_all_due(&self) -> usize {
        let mut total = 0;
        for showing_id in self.store.showing_ids() {
            let Some(ss) = self.store.get_showing(&showing_id) else {
                continue;
            };
            let mut state = ss.write().await;
            total += self.expire_locked(&mut state);
        }
        total
    }

    pub async fn hold_seats(&self, req: HoldRequest, actor: &Actor) -> Result<HoldOutcome, EngineError> {
        self.hold_seats_inner(req, actor).await.inspect_err(record_error)
    }

    async fn hold_seats_inner(&self, req: HoldRequest, actor: &Actor) -> Result<HoldOutcome, EngineError> {
        let key = req.idempotency_key.as_str();
        if key.trim().is_empty() {
            return Err(EngineError::Invalid("idempotency key is required".into()));
        }
        if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(EngineError::LimitExceeded("idempotency key too long"));
        }
        if req.seats.is_empty() {
            return Err(EngineError::Invalid("at least one seat is required".into()));
        }

        let ss = self.get_showing(&req.showing_id)?;
        let mut state = ss.write().await;
        // Claimed and released only under this showing's lock, so a live
        // reservation's key is always bound to its showing.
        let newly_claimed = self
            .store
            .claim_key(key, req.showing_id)
            .map_err(|_| EngineError::DuplicateRequest(key.to_string()))?;
        self.expire_locked(&mut state);
        let spec = HoldSpec {
            id: Ulid::new(),
            seats: &req.seats,
            idempotency_key: key,
            holder: &actor.id,
        };
        let outcome = match state.hold(spec, self.now(), &self.policy) {
            Ok(outcome) => outcome,
            Err(e) => {
                if newly_claimed && !state.idempotency.contains_key(key) {
                    self.store.release_key(key);
                }
                return Err(e);
            }
        };

        match &outcome {
            HoldOutcome::Created(r) => {
                self.store.map_entity(r.id, r.showing_id);
                self.record(
                    r.showing_id,
                    &actor.id,
                    Change::HoldPlaced {
                        reservation_id: r.id,
                        showing_id: r.showing_id,
                        seats: r.seats.clone(),
                        expires_at: r.expires_at,
                    },
                );
            }
            HoldOutcome::Replayed(r) => {
                metrics::counter!(observability::HOLDS_REPLAYED_TOTAL).increment(1);
                tracing::debug!(reservation = %r.id, key, "idempotent hold replayed");
            }
        }
        Ok(outcome)
    }

    /// Reservation id → its showing, write-locked.
    async fn lock_reservation(
        &self,
        id: Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<ShowingState>), EngineError> {
        let showing_id = self.store.owner_of(&id).ok_or(EngineError::NotFound(id))?;
        let ss: SharedShowingState = self.get_showing(&showing_id)?;
        let mut guard = ss.write_owned().await;
        self.expire_locked(&mut guard);
        Ok((showing_id, guard))
    }

    pub async fn confirm_reservation(&self, id: Ulid, actor: &Actor) -> Result<Reservation, EngineError> {
        let (showing_id, mut state) = self.lock_reservation(id).await?;
        check_holder(&state, id, actor)?;
        if state.confirm(id, self.now())? {
            self.record(showing_id, &actor.id, Change::ReservationConfirmed { reservation_id: id, showing_id });
        }
        Ok(state.reservations[&id].clone())
    }

    /// Customer-facing cancel. The cutoff applies to everyone; staff bypass
    /// it with [`Engine::force_cancel_reservation`].
    pub async fn cancel_reservation(&self, id: Ulid, actor: &Actor) -> Result<(), EngineError> {
        let (showing_id, mut state) = self.lock_reservation(id).await?;
        check_holder(&state, id, actor)?;
        if state.cancel(id, self.now(), &self.policy, false)? {
            self.record(
                showing_id,
                &actor.id,
                Change::ReservationCancelled { reservation_id: id, showing_id, forced: false },
            );
        }
        Ok(())
    }

    pub async fn force_cancel_reservation(&self, id: Ulid, actor: &Actor) -> Result<(), EngineError> {
        require_staff(actor, "only staff can force-cancel")?;
        let (showing_id, mut state) = self.lock_reservation(id).await?;
        if state.cancel(id, self.now(), &self.policy, true)? {
            tracing::warn!(reservation = %id, actor = %actor.id, "reservation force-cancelled");
            self.record(
                showing_id,
                &actor.id,
                Change::ReservationCancelled { reservation_id: id, showing_id, forced: true },
            );
        }
        Ok(())
    }

    /// Renew an active hold. Returns the new expiry.
    pub async fn extend_hold(&self, id: Ulid, actor: &Actor) -> Result<Ms, EngineError> {
        let (showing_id, mut state) = self.lock_reservation(id).await?;
        check_holder(&state, id, actor)?;
        let expires_at = state.extend(id, self.now(), &self.policy)?;
        self.record(showing_id, &actor.id, Change::HoldExtended { reservation_id: id, showing_id, expires_at });
        Ok(expires_at)
    }

    pub async fn get_reservation(&self, id: Ulid, actor: &Actor) -> Result<Reservation, EngineError> {
        let (_, state) = self.lock_reservation(id).await?;
        check_holder(&state, id, actor)?;
        Ok(state.reservations[&id].clone())
    }
}

/// Customers may only act on their own reservations.
fn check_holder(state: &ShowingState, id: Ulid, actor: &Actor) -> Result<(), EngineError> {
    let reservation = state.reservations.get(&id).ok_or(EngineError::NotFound(id))?;
    if actor.is_staff() || reservation.holder == actor.id {
        Ok(())
    } else {
        Err(EngineError::Forbidden("reservation belongs to another customer"))
    }
}
