use std::collections::{BTreeMap, HashMap};

use ulid::Ulid;

use crate::config::Policy;
use crate::limits::MAX_RESERVATIONS_PER_SHOWING;
use crate::model::*;

use super::EngineError;
use super::layout::active_seats;

/// Result of a hold attempt that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HoldOutcome {
    Created(Reservation),
    /// The idempotency key was seen before with the same seats.
    Replayed(Reservation),
}

impl HoldOutcome {
    pub fn reservation(&self) -> &Reservation {
        match self {
            HoldOutcome::Created(r) | HoldOutcome::Replayed(r) => r,
        }
    }

    pub fn into_reservation(self) -> Reservation {
        match self {
            HoldOutcome::Created(r) | HoldOutcome::Replayed(r) => r,
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, HoldOutcome::Replayed(_))
    }
}

/// Parameters of a single hold, already shape-checked by the caller.
pub struct HoldSpec<'a> {
    pub id: Ulid,
    pub seats: &'a [SeatRef],
    pub idempotency_key: &'a str,
    pub holder: &'a str,
}

impl ShowingState {
    /// Fresh inventory: every non-aisle cell, disabled seats blocked.
    pub fn new(showing: Showing, layout: &[SeatDefinition]) -> Self {
        let seats: BTreeMap<SeatRef, SeatCell> = active_seats(layout)
            .map(|def| {
                let state = if def.kind == SeatKind::Disabled {
                    SeatState::Blocked
                } else {
                    SeatState::Available
                };
                (def.seat(), SeatCell { kind: def.kind, state, reservation: None })
            })
            .collect();
        Self {
            showing,
            seats,
            reservations: HashMap::new(),
            idempotency: HashMap::new(),
        }
    }

    pub fn snapshot(&self) -> InventorySnapshot {
        let (mut available, mut held, mut sold, mut blocked) = (0u32, 0u32, 0u32, 0u32);
        for cell in self.seats.values() {
            match cell.state {
                SeatState::Available => available += 1,
                SeatState::Held => held += 1,
                SeatState::Sold => sold += 1,
                SeatState::Blocked => blocked += 1,
            }
        }
        let total = available + held + sold;
        InventorySnapshot {
            total,
            sold,
            held,
            blocked,
            available: total.saturating_sub(sold + held),
        }
    }

    pub fn seat_map(&self) -> Vec<SeatView> {
        self.seats
            .iter()
            .map(|(seat, cell)| SeatView {
                row: seat.row,
                column: seat.column,
                kind: cell.kind,
                state: cell.state,
            })
            .collect()
    }

    pub fn is_retired(&self, now: Ms) -> bool {
        self.showing.span.end <= now
    }

    fn booking_window_open(&self, now: Ms, policy: &Policy) -> bool {
        now < self.showing.span.start - policy.booking_cutoff_ms()
    }

    fn hold_expiry(&self, now: Ms, policy: &Policy) -> Ms {
        (now + policy.hold_ttl_ms()).min(self.showing.span.start - policy.hold_cap_before_start_ms())
    }

    /// Move every seat owned by `reservation_id` to `to`.
    fn release(&mut self, reservation_id: Ulid, to: SeatState) {
        let Some(reservation) = self.reservations.get(&reservation_id) else {
            return;
        };
        for seat in &reservation.seats {
            if let Some(cell) = self.seats.get_mut(seat)
                && cell.reservation == Some(reservation_id)
            {
                cell.state = to;
                cell.reservation = match to {
                    SeatState::Sold => Some(reservation_id),
                    _ => None,
                };
            }
        }
    }

    fn expire_one(&mut self, reservation_id: Ulid) {
        self.release(reservation_id, SeatState::Available);
        if let Some(r) = self.reservations.get_mut(&reservation_id) {
            r.status = ReservationStatus::Expired;
        }
    }

    /// Expire every ACTIVE reservation with `expires_at <= now`.
    pub fn expire_due(&mut self, now: Ms) -> Vec<Ulid> {
        let due: Vec<Ulid> = self
            .reservations
            .values()
            .filter(|r| r.status == ReservationStatus::Active && r.expires_at <= now)
            .map(|r| r.id)
            .collect();
        for &id in &due {
            self.expire_one(id);
        }
        due
    }

    pub fn hold(&mut self, spec: HoldSpec<'_>, now: Ms, policy: &Policy) -> Result<HoldOutcome, EngineError> {
        let mut seats = spec.seats.to_vec();
        seats.sort();
        if seats.windows(2).any(|w| w[0] == w[1]) {
            return Err(EngineError::Invalid("duplicate seat in request".into()));
        }

        if let Some(existing) = self.idempotency.get(spec.idempotency_key) {
            let original = self
                .reservations
                .get(existing)
                .ok_or(EngineError::NotFound(*existing))?;
            if original.seats == seats && original.holder == spec.holder {
                return Ok(HoldOutcome::Replayed(original.clone()));
            }
            return Err(EngineError::DuplicateRequest(spec.idempotency_key.to_string()));
        }

        if self.showing.cancelled {
            return Err(EngineError::InvalidState { id: self.showing.id, status: "cancelled" });
        }
        if !self.booking_window_open(now, policy) {
            return Err(EngineError::BookingWindowClosed(self.showing.id));
        }
        if seats.len() > policy.max_seats_per_reservation {
            return Err(EngineError::SeatLimitExceeded {
                requested: seats.len(),
                max: policy.max_seats_per_reservation,
            });
        }
        if self.reservations.len() >= MAX_RESERVATIONS_PER_SHOWING {
            return Err(EngineError::LimitExceeded("too many reservations on showing"));
        }

        // Check every seat before touching any.
        for seat in &seats {
            let cell = self.seats.get(seat).ok_or(EngineError::UnknownSeat(*seat))?;
            if cell.state != SeatState::Available {
                return Err(EngineError::SeatUnavailable(*seat));
            }
        }

        let expires_at = self.hold_expiry(now, policy);
        if expires_at <= now {
            return Err(EngineError::BookingWindowClosed(self.showing.id));
        }

        for seat in &seats {
            if let Some(cell) = self.seats.get_mut(seat) {
                cell.state = SeatState::Held;
                cell.reservation = Some(spec.id);
            }
        }
        let reservation = Reservation {
            id: spec.id,
            showing_id: self.showing.id,
            seats,
            idempotency_key: spec.idempotency_key.to_string(),
            holder: spec.holder.to_string(),
            created_at: now,
            expires_at,
            status: ReservationStatus::Active,
        };
        self.idempotency.insert(reservation.idempotency_key.clone(), reservation.id);
        self.reservations.insert(reservation.id, reservation.clone());
        Ok(HoldOutcome::Created(reservation))
    }

    /// Resolve `id` to an ACTIVE, unexpired reservation, expiring it if due.
    fn live_reservation(&mut self, id: Ulid, now: Ms) -> Result<(), EngineError> {
        let (status, expires_at) = self
            .reservations
            .get(&id)
            .map(|r| (r.status, r.expires_at))
            .ok_or(EngineError::NotFound(id))?;
        match status {
            ReservationStatus::Active if expires_at <= now => {
                self.expire_one(id);
                Err(EngineError::HoldExpired(id))
            }
            ReservationStatus::Active => Ok(()),
            ReservationStatus::Expired => Err(EngineError::HoldExpired(id)),
            other => Err(EngineError::InvalidState { id, status: other.as_str() }),
        }
    }

    /// Held seats become SOLD. Returns false when already confirmed.
    pub fn confirm(&mut self, id: Ulid, now: Ms) -> Result<bool, EngineError> {
        if self
            .reservations
            .get(&id)
            .is_some_and(|r| r.status == ReservationStatus::Confirmed)
        {
            return Ok(false);
        }
        self.live_reservation(id, now)?;
        self.release(id, SeatState::Sold);
        if let Some(r) = self.reservations.get_mut(&id) {
            r.status = ReservationStatus::Confirmed;
        }
        Ok(true)
    }

    /// Held seats become AVAILABLE. Returns false when already cancelled.
    /// `forced` skips the customer cutoff.
    pub fn cancel(&mut self, id: Ulid, now: Ms, policy: &Policy, forced: bool) -> Result<bool, EngineError> {
        if self
            .reservations
            .get(&id)
            .is_some_and(|r| r.status == ReservationStatus::Cancelled)
        {
            return Ok(false);
        }
        self.live_reservation(id, now)?;
        if !forced && now >= self.showing.span.start - policy.cancel_cutoff_ms() {
            return Err(EngineError::CancelWindowClosed(id));
        }
        self.release(id, SeatState::Available);
        if let Some(r) = self.reservations.get_mut(&id) {
            r.status = ReservationStatus::Cancelled;
        }
        Ok(true)
    }

    /// Renew an active hold. Returns the new expiry.
    pub fn extend(&mut self, id: Ulid, now: Ms, policy: &Policy) -> Result<Ms, EngineError> {
        self.live_reservation(id, now)?;
        if !self.booking_window_open(now, policy) {
            return Err(EngineError::BookingWindowClosed(self.showing.id));
        }
        let expires_at = self.hold_expiry(now, policy);
        let r = self.reservations.get_mut(&id).ok_or(EngineError::NotFound(id))?;
        r.expires_at = r.expires_at.max(expires_at);
        Ok(r.expires_at)
    }

    /// Cancel every active hold, e.g. when the showing itself is cancelled.
    pub fn cancel_all_active(&mut self) -> Vec<Ulid> {
        let active: Vec<Ulid> = self
            .reservations
            .values()
            .filter(|r| r.status == ReservationStatus::Active)
            .map(|r| r.id)
            .collect();
        for &id in &active {
            self.release(id, SeatState::Available);
            if let Some(r) = self.reservations.get_mut(&id) {
                r.status = ReservationStatus::Cancelled;
            }
        }
        active
    }

    /// AVAILABLE → BLOCKED. Returns false when already blocked.
    pub fn block(&mut self, seat: SeatRef) -> Result<bool, EngineError> {
        let cell = self.seats.get_mut(&seat).ok_or(EngineError::UnknownSeat(seat))?;
        match cell.state {
            SeatState::Available => {
                cell.state = SeatState::Blocked;
                Ok(true)
            }
            SeatState::Blocked => Ok(false),
            SeatState::Held | SeatState::Sold => Err(EngineError::SeatUnavailable(seat)),
        }
    }

    /// BLOCKED → AVAILABLE. Returns false when already available.
    pub fn unblock(&mut self, seat: SeatRef) -> Result<bool, EngineError> {
        let cell = self.seats.get_mut(&seat).ok_or(EngineError::UnknownSeat(seat))?;
        match cell.state {
            SeatState::Blocked => {
                cell.state = SeatState::Available;
                Ok(true)
            }
            SeatState::Available => Ok(false),
            SeatState::Held | SeatState::Sold => Err(EngineError::SeatUnavailable(seat)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::layout::parse_grid;

    const DAY0: Ms = 1_790_812_800_000;
    const START: Ms = DAY0 + 5 * DAY + 20 * HOUR;

    fn showing_state(grid: &str) -> ShowingState {
        let showing = Showing {
            id: Ulid::new(),
            room_id: Ulid::new(),
            span: Span::new(START, START + 2 * HOUR),
            price: 1200,
            cancelled: false,
        };
        ShowingState::new(showing, &parse_grid(grid).unwrap())
    }

    fn seats(labels: &[&str]) -> Vec<SeatRef> {
        labels.iter().map(|s| s.parse().unwrap()).collect()
    }

    fn hold(
        state: &mut ShowingState,
        labels: &[&str],
        key: &str,
        now: Ms,
    ) -> Result<HoldOutcome, EngineError> {
        let seats = seats(labels);
        state.hold(
            HoldSpec { id: Ulid::new(), seats: &seats, idempotency_key: key, holder: "ana" },
            now,
            &Policy::default(),
        )
    }

    fn assert_capacity_invariant(state: &ShowingState) {
        let s = state.snapshot();
        assert_eq!(s.available, s.total - s.held - s.sold);
    }

    #[test]
    fn new_inventory_blocks_disabled_and_skips_aisles() {
        let state = showing_state("NNENN/AAEDD");
        assert_eq!(state.seats.len(), 8);
        let s = state.snapshot();
        assert_eq!(s.total, 6);
        assert_eq!(s.blocked, 2);
        assert_eq!(s.available, 6);
    }

    #[test]
    fn hold_then_conflicting_hold() {
        let mut state = showing_state("NNNNN");
        let first = hold(&mut state, &["A1", "A2"], "key1", DAY0).unwrap();
        assert!(!first.is_replay());
        assert_eq!(state.snapshot().available, 3);

        let err = hold(&mut state, &["A1"], "key2", DAY0).unwrap_err();
        assert!(matches!(err, EngineError::SeatUnavailable(s) if s == SeatRef::new('A', 1)));
        assert_eq!(state.snapshot().available, 3);
        assert_capacity_invariant(&state);
    }

    #[test]
    fn hold_is_all_or_nothing() {
        let mut state = showing_state("NNNNN");
        hold(&mut state, &["A3"], "key1", DAY0).unwrap();
        assert!(hold(&mut state, &["A1", "A2", "A3"], "key2", DAY0).is_err());
        assert_eq!(state.seats[&SeatRef::new('A', 1)].state, SeatState::Available);
        assert_eq!(state.seats[&SeatRef::new('A', 2)].state, SeatState::Available);
    }

    #[test]
    fn replay_returns_original_unchanged() {
        let mut state = showing_state("NNNNN");
        let first = hold(&mut state, &["A2", "A1"], "key1", DAY0).unwrap();
        let before = state.snapshot();
        let again = hold(&mut state, &["A1", "A2"], "key1", DAY0 + MINUTE).unwrap();
        assert!(again.is_replay());
        assert_eq!(again.reservation(), first.reservation());
        assert_eq!(state.snapshot(), before);
    }

    #[test]
    fn reused_key_with_other_seats_fails() {
        let mut state = showing_state("NNNNN");
        hold(&mut state, &["A1"], "key1", DAY0).unwrap();
        let err = hold(&mut state, &["A2"], "key1", DAY0).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateRequest(_)));
    }

    #[test]
    fn too_many_seats() {
        let mut state = showing_state("NNNNNN");
        let err = hold(&mut state, &["A1", "A2", "A3", "A4", "A5", "A6"], "k", DAY0).unwrap_err();
        assert!(matches!(err, EngineError::SeatLimitExceeded { requested: 6, max: 5 }));
    }

    #[test]
    fn unknown_and_blocked_seats() {
        let mut state = showing_state("NNENN/AAEDD");
        assert!(matches!(
            hold(&mut state, &["A3"], "k1", DAY0),
            Err(EngineError::UnknownSeat(_))
        ));
        assert!(matches!(
            hold(&mut state, &["B4"], "k2", DAY0),
            Err(EngineError::SeatUnavailable(_))
        ));
    }

    #[test]
    fn booking_window_closes_before_start() {
        let mut state = showing_state("NNNNN");
        let err = hold(&mut state, &["A1"], "k", START - 30 * MINUTE).unwrap_err();
        assert!(matches!(err, EngineError::BookingWindowClosed(_)));
    }

    #[test]
    fn expiry_capped_an_hour_before_start() {
        let mut state = showing_state("NNNNN");
        let now = START - HOUR - 5 * MINUTE;
        let r = hold(&mut state, &["A1"], "k", now).unwrap().into_reservation();
        assert_eq!(r.expires_at, START - HOUR);

        let r = hold(&mut state, &["A2"], "k2", DAY0).unwrap().into_reservation();
        assert_eq!(r.expires_at, DAY0 + 10 * MINUTE);
    }

    #[test]
    fn expire_due_frees_seats() {
        let mut state = showing_state("NNNNN");
        let r = hold(&mut state, &["A1", "A2"], "k", DAY0).unwrap().into_reservation();
        assert!(state.expire_due(r.expires_at - 1).is_empty());
        assert_eq!(state.expire_due(r.expires_at + SECOND), vec![r.id]);
        assert_eq!(state.reservations[&r.id].status, ReservationStatus::Expired);
        assert_eq!(state.snapshot().available, 5);
        assert!(state.seats.values().all(|c| c.reservation.is_none()));
    }

    #[test]
    fn confirm_sells_and_is_idempotent() {
        let mut state = showing_state("NNNNN");
        let r = hold(&mut state, &["A1", "A2"], "k", DAY0).unwrap().into_reservation();
        assert!(state.confirm(r.id, DAY0 + MINUTE).unwrap());
        assert!(!state.confirm(r.id, DAY0 + 2 * MINUTE).unwrap());
        let s = state.snapshot();
        assert_eq!((s.sold, s.held, s.available), (2, 0, 3));
        // Sold seats never expire.
        assert!(state.expire_due(DAY0 + DAY).is_empty());
    }

    #[test]
    fn confirm_after_expiry_fails() {
        let mut state = showing_state("NNNNN");
        let r = hold(&mut state, &["A1"], "k", DAY0).unwrap().into_reservation();
        let err = state.confirm(r.id, r.expires_at).unwrap_err();
        assert!(matches!(err, EngineError::HoldExpired(_)));
        assert_eq!(state.reservations[&r.id].status, ReservationStatus::Expired);
        assert_eq!(state.snapshot().available, 5);
    }

    #[test]
    fn cancel_respects_cutoff_unless_forced() {
        let policy = Policy::default();
        let mut state = showing_state("NNNNN");
        let late = START - 20 * HOUR;
        let r = hold(&mut state, &["A1"], "k", late).unwrap().into_reservation();

        let err = state.cancel(r.id, late + MINUTE, &policy, false).unwrap_err();
        assert!(matches!(err, EngineError::CancelWindowClosed(_)));
        assert!(state.cancel(r.id, late + MINUTE, &policy, true).unwrap());
        assert!(!state.cancel(r.id, late + MINUTE, &policy, true).unwrap());
        assert_eq!(state.snapshot().available, 5);
    }

    #[test]
    fn cancel_before_cutoff_frees_seats() {
        let policy = Policy::default();
        let mut state = showing_state("NNNNN");
        let r = hold(&mut state, &["A1", "A2"], "k", DAY0).unwrap().into_reservation();
        assert!(state.cancel(r.id, DAY0 + MINUTE, &policy, false).unwrap());
        assert_eq!(state.reservations[&r.id].status, ReservationStatus::Cancelled);
        assert_eq!(state.snapshot().available, 5);
        // Terminal: cannot confirm afterwards.
        assert!(matches!(
            state.confirm(r.id, DAY0 + MINUTE),
            Err(EngineError::InvalidState { status: "cancelled", .. })
        ));
    }

    #[test]
    fn extend_pushes_expiry() {
        let policy = Policy::default();
        let mut state = showing_state("NNNNN");
        let r = hold(&mut state, &["A1"], "k", DAY0).unwrap().into_reservation();
        let new_expiry = state.extend(r.id, DAY0 + 8 * MINUTE, &policy).unwrap();
        assert_eq!(new_expiry, DAY0 + 18 * MINUTE);
        assert!(state.expire_due(DAY0 + 11 * MINUTE).is_empty());
    }

    #[test]
    fn block_and_unblock() {
        let mut state = showing_state("NNNNN");
        let a1 = SeatRef::new('A', 1);
        assert!(state.block(a1).unwrap());
        assert!(!state.block(a1).unwrap());
        assert_eq!(state.snapshot().total, 4);
        assert!(matches!(
            hold(&mut state, &["A1"], "k", DAY0),
            Err(EngineError::SeatUnavailable(_))
        ));
        assert!(state.unblock(a1).unwrap());
        hold(&mut state, &["A1"], "k2", DAY0).unwrap();
        assert!(matches!(state.block(a1), Err(EngineError::SeatUnavailable(_))));
        assert_capacity_invariant(&state);
    }

    #[test]
    fn cancel_all_active_leaves_sold() {
        let mut state = showing_state("NNNNN");
        let sold = hold(&mut state, &["A1"], "k1", DAY0).unwrap().into_reservation();
        state.confirm(sold.id, DAY0).unwrap();
        let held = hold(&mut state, &["A2"], "k2", DAY0).unwrap().into_reservation();
        assert_eq!(state.cancel_all_active(), vec![held.id]);
        let s = state.snapshot();
        assert_eq!((s.sold, s.held), (1, 0));
    }
}
