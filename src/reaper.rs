use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

/// Background task that periodically expires due holds on every showing.
/// Reads lazily expire as well, so this only keeps seat maps fresh.
pub async fn run_reaper(engine: Arc<Engine>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let expired = engine.expire_all_due().await;
        if expired > 0 {
            info!(expired, "reaped expired holds");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::Policy;
    use crate::engine::{HoldRequest, parse_grid};
    use crate::model::*;
    use crate::notify::NotifyHub;
    use ulid::Ulid;

    const DAY0: Ms = 1_790_812_800_000;

    #[tokio::test]
    async fn reaper_expires_holds_without_reads() {
        let clock = Arc::new(ManualClock::new(DAY0));
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(Policy::default(), clock.clone(), notify.clone()));
        let staff = Actor::staff("staff");

        let room_id = Ulid::new();
        engine
            .create_room(room_id, "Sala 1".into(), parse_grid("NNNN").unwrap(), &staff)
            .await
            .unwrap();
        let showing_id = Ulid::new();
        let start = DAY0 + 2 * DAY + 20 * HOUR;
        engine
            .create_showing(showing_id, room_id, start, start + 2 * HOUR, 900, &staff)
            .await
            .unwrap();

        let mut rx = notify.subscribe(showing_id);
        let outcome = engine
            .hold_seats(
                HoldRequest {
                    showing_id,
                    seats: vec![SeatRef::new('A', 1)],
                    idempotency_key: "k1".into(),
                },
                &Actor::customer("ana"),
            )
            .await
            .unwrap();
        let reservation_id = outcome.reservation().id;
        assert!(matches!(rx.recv().await.unwrap().change, Change::HoldPlaced { .. }));

        clock.advance(11 * MINUTE);
        let handle = tokio::spawn(run_reaper(engine.clone(), Duration::from_millis(10)));

        let record = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("reaper did not run")
            .unwrap();
        handle.abort();

        assert_eq!(record.actor, crate::engine::SYSTEM_ACTOR);
        assert_eq!(
            record.change,
            Change::ReservationExpired { reservation_id, showing_id }
        );
    }
}
