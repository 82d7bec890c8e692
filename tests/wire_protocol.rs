use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{stream, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_postgres::{AsyncMessage, Config, NoTls, Notification, SimpleQueryMessage};
use ulid::Ulid;

use marquee::auth::Roles;
use marquee::config::Policy;
use marquee::engine::Engine;
use marquee::notify::NotifyHub;
use marquee::wire;

const STAFF: &str = "box-office";
const PASSWORD: &str = "marquee";
const HOUR: i64 = 3_600_000;
const DAY: i64 = 24 * HOUR;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let engine = Arc::new(Engine::with_system_clock(Policy::default(), Arc::new(NotifyHub::new())));
    let roles = Arc::new(Roles::new([STAFF]));

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine.clone();
            let roles = roles.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, roles, PASSWORD.to_string(), None).await;
            });
        }
    });

    addr
}

async fn connect(addr: SocketAddr, user: &str) -> (tokio_postgres::Client, mpsc::UnboundedReceiver<Notification>) {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("marquee")
        .user(user)
        .password(PASSWORD);

    let (client, mut connection) = config.connect(NoTls).await.unwrap();

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let stream = stream::poll_fn(move |cx| connection.poll_message(cx));
        futures::pin_mut!(stream);
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(AsyncMessage::Notification(n)) => {
                    let _ = tx.send(n);
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });

    (client, rx)
}

async fn recv_notification(
    rx: &mut mpsc::UnboundedReceiver<Notification>,
    timeout: Duration,
) -> Option<Notification> {
    tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
}

fn data_rows(messages: Vec<SimpleQueryMessage>) -> Vec<tokio_postgres::SimpleQueryRow> {
    messages
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

/// A 2x3 room with one showing two days out. Returns (room_id, showing_id).
async fn room_with_showing(staff: &tokio_postgres::Client) -> (Ulid, Ulid) {
    let room_id = Ulid::new();
    let showing_id = Ulid::new();
    let start = chrono::Utc::now().timestamp_millis() + 2 * DAY;
    let end = start + 2 * HOUR;
    staff
        .batch_execute(&format!(
            "INSERT INTO rooms (id, name, layout) VALUES ('{room_id}', 'Sala 1', 'NNN/NAN')"
        ))
        .await
        .unwrap();
    staff
        .batch_execute(&format!(
            r#"INSERT INTO showings (id, room_id, start, "end", price) VALUES ('{showing_id}', '{room_id}', {start}, {end}, 1200)"#
        ))
        .await
        .unwrap();
    (room_id, showing_id)
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn staff_creates_room_and_reads_it_back() {
    let addr = start_test_server().await;
    let (staff, _rx) = connect(addr, STAFF).await;
    let (room_id, _) = room_with_showing(&staff).await;

    let rows = data_rows(
        staff
            .simple_query(&format!("SELECT * FROM rooms WHERE id = '{room_id}'"))
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name"), Some("Sala 1"));
    assert_eq!(rows[0].get("capacity"), Some("6"));
    assert_eq!(rows[0].get("has_active_bookings"), Some("t"));
}

#[tokio::test]
async fn hold_then_confirm_over_the_wire() {
    let addr = start_test_server().await;
    let (staff, _) = connect(addr, STAFF).await;
    let (ana, _) = connect(addr, "ana").await;
    let (_, showing_id) = room_with_showing(&staff).await;

    let rows = data_rows(
        ana.simple_query(&format!(
            "INSERT INTO holds (showing_id, seats, idempotency_key) VALUES ('{showing_id}', 'A1,A2', 'ana-1')"
        ))
        .await
        .unwrap(),
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("status"), Some("active"));
    assert_eq!(rows[0].get("holder"), Some("ana"));
    assert_eq!(rows[0].get("seats"), Some("A1,A2"));
    let reservation_id = rows[0].get("id").unwrap().to_string();

    ana.batch_execute(&format!(
        "UPDATE reservations SET status = 'confirmed' WHERE id = '{reservation_id}'"
    ))
    .await
    .unwrap();

    let showing = data_rows(
        ana.simple_query(&format!("SELECT * FROM showings WHERE id = '{showing_id}'"))
            .await
            .unwrap(),
    );
    assert_eq!(showing[0].get("sold"), Some("2"));
    assert_eq!(showing[0].get("held"), Some("0"));
    assert_eq!(showing[0].get("available"), Some("4"));
}

#[tokio::test]
async fn extended_protocol_uses_binary_results() {
    let addr = start_test_server().await;
    let (staff, _) = connect(addr, STAFF).await;
    let (_, showing_id) = room_with_showing(&staff).await;

    let rows = staff
        .query("SELECT * FROM seats WHERE showing_id = $1", &[&showing_id.to_string()])
        .await
        .unwrap();
    assert_eq!(rows.len(), 6);
    let b2 = rows
        .iter()
        .find(|r| r.get::<_, &str>("seat") == "B2")
        .expect("seat B2 listed");
    assert_eq!(b2.get::<_, &str>("kind"), "accessible");
    assert_eq!(b2.get::<_, i64>("column"), 2);
    assert_eq!(b2.get::<_, &str>("state"), "available");

    let updated = staff
        .execute(
            "UPDATE seats SET state = 'blocked' WHERE showing_id = $1 AND seat = $2",
            &[&showing_id.to_string(), &"A3"],
        )
        .await
        .unwrap();
    assert_eq!(updated, 1);
}

#[tokio::test]
async fn errors_carry_reason_and_sqlstate() {
    let addr = start_test_server().await;
    let (staff, _) = connect(addr, STAFF).await;
    let (ana, _) = connect(addr, "ana").await;
    let (_, showing_id) = room_with_showing(&staff).await;

    let err = ana
        .batch_execute(&format!(
            "INSERT INTO rooms (id, name, layout) VALUES ('{}', 'Sala 2', 'NN')",
            Ulid::new()
        ))
        .await
        .unwrap_err();
    let db = err.as_db_error().expect("database error");
    assert_eq!(db.code().code(), "42501");
    assert!(db.message().starts_with("FORBIDDEN:"), "{}", db.message());

    ana.batch_execute(&format!(
        "INSERT INTO holds (showing_id, seats, idempotency_key) VALUES ('{showing_id}', 'A1', 'ana-1')"
    ))
    .await
    .unwrap();
    let (bruno, _) = connect(addr, "bruno").await;
    let err = bruno
        .batch_execute(&format!(
            "INSERT INTO holds (showing_id, seats, idempotency_key) VALUES ('{showing_id}', 'A1', 'bruno-1')"
        ))
        .await
        .unwrap_err();
    let db = err.as_db_error().expect("database error");
    assert_eq!(db.code().code(), "55000");
    assert!(db.message().starts_with("SEAT_UNAVAILABLE:"), "{}", db.message());

    let err = staff.batch_execute("SELECT * FROM nowhere").await.unwrap_err();
    assert!(err.as_db_error().is_some());
}

#[tokio::test]
async fn listener_sees_changes_on_next_command() {
    let addr = start_test_server().await;
    let (staff, mut staff_rx) = connect(addr, STAFF).await;
    let (_, showing_id) = room_with_showing(&staff).await;

    staff
        .batch_execute(&format!("LISTEN showing_{showing_id}"))
        .await
        .unwrap();

    let (ana, _) = connect(addr, "ana").await;
    ana.batch_execute(&format!(
        "INSERT INTO holds (showing_id, seats, idempotency_key) VALUES ('{showing_id}', 'B1', 'ana-1')"
    ))
    .await
    .unwrap();

    // Delivery piggybacks on the listener's own traffic.
    staff.batch_execute("SELECT * FROM rooms").await.unwrap();

    let notif = recv_notification(&mut staff_rx, Duration::from_secs(5))
        .await
        .expect("expected notification");
    assert_eq!(notif.channel(), format!("showing_{showing_id}"));
    let payload: serde_json::Value = serde_json::from_str(notif.payload()).unwrap();
    assert_eq!(payload["actor"], "ana");
    assert_eq!(payload["change"]["type"], "hold_placed");
}

#[tokio::test]
async fn unlisten_stops_notifications() {
    let addr = start_test_server().await;
    let (staff, mut staff_rx) = connect(addr, STAFF).await;
    let (_, showing_id) = room_with_showing(&staff).await;

    staff
        .batch_execute(&format!("LISTEN showing_{showing_id}"))
        .await
        .unwrap();
    staff.batch_execute("UNLISTEN *").await.unwrap();

    let (ana, _) = connect(addr, "ana").await;
    ana.batch_execute(&format!(
        "INSERT INTO holds (showing_id, seats, idempotency_key) VALUES ('{showing_id}', 'B3', 'ana-1')"
    ))
    .await
    .unwrap();
    staff.batch_execute("SELECT * FROM rooms").await.unwrap();

    let notif = recv_notification(&mut staff_rx, Duration::from_millis(300)).await;
    assert!(notif.is_none(), "should not receive notification after UNLISTEN *");
}

#[tokio::test]
async fn listen_rejects_unknown_channel_kind() {
    let addr = start_test_server().await;
    let (staff, _) = connect(addr, STAFF).await;

    let err = staff
        .batch_execute(&format!("LISTEN resource_{}", Ulid::new()))
        .await
        .unwrap_err();
    assert!(err.as_db_error().is_some());
}
